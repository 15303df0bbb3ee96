//! Cohort Router: assigns participants to experiment groups and routes them
//! through each group's steps.
//!
//! Main entry point that loads configuration and experiments and starts the server.

use cohort_api::ApiServer;
use cohort_core::catalog::ExperimentCatalog;
use cohort_core::config::AppConfig;
use cohort_engine::{InMemoryParticipantRepository, RouterService, RuleChecker};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "cohort-router")]
#[command(about = "Capacity-aware experiment participant router")]
#[command(version)]
struct Cli {
    /// Node identifier (overrides config)
    #[arg(long, env = "COHORT_ROUTER__NODE_ID")]
    node_id: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "COHORT_ROUTER__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Experiments file (JSON with comments)
    #[arg(long, env = "APP_CONFIG_PATH")]
    config_path: Option<String>,

    /// Participant table name (overrides config and experiments file)
    #[arg(long, env = "COHORT_ROUTER__STORAGE__TABLE")]
    table: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cohort_router=info,cohort_engine=info,tower_http=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Cohort Router starting up");

    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(path) = cli.config_path {
        config.experiments.path = path;
    }
    if let Some(table) = cli.table {
        config.storage.table = Some(table);
    }

    let catalog = ExperimentCatalog::load_file(&config.experiments.path).unwrap_or_else(|e| {
        warn!(
            path = %config.experiments.path,
            error = %e,
            "Failed to load experiments, serving an empty catalog"
        );
        ExperimentCatalog::new()
    });

    let table = config.table_name(catalog.table());
    let base_path = config.base_path(catalog.base_path());
    let experiments = catalog.len();

    info!(
        node_id = %config.node_id,
        http_port = config.api.http_port,
        table = %table,
        base_path = %base_path,
        experiments,
        "Configuration loaded"
    );

    let repository = Arc::new(InMemoryParticipantRepository::new(table));
    let checker = RuleChecker::new(Duration::from_secs(config.rules.fetch_timeout_secs))?;
    let service = Arc::new(RouterService::new(Arc::new(catalog), repository, checker));

    let api_server = ApiServer::new(config, service)
        .with_base_path(base_path)
        .with_experiment_count(experiments);

    if let Err(e) = api_server.start_metrics().await {
        error!(error = %e, "Failed to start metrics exporter");
    }

    info!("Cohort Router is ready to serve traffic");

    api_server.start_http().await?;

    Ok(())
}
