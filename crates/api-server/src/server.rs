//! API server: builds the axum router and serves HTTP and metrics.

use crate::rest::{self, AppState};
use axum::routing::{get, post};
use axum::Router;
use cohort_core::config::AppConfig;
use cohort_engine::RouterService;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// HTTP front for the router service.
pub struct ApiServer {
    config: AppConfig,
    service: Arc<RouterService>,
    base_path: String,
    experiments: usize,
}

impl ApiServer {
    pub fn new(config: AppConfig, service: Arc<RouterService>) -> Self {
        let base_path = config.base_path(None);
        Self {
            config,
            service,
            base_path,
            experiments: 0,
        }
    }

    /// Mount every route under `base_path` (already normalised, empty for root).
    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = base_path.into();
        self
    }

    pub fn with_experiment_count(mut self, experiments: usize) -> Self {
        self.experiments = experiments;
        self
    }

    pub fn router(&self) -> Router {
        let state = AppState {
            service: self.service.clone(),
            node_id: self.config.node_id.clone(),
            start_time: Instant::now(),
            experiments: self.experiments,
        };

        let api = Router::new()
            .route("/", get(rest::root))
            // Routing endpoints
            .route("/assign", post(rest::handle_assign))
            .route("/next", post(rest::handle_next))
            .route("/heartbeat", post(rest::handle_heartbeat))
            // Operational endpoints
            .route("/health", get(rest::health_check))
            .route("/ready", get(rest::readiness))
            .route("/live", get(rest::liveness))
            .route("/api-docs/openapi.json", get(rest::openapi))
            .with_state(state);

        let app = if self.base_path.is_empty() {
            api
        } else {
            Router::new().nest(&self.base_path, api)
        };

        app.layer(CompressionLayer::new())
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
    }

    /// Start the HTTP REST server.
    pub async fn start_http(&self) -> anyhow::Result<()> {
        let app = self.router();
        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.api.http_port);

        info!(addr = %addr, base_path = %self.base_path, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }

    /// Start the metrics server on a separate port.
    pub async fn start_metrics(&self) -> anyhow::Result<()> {
        let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
        builder
            .with_http_listener(SocketAddr::new(
                self.config.api.host.parse()?,
                self.config.metrics.port,
            ))
            .install()?;

        info!(port = self.config.metrics.port, "Metrics exporter started");
        Ok(())
    }
}
