use serde::Deserialize;

/// Root service configuration. Loaded from environment variables
/// with the prefix `COHORT_ROUTER__`. Experiment definitions live in a
/// separate JSONC file, see [`crate::catalog`].
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub experiments: ExperimentsConfig,
    #[serde(default)]
    pub rules: RulesConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Path prefix all routes are mounted under. Falls back to the
    /// experiments file's `base_path` when unset.
    #[serde(default)]
    pub base_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct StorageConfig {
    /// Participant table name. Falls back to the experiments file's
    /// `database.table`, then to `participants`.
    #[serde(default)]
    pub table: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExperimentsConfig {
    #[serde(default = "default_experiments_path")]
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RulesConfig {
    /// Per-attempt timeout for `fetch` access-control rules.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

pub const DEFAULT_TABLE: &str = "participants";

// Default functions
fn default_node_id() -> String {
    "router-01".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_metrics_port() -> u16 {
    9091
}
fn default_experiments_path() -> String {
    std::env::var("APP_CONFIG_PATH").unwrap_or_else(|_| "config.jsonc".to_string())
}
fn default_fetch_timeout_secs() -> u64 {
    30
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
            base_path: None,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            port: default_metrics_port(),
        }
    }
}

impl Default for ExperimentsConfig {
    fn default() -> Self {
        Self {
            path: default_experiments_path(),
        }
    }
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            api: ApiConfig::default(),
            metrics: MetricsConfig::default(),
            storage: StorageConfig::default(),
            experiments: ExperimentsConfig::default(),
            rules: RulesConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("COHORT_ROUTER")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Table name after applying the experiments file fallback.
    pub fn table_name(&self, file_table: Option<&str>) -> String {
        self.storage
            .table
            .as_deref()
            .or(file_table)
            .unwrap_or(DEFAULT_TABLE)
            .to_string()
    }

    /// Route prefix after applying the experiments file fallback.
    /// Empty means routes are mounted at the root.
    pub fn base_path(&self, file_base_path: Option<&str>) -> String {
        let raw = self
            .api
            .base_path
            .as_deref()
            .or(file_base_path)
            .unwrap_or("");
        let trimmed = raw.trim_end_matches('/');
        if trimmed.is_empty() || trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{trimmed}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.api.http_port, 8080);
        assert_eq!(config.metrics.port, 9091);
        assert_eq!(config.rules.fetch_timeout_secs, 30);
        assert!(config.storage.table.is_none());
    }

    #[test]
    fn test_table_name_precedence() {
        let mut config = AppConfig::default();
        assert_eq!(config.table_name(None), "participants");
        assert_eq!(config.table_name(Some("from_file")), "from_file");

        config.storage.table = Some("from_env".to_string());
        assert_eq!(config.table_name(Some("from_file")), "from_env");
    }

    #[test]
    fn test_base_path_normalization() {
        let mut config = AppConfig::default();
        assert_eq!(config.base_path(None), "");
        assert_eq!(config.base_path(Some("/")), "");
        assert_eq!(config.base_path(Some("router/")), "/router");

        config.api.base_path = Some("/api/".to_string());
        assert_eq!(config.base_path(Some("/ignored")), "/api");
    }
}
