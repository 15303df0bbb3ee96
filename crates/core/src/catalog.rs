//! Experiment catalog: the read-only settings provider the router consults
//! on every request. Loaded once from a JSON-with-comments file.

use indexmap::IndexMap;
use regex::Regex;
use serde::Deserialize;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tracing::info;

use crate::error::{RouterError, RouterResult};
use crate::experiment::Experiment;

/// Lookup of experiment definitions by id.
pub trait ExperimentProvider: Send + Sync {
    fn experiment(&self, id: &str) -> Option<Arc<Experiment>>;
}

#[derive(Debug, Deserialize, Default)]
struct ExperimentsFile {
    #[serde(default)]
    base_path: Option<String>,
    #[serde(default)]
    database: Option<DatabaseSection>,
    #[serde(default)]
    experiments: IndexMap<String, Experiment>,
}

#[derive(Debug, Deserialize, Default)]
struct DatabaseSection {
    #[serde(default)]
    table: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ExperimentCatalog {
    experiments: IndexMap<String, Arc<Experiment>>,
    base_path: Option<String>,
    table: Option<String>,
}

impl ExperimentCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace an experiment under `id`.
    pub fn with_experiment(mut self, id: impl Into<String>, mut experiment: Experiment) -> Self {
        let id = id.into();
        experiment.id = id.clone();
        self.experiments.insert(id, Arc::new(experiment));
        self
    }

    pub fn load_file(path: impl AsRef<Path>) -> RouterResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let catalog = Self::from_jsonc(&raw)?;
        info!(
            path = %path.display(),
            experiments = catalog.experiments.len(),
            "Experiment catalog loaded"
        );
        Ok(catalog)
    }

    pub fn from_jsonc(raw: &str) -> RouterResult<Self> {
        let file: ExperimentsFile = serde_json::from_str(&strip_comments(raw))?;

        let mut experiments = IndexMap::with_capacity(file.experiments.len());
        for (id, mut experiment) in file.experiments {
            experiment.config.validate(&id)?;
            experiment.id = id.clone();
            experiments.insert(id, Arc::new(experiment));
        }

        Ok(Self {
            experiments,
            base_path: file.base_path,
            table: file.database.and_then(|db| db.table),
        })
    }

    pub fn base_path(&self) -> Option<&str> {
        self.base_path.as_deref()
    }

    pub fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }

    pub fn len(&self) -> usize {
        self.experiments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.experiments.is_empty()
    }
}

impl ExperimentProvider for ExperimentCatalog {
    fn experiment(&self, id: &str) -> Option<Arc<Experiment>> {
        self.experiments.get(id).cloned()
    }
}

/// Drop `// line` and `/* block */` comments that sit outside string literals.
pub fn strip_comments(raw: &str) -> String {
    static COMMENTS: OnceLock<Regex> = OnceLock::new();
    let re = COMMENTS.get_or_init(|| {
        Regex::new(r#"("(?:\\.|[^"\\])*")|//[^\n]*|/\*(?s:.*?)\*/"#)
            .expect("comment pattern is valid")
    });
    re.replace_all(raw, |caps: &regex::Captures<'_>| {
        caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default()
    })
    .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        // service-level settings
        "base_path": "/router",
        "database": { "url": "sqlite://:memory:", "table": "participants_test" },
        /* experiments
           keyed by id */
        "experiments": {
            "exp_1": {
                "enable": true,
                "config": {
                    "assignment_strategy": "minimum",
                    "heartbeat_intervalsec": 300,
                    "fallback_url": "https://example.com/full", // trailing comment
                    "groups": {
                        "A": { "limit": 10, "steps": ["https://example.com/a?x=1"] },
                        "B": { "limit": 10, "steps": [{ "url": "https://example.com/b" }] }
                    }
                }
            },
            "exp_off": {
                "enable": false,
                "config": { "groups": { "A": { "limit": 1, "steps": ["/a"] } } }
            }
        }
    }"#;

    #[test]
    fn test_load_jsonc() {
        let catalog = ExperimentCatalog::from_jsonc(SAMPLE).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.base_path(), Some("/router"));
        assert_eq!(catalog.table(), Some("participants_test"));

        let exp = catalog.experiment("exp_1").unwrap();
        assert_eq!(exp.id, "exp_1");
        assert!(exp.enabled);
        let groups: Vec<&str> = exp.config.groups.keys().map(String::as_str).collect();
        assert_eq!(groups, vec!["A", "B"]);
        assert_eq!(
            exp.config.fallback_url.as_deref(),
            Some("https://example.com/full")
        );

        assert!(!catalog.experiment("exp_off").unwrap().enabled);
        assert!(catalog.experiment("missing").is_none());
    }

    #[test]
    fn test_strip_comments_keeps_strings() {
        let raw = r#"{"url": "https://example.com/a//b", "x": "/* not a comment */"} // tail"#;
        let stripped = strip_comments(raw);
        let value: serde_json::Value = serde_json::from_str(&stripped).unwrap();
        assert_eq!(value["url"], "https://example.com/a//b");
        assert_eq!(value["x"], "/* not a comment */");
    }

    #[test]
    fn test_invalid_experiment_rejected() {
        let raw = r#"{"experiments": {"bad": {"enable": true, "config": {"groups": {}}}}}"#;
        assert!(matches!(
            ExperimentCatalog::from_jsonc(raw),
            Err(RouterError::Config(_))
        ));
    }

    #[test]
    fn test_example_config_loads() {
        let raw = include_str!("../../../config.example.jsonc");
        let catalog = ExperimentCatalog::from_jsonc(raw).unwrap();
        assert_eq!(catalog.table(), Some("participants"));
        assert_eq!(catalog.base_path(), Some(""));

        let exp = catalog.experiment("onboarding_survey").unwrap();
        assert!(exp.config.condition().is_some());
        assert_eq!(exp.config.group("treatment").unwrap().steps.len(), 4);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = ExperimentCatalog::load_file("/nonexistent/config.jsonc");
        assert!(matches!(result, Err(RouterError::Io(_))));
    }
}
