//! Experiment definitions: groups, steps, access-control condition trees.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{RouterError, RouterResult};

/// One configured experiment as served by the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    /// Filled from the key in the experiments file.
    #[serde(skip)]
    pub id: String,
    #[serde(default, alias = "enable")]
    pub enabled: bool,
    pub config: ExperimentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    #[serde(default)]
    pub access_control: Option<AccessControl>,
    #[serde(default)]
    pub assignment_strategy: AssignmentStrategy,
    /// Liveness window in seconds; `<= 0` disables stale-slot reclamation.
    #[serde(default)]
    pub heartbeat_intervalsec: i64,
    #[serde(default)]
    pub fallback_url: Option<String>,
    /// Groups in declaration order; order matters for tie-breaking.
    pub groups: IndexMap<String, GroupConfig>,
}

impl ExperimentConfig {
    pub fn group(&self, name: &str) -> Option<&GroupConfig> {
        self.groups.get(name)
    }

    pub fn heartbeat_window(&self) -> Option<chrono::Duration> {
        (self.heartbeat_intervalsec >= 1)
            .then(|| chrono::Duration::seconds(self.heartbeat_intervalsec))
    }

    pub fn condition(&self) -> Option<&Condition> {
        self.access_control.as_ref()?.condition.as_ref()
    }

    pub fn deny_redirect(&self) -> Option<String> {
        self.access_control.as_ref()?.deny_redirect.clone()
    }

    pub fn validate(&self, experiment_id: &str) -> RouterResult<()> {
        if self.groups.is_empty() {
            return Err(RouterError::Config(format!(
                "experiment {experiment_id} defines no groups"
            )));
        }
        for (name, group) in &self.groups {
            if group.steps.is_empty() {
                return Err(RouterError::Config(format!(
                    "group {name} in experiment {experiment_id} defines no steps"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessControl {
    #[serde(default)]
    pub condition: Option<Condition>,
    #[serde(default)]
    pub deny_redirect: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupConfig {
    pub limit: u64,
    pub steps: Vec<Step>,
}

/// How a new participant's group is picked among groups with free capacity.
/// Unknown names fall back to `Random`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AssignmentStrategy {
    /// Fewest active participants, then fewest total.
    Minimum,
    #[default]
    Random,
}

impl From<String> for AssignmentStrategy {
    fn from(value: String) -> Self {
        match value.as_str() {
            "minimum" => AssignmentStrategy::Minimum,
            _ => AssignmentStrategy::Random,
        }
    }
}

impl From<AssignmentStrategy> for String {
    fn from(value: AssignmentStrategy) -> Self {
        match value {
            AssignmentStrategy::Minimum => "minimum".to_string(),
            AssignmentStrategy::Random => "random".to_string(),
        }
    }
}

/// A page in a group's funnel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Step {
    Url(String),
    Detailed {
        url: String,
        /// Parameters the visited URL must carry beyond those in `url`.
        #[serde(default)]
        query: BTreeMap<String, String>,
    },
}

impl Step {
    pub fn url(&self) -> &str {
        match self {
            Step::Url(url) => url,
            Step::Detailed { url, .. } => url,
        }
    }

    pub fn implicit_query(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            Step::Url(_) => None,
            Step::Detailed { query, .. } => Some(query),
        }
    }
}

/// Access-control tree. A node holding several keys resolves in the order
/// `all_of`, `any_of`, `not`, leaf rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Condition {
    AllOf { all_of: Vec<Condition> },
    AnyOf { any_of: Vec<Condition> },
    Not { not: Box<Condition> },
    Rule(Rule),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Rule {
    Regex(RegexRule),
    Fetch(FetchRule),
}

impl Rule {
    pub fn negate(&self) -> bool {
        match self {
            Rule::Regex(rule) => rule.negate,
            Rule::Fetch(rule) => rule.negate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegexRule {
    pub field: String,
    pub pattern: String,
    #[serde(default)]
    pub negate: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchRule {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: IndexMap<String, serde_json::Value>,
    #[serde(default)]
    pub body: serde_json::Value,
    #[serde(default)]
    pub expected_status: Option<u16>,
    #[serde(default)]
    pub negate: bool,
}

fn default_method() -> String {
    "GET".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_condition_tree_parses() {
        let raw = json!({
            "all_of": [
                {"type": "regex", "field": "age", "pattern": "^2[0-9]$"},
                {"not": {"type": "regex", "field": "country", "pattern": "XX", "negate": true}},
                {"any_of": [
                    {"type": "fetch", "url": "https://check.example/${id}", "expected_status": 204}
                ]}
            ]
        });
        let condition: Condition = serde_json::from_value(raw).unwrap();
        let Condition::AllOf { all_of } = condition else {
            panic!("expected all_of");
        };
        assert_eq!(all_of.len(), 3);
        assert!(matches!(&all_of[0], Condition::Rule(Rule::Regex(r)) if r.field == "age" && !r.negate));
        match &all_of[1] {
            Condition::Not { not } => assert!(matches!(not.as_ref(), Condition::Rule(r) if r.negate())),
            other => panic!("expected not, got {other:?}"),
        }
        match &all_of[2] {
            Condition::AnyOf { any_of } => match &any_of[0] {
                Condition::Rule(Rule::Fetch(f)) => {
                    assert_eq!(f.method, "GET");
                    assert_eq!(f.expected_status, Some(204));
                    assert!(f.body.is_null());
                }
                other => panic!("expected fetch, got {other:?}"),
            },
            other => panic!("expected any_of, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_rule_type_rejected() {
        let raw = json!({"type": "geoip", "field": "ip"});
        assert!(serde_json::from_value::<Condition>(raw).is_err());
    }

    #[test]
    fn test_strategy_parsing() {
        let parse = |s: &str| serde_json::from_value::<AssignmentStrategy>(json!(s)).unwrap();
        assert_eq!(parse("minimum"), AssignmentStrategy::Minimum);
        assert_eq!(parse("random"), AssignmentStrategy::Random);
        assert_eq!(parse("minimum_count"), AssignmentStrategy::Random);
        assert_eq!(AssignmentStrategy::default(), AssignmentStrategy::Random);
    }

    #[test]
    fn test_steps_accept_both_shapes() {
        let steps: Vec<Step> = serde_json::from_value(json!([
            "/intro",
            {"url": "/survey?page=1", "query": {"done": "1"}}
        ]))
        .unwrap();
        assert_eq!(steps[0].url(), "/intro");
        assert!(steps[0].implicit_query().is_none());
        assert_eq!(steps[1].url(), "/survey?page=1");
        assert_eq!(steps[1].implicit_query().unwrap()["done"], "1");
    }

    #[test]
    fn test_experiment_accepts_enable_alias() {
        let experiment: Experiment = serde_json::from_value(json!({
            "enable": true,
            "config": {"groups": {"A": {"limit": 1, "steps": ["/a"]}}}
        }))
        .unwrap();
        assert!(experiment.enabled);
        assert!(experiment.config.heartbeat_window().is_none());
        assert!(experiment.config.validate("exp").is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_steps() {
        let config: ExperimentConfig = serde_json::from_value(json!({
            "groups": {"A": {"limit": 1, "steps": []}}
        }))
        .unwrap();
        assert!(matches!(config.validate("exp"), Err(RouterError::Config(_))));
    }
}
