use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque key/value bag supplied by callers and captured on assignment.
pub type Properties = serde_json::Map<String, serde_json::Value>;

/// One participant's position inside one experiment.
/// Unique per `(experiment_id, participant_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: Uuid,
    pub experiment_id: String,
    pub participant_id: String,
    pub condition_group: String,
    pub current_step_index: usize,
    pub status: ParticipantStatus,
    #[serde(default)]
    pub properties: Properties,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Participant {
    /// Fresh record at the first step of `group`.
    pub fn new(
        experiment_id: impl Into<String>,
        participant_id: impl Into<String>,
        group: impl Into<String>,
        properties: Properties,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            experiment_id: experiment_id.into(),
            participant_id: participant_id.into(),
            condition_group: group.into(),
            current_step_index: 0,
            status: ParticipantStatus::Assigned,
            properties,
            last_heartbeat: Some(now),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == ParticipantStatus::Completed
    }

    pub fn touch_heartbeat(&mut self) {
        let now = Utc::now();
        self.last_heartbeat = Some(now);
        self.updated_at = now;
    }

    /// Stored properties overlaid with per-request ones. Request keys win.
    pub fn merged_properties(&self, request: &Properties) -> Properties {
        let mut merged = self.properties.clone();
        for (key, value) in request {
            merged.insert(key.clone(), value.clone());
        }
        merged
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    Assigned,
    Completed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Ok,
    Error,
}

/// Structured result of a router operation: the JSON body plus the HTTP
/// status the shell should answer with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct RouteOutcome {
    pub status: OutcomeStatus,
    pub url: Option<String>,
    pub message: Option<String>,
    #[serde(skip)]
    pub http_status: u16,
}

impl RouteOutcome {
    pub fn redirect(url: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Ok,
            url: Some(url.into()),
            message: None,
            http_status: 200,
        }
    }

    pub fn completed() -> Self {
        Self {
            status: OutcomeStatus::Ok,
            url: None,
            message: Some("Experiment completed".to_string()),
            http_status: 200,
        }
    }

    /// Successful answer that still carries a message, e.g. "Full".
    pub fn notice(url: Option<String>, message: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Ok,
            url,
            message: Some(message.into()),
            http_status: 200,
        }
    }

    pub fn error(http_status: u16, message: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Error,
            url: None,
            message: Some(message.into()),
            http_status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_participant_starts_assigned() {
        let p = Participant::new("exp", "p-1", "A", Properties::new());
        assert_eq!(p.current_step_index, 0);
        assert_eq!(p.status, ParticipantStatus::Assigned);
        assert!(p.last_heartbeat.is_some());
        assert!(!p.is_completed());
    }

    #[test]
    fn test_merged_properties_request_wins() {
        let mut stored = Properties::new();
        stored.insert("age".into(), json!(25));
        stored.insert("lang".into(), json!("ja"));
        let p = Participant::new("exp", "p-1", "A", stored);

        let mut request = Properties::new();
        request.insert("lang".into(), json!("en"));

        let merged = p.merged_properties(&request);
        assert_eq!(merged["age"], json!(25));
        assert_eq!(merged["lang"], json!("en"));
    }

    #[test]
    fn test_outcome_serializes_without_http_status() {
        let body = serde_json::to_value(RouteOutcome::completed()).unwrap();
        assert_eq!(
            body,
            json!({"status": "ok", "url": null, "message": "Experiment completed"})
        );
    }
}
