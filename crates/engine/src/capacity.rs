//! Per-group occupancy: total assignments and those still holding a slot.

use chrono::{DateTime, Utc};
use cohort_core::experiment::ExperimentConfig;
use std::sync::Arc;

use crate::repository::{ParticipantRepository, RepositoryResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GroupCounts {
    /// Completed participants plus those seen inside the heartbeat window.
    pub active: u64,
    /// Every participant ever assigned to the group.
    pub total: u64,
}

#[derive(Clone)]
pub struct CapacityCounter {
    repository: Arc<dyn ParticipantRepository>,
}

impl CapacityCounter {
    pub fn new(repository: Arc<dyn ParticipantRepository>) -> Self {
        Self { repository }
    }

    /// Cutoff for "active" given the experiment's heartbeat window.
    pub fn active_since(config: &ExperimentConfig, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        config.heartbeat_window().map(|window| now - window)
    }

    pub async fn counts(
        &self,
        experiment_id: &str,
        group: &str,
        active_since: Option<DateTime<Utc>>,
    ) -> RepositoryResult<GroupCounts> {
        let total = self.repository.count(experiment_id, group, None).await?;
        let active = match active_since {
            Some(cutoff) => {
                self.repository
                    .count(experiment_id, group, Some(cutoff))
                    .await?
            }
            None => total,
        };
        Ok(GroupCounts { active, total })
    }
}
