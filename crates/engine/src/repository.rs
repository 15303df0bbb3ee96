//! Participant persistence seam and the in-memory store backed by DashMap.
//!
//! Production: implement [`ParticipantRepository`] over a SQL store with a
//! unique index on `(experiment_id, participant_id)` and a transactional
//! count-then-insert for capacity guards.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cohort_core::error::RepositoryError;
use cohort_core::types::{Participant, ParticipantStatus};
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::info;

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Capacity check a store performs atomically with an insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityGuard {
    pub limit: u64,
    /// Liveness cutoff; `None` counts every record as active.
    pub active_since: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait ParticipantRepository: Send + Sync {
    /// Table or collection this store writes to.
    fn table(&self) -> &str;

    async fn find(
        &self,
        experiment_id: &str,
        participant_id: &str,
    ) -> RepositoryResult<Option<Participant>>;

    /// Insert a new record. Fails with `Conflict` when the identity pair
    /// exists and with `CapacityExceeded` when `guard` no longer holds.
    async fn insert(
        &self,
        participant: Participant,
        guard: Option<CapacityGuard>,
    ) -> RepositoryResult<Participant>;

    /// Records for a group. With `active_since`, only completed ones or
    /// those whose heartbeat is at or after the cutoff.
    async fn count(
        &self,
        experiment_id: &str,
        group: &str,
        active_since: Option<DateTime<Utc>>,
    ) -> RepositoryResult<u64>;

    /// Write back progress for an existing record. Progress only moves
    /// forward: a completed record stays completed, and the step index and
    /// heartbeat keep the later of the stored and written values, so a save
    /// from a stale read never undoes a concurrent advance.
    async fn save(&self, participant: &Participant) -> RepositoryResult<()>;
}

type IdentityKey = (String, String);

/// Thread-safe in-memory participant store.
pub struct InMemoryParticipantRepository {
    table: String,
    records: DashMap<IdentityKey, Participant>,
    insert_lock: Mutex<()>,
}

impl InMemoryParticipantRepository {
    pub fn new(table: impl Into<String>) -> Self {
        let table = table.into();
        info!(table = %table, "Participant store initialized (in-memory)");
        Self {
            table,
            records: DashMap::new(),
            insert_lock: Mutex::new(()),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn key(experiment_id: &str, participant_id: &str) -> IdentityKey {
        (experiment_id.to_string(), participant_id.to_string())
    }

    fn count_matching(
        &self,
        experiment_id: &str,
        group: &str,
        active_since: Option<DateTime<Utc>>,
    ) -> u64 {
        self.records
            .iter()
            .filter(|entry| {
                let p = entry.value();
                p.experiment_id == experiment_id
                    && p.condition_group == group
                    && is_active(p, active_since)
            })
            .count() as u64
    }
}

fn is_active(participant: &Participant, active_since: Option<DateTime<Utc>>) -> bool {
    match active_since {
        None => true,
        Some(cutoff) => {
            participant.status == ParticipantStatus::Completed
                || participant.last_heartbeat.map_or(false, |hb| hb >= cutoff)
        }
    }
}

#[async_trait]
impl ParticipantRepository for InMemoryParticipantRepository {
    fn table(&self) -> &str {
        &self.table
    }

    async fn find(
        &self,
        experiment_id: &str,
        participant_id: &str,
    ) -> RepositoryResult<Option<Participant>> {
        Ok(self
            .records
            .get(&Self::key(experiment_id, participant_id))
            .map(|r| r.value().clone()))
    }

    async fn insert(
        &self,
        participant: Participant,
        guard: Option<CapacityGuard>,
    ) -> RepositoryResult<Participant> {
        // Check-then-insert runs under one lock.
        let _guard_lock = self.insert_lock.lock();

        let key = Self::key(&participant.experiment_id, &participant.participant_id);
        if self.records.contains_key(&key) {
            return Err(RepositoryError::Conflict {
                experiment_id: participant.experiment_id,
                participant_id: participant.participant_id,
            });
        }

        if let Some(guard) = guard {
            let active = self.count_matching(
                &participant.experiment_id,
                &participant.condition_group,
                guard.active_since,
            );
            if active >= guard.limit {
                return Err(RepositoryError::CapacityExceeded {
                    experiment_id: participant.experiment_id,
                    group: participant.condition_group,
                });
            }
        }

        self.records.insert(key, participant.clone());
        Ok(participant)
    }

    async fn count(
        &self,
        experiment_id: &str,
        group: &str,
        active_since: Option<DateTime<Utc>>,
    ) -> RepositoryResult<u64> {
        Ok(self.count_matching(experiment_id, group, active_since))
    }

    async fn save(&self, participant: &Participant) -> RepositoryResult<()> {
        let key = Self::key(&participant.experiment_id, &participant.participant_id);
        let mut entry = self
            .records
            .get_mut(&key)
            .ok_or_else(|| RepositoryError::Missing {
                experiment_id: participant.experiment_id.clone(),
                participant_id: participant.participant_id.clone(),
            })?;
        let stored = entry.value_mut();
        if participant.is_completed() {
            stored.status = ParticipantStatus::Completed;
        }
        stored.current_step_index = stored
            .current_step_index
            .max(participant.current_step_index);
        stored.last_heartbeat = stored.last_heartbeat.max(participant.last_heartbeat);
        stored.updated_at = Utc::now();
        Ok(())
    }
}
