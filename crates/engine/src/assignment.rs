//! Group selection among groups that still have free capacity.

use chrono::{DateTime, Utc};
use cohort_core::experiment::{AssignmentStrategy, ExperimentConfig};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::capacity::{CapacityCounter, GroupCounts};
use crate::repository::RepositoryResult;

/// A group with at least one free slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub group: String,
    pub limit: u64,
    pub counts: GroupCounts,
}

/// Groups whose active count is below their limit, in configuration order.
pub async fn eligible_groups(
    counter: &CapacityCounter,
    experiment_id: &str,
    config: &ExperimentConfig,
    active_since: Option<DateTime<Utc>>,
) -> RepositoryResult<Vec<Candidate>> {
    let mut candidates = Vec::with_capacity(config.groups.len());
    for (group, group_config) in &config.groups {
        let counts = counter.counts(experiment_id, group, active_since).await?;
        if counts.active < group_config.limit {
            candidates.push(Candidate {
                group: group.clone(),
                limit: group_config.limit,
                counts,
            });
        }
    }
    Ok(candidates)
}

/// Pick a target group. `None` means every group is full.
///
/// `Minimum` takes the fewest active participants, breaking ties on the
/// fewest total assignments, then on configuration order.
pub fn select<'a, R: Rng + ?Sized>(
    strategy: AssignmentStrategy,
    candidates: &'a [Candidate],
    rng: &mut R,
) -> Option<&'a Candidate> {
    match strategy {
        AssignmentStrategy::Minimum => candidates
            .iter()
            .min_by_key(|c| (c.counts.active, c.counts.total)),
        AssignmentStrategy::Random => candidates.choose(rng),
    }
}
