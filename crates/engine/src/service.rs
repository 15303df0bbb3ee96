//! Router service: orchestrates access control, group assignment and step
//! progression for the `assign`, `next` and `heartbeat` operations.
//!
//! Business conditions (unknown experiment, denied, full, unmatched URL...)
//! come back as a [`RouteOutcome`]. Only store failures surface as `Err`.

use chrono::Utc;
use cohort_core::catalog::ExperimentProvider;
use cohort_core::error::{RepositoryError, RouterResult};
use cohort_core::experiment::ExperimentConfig;
use cohort_core::types::{Participant, ParticipantStatus, Properties, RouteOutcome};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::assignment::{eligible_groups, select};
use crate::capacity::CapacityCounter;
use crate::conditions::ConditionEvaluator;
use crate::progression::{advance, find_matching_step, position, Position};
use crate::repository::{CapacityGuard, ParticipantRepository};
use crate::rules::RuleChecker;

#[derive(Clone)]
pub struct RouterService {
    experiments: Arc<dyn ExperimentProvider>,
    repository: Arc<dyn ParticipantRepository>,
    evaluator: ConditionEvaluator,
    counter: CapacityCounter,
}

impl std::fmt::Debug for RouterService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterService")
            .field("table", &self.repository.table())
            .finish()
    }
}

/// 400 outcome naming every required field that is missing or empty.
pub fn missing_parameters(fields: &[(&str, Option<&str>)]) -> Option<RouteOutcome> {
    let missing: Vec<&str> = fields
        .iter()
        .filter(|(_, value)| value.map_or(true, str::is_empty))
        .map(|(name, _)| *name)
        .collect();
    if missing.is_empty() {
        None
    } else {
        Some(RouteOutcome::error(
            400,
            format!("Missing parameters: {}", missing.join(", ")),
        ))
    }
}

impl RouterService {
    pub fn new(
        experiments: Arc<dyn ExperimentProvider>,
        repository: Arc<dyn ParticipantRepository>,
        checker: RuleChecker,
    ) -> Self {
        Self {
            experiments,
            counter: CapacityCounter::new(repository.clone()),
            repository,
            evaluator: ConditionEvaluator::new(checker),
        }
    }

    /// Place a participant in a group, or resume them where they left off.
    pub async fn assign(
        &self,
        experiment_id: &str,
        participant_id: &str,
        properties: Properties,
    ) -> RouterResult<RouteOutcome> {
        let Some(experiment) = self.experiments.experiment(experiment_id) else {
            warn!(experiment_id, "Assign for unknown experiment");
            return Ok(RouteOutcome::error(404, "Experiment ID not found"));
        };
        if !experiment.enabled {
            return Ok(RouteOutcome::error(403, "Experiment is disabled"));
        }
        let config = &experiment.config;

        if let Some(participant) = self.repository.find(experiment_id, participant_id).await? {
            return self.resume(config, participant, &properties).await;
        }

        if let Some(condition) = config.condition() {
            if !self.evaluator.evaluate(condition, &properties).await {
                info!(experiment_id, participant_id, "Access denied");
                metrics::counter!("router.assign.denied").increment(1);
                return Ok(RouteOutcome::notice(config.deny_redirect(), "Access denied"));
            }
        }

        // A guarded insert can lose a race for the last slot; recount and
        // reselect, at most once per group.
        for _ in 0..=config.groups.len() {
            let active_since = CapacityCounter::active_since(config, Utc::now());
            let candidates =
                eligible_groups(&self.counter, experiment_id, config, active_since).await?;
            let chosen = {
                let mut rng = rand::thread_rng();
                select(config.assignment_strategy, &candidates, &mut rng)
                    .map(|c| (c.group.clone(), c.limit))
            };
            let Some((group, limit)) = chosen else {
                break;
            };

            let participant =
                Participant::new(experiment_id, participant_id, group.clone(), properties.clone());
            let guard = CapacityGuard {
                limit,
                active_since,
            };
            match self.repository.insert(participant, Some(guard)).await {
                Ok(participant) => {
                    info!(experiment_id, participant_id, group = %group, "Participant assigned");
                    metrics::counter!("router.assign.created").increment(1);
                    return self.respond(config, participant, &properties).await;
                }
                Err(RepositoryError::Conflict { .. }) => {
                    debug!(experiment_id, participant_id, "Concurrent assign, resuming");
                    let existing = self
                        .repository
                        .find(experiment_id, participant_id)
                        .await?
                        .ok_or_else(|| RepositoryError::Missing {
                            experiment_id: experiment_id.to_string(),
                            participant_id: participant_id.to_string(),
                        })?;
                    return self.resume(config, existing, &properties).await;
                }
                Err(RepositoryError::CapacityExceeded { .. }) => {
                    debug!(experiment_id, group = %group, "Group filled during assign, reselecting");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }

        info!(experiment_id, participant_id, "All groups full");
        metrics::counter!("router.assign.full").increment(1);
        Ok(RouteOutcome::notice(config.fallback_url.clone(), "Full"))
    }

    /// Advance past the step matching `current_url`.
    pub async fn next(
        &self,
        experiment_id: &str,
        participant_id: &str,
        current_url: &str,
        properties: Properties,
    ) -> RouterResult<RouteOutcome> {
        let Some(experiment) = self.experiments.experiment(experiment_id) else {
            warn!(experiment_id, "Next for unknown experiment");
            return Ok(RouteOutcome::error(500, "Config not found"));
        };
        let config = &experiment.config;

        let Some(mut participant) = self.repository.find(experiment_id, participant_id).await?
        else {
            return Ok(RouteOutcome::error(404, "Participant not found"));
        };
        participant.touch_heartbeat();
        self.repository.save(&participant).await?;

        if participant.is_completed() {
            return self.respond(config, participant, &properties).await;
        }

        let Some(group) = config.group(&participant.condition_group) else {
            return Ok(missing_group(&participant));
        };
        let merged = participant.merged_properties(&properties);
        let from = participant.current_step_index;

        match find_matching_step(&group.steps, from, current_url, &merged) {
            Some(matched) => {
                advance(&mut participant, matched);
                self.repository.save(&participant).await?;
                info!(
                    experiment_id,
                    participant_id,
                    matched,
                    from,
                    to = participant.current_step_index,
                    "Participant advanced"
                );
                metrics::counter!("router.next.advanced").increment(1);
                self.respond(config, participant, &properties).await
            }
            None => {
                warn!(experiment_id, participant_id, current_url, "No matching step");
                metrics::counter!("router.next.unmatched").increment(1);
                Ok(RouteOutcome::error(
                    404,
                    "No matching step found for the current URL.",
                ))
            }
        }
    }

    /// Refresh liveness. Returns whether a participant was found.
    pub async fn heartbeat(&self, experiment_id: &str, participant_id: &str) -> RouterResult<bool> {
        metrics::counter!("router.heartbeat").increment(1);
        match self.repository.find(experiment_id, participant_id).await? {
            Some(mut participant) => {
                participant.touch_heartbeat();
                self.repository.save(&participant).await?;
                Ok(true)
            }
            None => {
                debug!(experiment_id, participant_id, "Heartbeat for unknown participant");
                Ok(false)
            }
        }
    }

    async fn resume(
        &self,
        config: &ExperimentConfig,
        mut participant: Participant,
        properties: &Properties,
    ) -> RouterResult<RouteOutcome> {
        info!(
            experiment_id = %participant.experiment_id,
            participant_id = %participant.participant_id,
            step = participant.current_step_index,
            "Resume participant"
        );
        metrics::counter!("router.assign.resumed").increment(1);
        participant.touch_heartbeat();
        self.repository.save(&participant).await?;
        self.respond(config, participant, properties).await
    }

    /// Answer with the participant's current step, completing them when
    /// none remain.
    async fn respond(
        &self,
        config: &ExperimentConfig,
        mut participant: Participant,
        properties: &Properties,
    ) -> RouterResult<RouteOutcome> {
        let Some(group) = config.group(&participant.condition_group) else {
            return Ok(missing_group(&participant));
        };
        let merged = participant.merged_properties(properties);

        match position(&group.steps, &participant, &merged) {
            Position::Step(url) => Ok(RouteOutcome::redirect(url)),
            Position::Finished => {
                if !participant.is_completed() {
                    participant.status = ParticipantStatus::Completed;
                    self.repository.save(&participant).await?;
                    info!(
                        experiment_id = %participant.experiment_id,
                        participant_id = %participant.participant_id,
                        "Participant completed"
                    );
                    metrics::counter!("router.next.completed").increment(1);
                }
                Ok(RouteOutcome::completed())
            }
        }
    }
}

fn missing_group(participant: &Participant) -> RouteOutcome {
    warn!(
        experiment_id = %participant.experiment_id,
        group = %participant.condition_group,
        "Participant's group is missing from the experiment config"
    );
    RouteOutcome::error(500, "Group not found in experiment config")
}
