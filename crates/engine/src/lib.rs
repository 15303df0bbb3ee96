//! Participant routing engine: access conditions, capacity-aware group
//! assignment and step progression for cohort experiments.

pub mod assignment;
pub mod capacity;
pub mod conditions;
pub mod placeholders;
pub mod progression;
pub mod repository;
pub mod rules;
pub mod service;

pub use conditions::ConditionEvaluator;
pub use repository::{InMemoryParticipantRepository, ParticipantRepository};
pub use rules::RuleChecker;
pub use service::RouterService;
