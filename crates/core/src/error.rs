use thiserror::Error;

pub type RouterResult<T> = Result<T, RouterError>;

#[derive(Error, Debug)]
pub enum RouterError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures reported by a participant store.
///
/// `Conflict` and `CapacityExceeded` are expected under concurrent assigns and
/// are recovered by the router; `Unavailable` is an outage and propagates.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("participant {participant_id} already exists in experiment {experiment_id}")]
    Conflict {
        experiment_id: String,
        participant_id: String,
    },

    #[error("group {group} in experiment {experiment_id} is at capacity")]
    CapacityExceeded {
        experiment_id: String,
        group: String,
    },

    #[error("participant {participant_id} is not stored in experiment {experiment_id}")]
    Missing {
        experiment_id: String,
        participant_id: String,
    },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}
