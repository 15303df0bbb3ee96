//! Core types, configuration and experiment catalog for the cohort router.

pub mod catalog;
pub mod config;
pub mod error;
pub mod experiment;
pub mod types;

pub use catalog::{ExperimentCatalog, ExperimentProvider};
pub use config::AppConfig;
pub use error::{RepositoryError, RouterError, RouterResult};
