//! Error types for the alerting engine.
//!
//! Errors are classified by how callers should react:
//! - NotFound: surfaced to the caller, no retry
//! - Conflict: benign race outcome, swallowed or surfaced depending on site
//! - ConfigurationInvalid: rejected before any evaluation runs
//! - Delivery: recorded on the notification, never thrown past the dispatcher

use thiserror::Error;

use crate::db::DbError;

/// Error type shared by the engine's evaluation, store, and dispatch surfaces.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid configuration: {0}")]
    ConfigurationInvalid(String),

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error(transparent)]
    Db(#[from] DbError),
}

impl EngineError {
    /// True for the duplicate-active-alert / double-transition outcomes the
    /// evaluator treats as a no-op.
    pub fn is_conflict(&self) -> bool {
        matches!(self, EngineError::Conflict(_))
    }

    /// True when the referenced project/configuration/alert is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::NotFound(_))
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        EngineError::Db(DbError::Sqlite(err))
    }
}
