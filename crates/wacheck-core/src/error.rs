//! Error taxonomy shared by the session manager, the cache and the pipeline.

use thiserror::Error;

use crate::session::SessionState;

/// Error type for lookup operations
///
/// `Clone` because one coalesced failure is delivered to every waiter of
/// an in-flight slot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    /// The raw identifier is not a non-empty string of ASCII digits
    #[error("invalid identifier: {input:?}")]
    Validation { input: String },

    /// The session has not reached (or has left) the serving state
    #[error("session not ready (state: {state})")]
    NotReady { state: SessionState },

    /// An upstream call into the session client failed
    #[error("upstream query failed: {cause}")]
    Query { cause: String },

    /// The session could not be established
    #[error("session setup failed: {detail}")]
    SetupFailure { detail: String },
}

impl LookupError {
    /// Build a query error from any lower-level failure, keeping the cause chain
    pub fn query(err: impl std::fmt::Display) -> Self {
        LookupError::Query {
            cause: format!("{:#}", err),
        }
    }

    /// Stable category string used in responses and logs
    pub fn category(&self) -> &'static str {
        match self {
            LookupError::Validation { .. } => "validation",
            LookupError::NotReady { .. } => "not_ready",
            LookupError::Query { .. } => "query",
            LookupError::SetupFailure { .. } => "setup_failure",
        }
    }
}
