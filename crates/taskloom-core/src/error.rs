//! Error taxonomy for the taskloom engine.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LoomError>;

#[derive(Error, Debug)]
pub enum LoomError {
    /// The attached workflow has no transition for this (from, to) pair.
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("role '{role}' is not allowed to perform this transition")]
    RoleNotAllowed { role: String },

    #[error("user '{user}' has already requested assignment")]
    AlreadyRequested { user: String },

    #[error("user '{user}' has not requested assignment")]
    NotRequested { user: String },

    /// Optimistic-concurrency conflict that survived the retry budget.
    /// The caller may retry the whole user action.
    #[error("record was modified concurrently, retry the operation")]
    ConcurrentModification,

    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("invalid workflow definition: {0}")]
    InvalidWorkflow(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("channel error: {0}")]
    Channel(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl LoomError {
    /// Client errors are surfaced to the caller verbatim and never retried.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            LoomError::InvalidTransition { .. }
                | LoomError::RoleNotAllowed { .. }
                | LoomError::AlreadyRequested { .. }
                | LoomError::NotRequested { .. }
        )
    }
}
