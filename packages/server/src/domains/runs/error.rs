use thiserror::Error;

/// Failure kinds surfaced by the run store.
///
/// Each variant maps to a distinct HTTP status at the boundary; see
/// `server::error`.
#[derive(Error, Debug)]
pub enum RunStoreError {
    #[error("run not found")]
    NotFound,

    #[error("no run available to lease")]
    NoRunAvailable,

    #[error("lease token does not match any attempt for this run")]
    InvalidLeaseToken,

    #[error("conflicting state transition: {0}")]
    LeaseConflict(String),

    #[error("attempt is no longer active")]
    AttemptNotActive,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
