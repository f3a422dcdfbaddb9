//! The run-scheduling core: runs, attempts, log ingest, lease dispatch, and
//! the expiry reaper.

pub mod dispatcher;
pub mod error;
pub mod lease;
pub mod models;
pub mod reaper;
pub mod status;

pub use error::RunStoreError;
pub use status::{AttemptStatus, LogStream, ReportedOutcome, RunStatus};
