pub mod attempt;
pub mod log_row;
pub mod run;

pub use attempt::{AttemptLiveness, ResultOutcome, RunAttempt};
pub use log_row::{LogRowInput, RunLogRow};
pub use run::{NewRun, Run};
