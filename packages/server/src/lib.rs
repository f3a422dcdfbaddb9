//! MiniTower control plane.
//!
//! A minimal job-orchestration core: runs are submitted against immutable
//! app versions, workers lease them over HTTP, execute, and stream back logs
//! and results. Correctness lives in the guarded state transitions of
//! `domains::runs`; the HTTP layer in `server` is a thin mapping over them.

pub mod common;
pub mod config;
pub mod domains;
pub mod server;

pub use config::Config;
