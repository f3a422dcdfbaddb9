//! Bearer-token authentication for teams and runners.

pub mod identity;
pub mod models;

pub use identity::{resolve_bearer, AuthIdentity, RunnerIdentity, TeamIdentity};
pub use models::TokenRole;
