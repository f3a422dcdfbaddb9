//! Shared primitives: typed IDs and token digests.

pub mod entity_ids;
pub mod hash;
pub mod id;

pub use entity_ids::{
    AppId, AttemptId, EnvironmentId, RunId, RunnerId, TeamId, TokenId, VersionId,
};
pub use hash::token_digest;
