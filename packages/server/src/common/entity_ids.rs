//! Typed ID definitions for all domain entities.
//!
//! One alias per entity, so IDs of different entities are incompatible at
//! compile time.

pub use super::id::Id;

// ============================================================================
// Entity marker types
// ============================================================================

/// Marker type for Team entities.
pub struct Team;

/// Marker type for App entities.
pub struct App;

/// Marker type for Environment entities (worker routing labels).
pub struct Environment;

/// Marker type for AppVersion entities (immutable code artifacts).
pub struct AppVersion;

/// Marker type for Run entities.
pub struct Run;

/// Marker type for RunAttempt entities.
pub struct RunAttempt;

/// Marker type for Runner entities (workers).
pub struct Runner;

/// Marker type for ApiToken entities.
pub struct ApiToken;

// ============================================================================
// Type aliases - the primary API
// ============================================================================

/// Typed ID for Team entities.
pub type TeamId = Id<Team>;

/// Typed ID for App entities.
pub type AppId = Id<App>;

/// Typed ID for Environment entities.
pub type EnvironmentId = Id<Environment>;

/// Typed ID for AppVersion entities.
pub type VersionId = Id<AppVersion>;

/// Typed ID for Run entities.
pub type RunId = Id<Run>;

/// Typed ID for RunAttempt entities.
pub type AttemptId = Id<RunAttempt>;

/// Typed ID for Runner entities.
pub type RunnerId = Id<Runner>;

/// Typed ID for ApiToken entities.
pub type TokenId = Id<ApiToken>;
