//! Read models for the catalog entities the scheduling core consumes.
//! CRUD for these lives outside the core.

pub mod models;

pub use models::{App, AppVersion, Environment};
