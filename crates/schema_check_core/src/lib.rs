//! schema_check_core: federated schema check and composition engine.
//!
//! Pure domain logic. Storage is reached through the traits in [`ports`];
//! `schema_check_postgres` implements them over sqlx and [`memory`] keeps
//! everything in process for tests and local runs.

pub mod audit;
pub mod composer;
pub mod config;
pub mod diff;
pub mod error;
pub mod governance;
pub mod jobs;
pub mod labels;
pub mod memory;
pub mod normalize;
pub mod orchestrator;
pub mod ports;
pub mod principal;
pub mod resolver;
pub mod types;

pub use error::{Result, SchemaCheckError};
pub use orchestrator::{CheckService, CheckServiceImpl};
