//! schema_check_postgres: sqlx adapter for the schema check engine.

pub mod catalog;
pub mod sqlx_types;
pub mod store;

pub use store::{PgCheckTx, PgStore};
