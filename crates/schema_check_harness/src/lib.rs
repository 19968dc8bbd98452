//! Test harness for the schema check engine.
//!
//! Provides isolated Postgres databases with the schema_check migrations
//! applied; the end-to-end tests live under `tests/`.

pub mod db;
