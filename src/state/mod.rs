//! Persistence layer (§3.1). Grounds the spec's abstract "relational store
//! with transactions" in an embedded, bundled SQLite database.

pub mod database;
pub mod schema;

pub use database::{Database, StorageError};
