//! Storage layer for groups, rooms and invites
//!
//! Provides SQL-based persistence for the membership core.

pub mod migrations;
pub mod sql_store;
mod sql_types;

pub use migrations::{migrate, CURRENT_SCHEMA_VERSION};
pub use sql_store::{SqlStore, SqlitePool, StoreTx};
