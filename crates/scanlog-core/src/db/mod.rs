//! Database layer for scanlog

mod connection;
mod kv_repository;
mod migrations;

pub use connection::Database;
pub use kv_repository::{KeyValueStore, LibSqlKeyValueStore, MemoryKeyValueStore};
