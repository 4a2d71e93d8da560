//! scanlog-core - Core library for scanlog
//!
//! This crate contains the record model, the durable local store (Outbox,
//! History, pull watermark) and the outbox/pull sync engine that reconciles
//! it with a shared remote store. It is used by the CLI and by any other
//! front end that creates records offline.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod remote;
pub mod state;
pub mod store;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{Record, RecordKind};
pub use state::SyncState;
