//! Storage layer for Tourbook
//!
//! This crate provides the device key-value store that session tokens are
//! persisted in, along with an in-memory implementation for tests and
//! ephemeral sessions.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod kv;
pub mod memory;

pub use kv::{KeyValueStore, KvConfig, KvError, KvStore, Result};
pub use memory::MemoryStore;
