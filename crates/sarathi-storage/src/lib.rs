//! Sarathi storage: device-local key-value persistence and the guest
//! message history built on it.

pub mod guest;
pub mod kv;
pub mod migrations;
pub mod sqlite;

pub use guest::GuestMessageStore;
pub use kv::{KeyValueStore, MemoryStore};
pub use sqlite::SqliteStore;
