//! # Taskloom Store
//!
//! [`Store`](taskloom_core::traits::Store) implementations: an in-memory
//! store for tests and ephemeral runs, and a SQLite store for durable
//! deployments. Both enforce the version-checked task update the
//! assignment FSM depends on.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
