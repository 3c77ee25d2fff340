//! chainbatch-storage: transactional databases for the ChainBatch processor.
//!
//! Backends:
//! - [`memory`]: in-memory (dev/testing, no persistence)
//! - [`sqlite`]: SQLite via `sqlx` (embedded, single-file persistence)

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::{MemoryDatabase, MemoryStore};

#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteDatabase, SqliteStore};
