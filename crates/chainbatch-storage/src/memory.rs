//! In-memory database.
//!
//! Keeps the cursor and entity records in RAM. Handler writes are staged in a
//! [`MemoryStore`] and only become visible when the batch commits.
//! Useful for testing and short-lived processors that don't need persistence.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chainbatch_core::cursor::HashAndHeight;
use chainbatch_core::error::IndexerError;
use chainbatch_core::store::Database;
use chainbatch_core::types::FinalTxInfo;

#[derive(Default)]
struct State {
    head: HashAndHeight,
    records: HashMap<String, Vec<Value>>,
}

/// In-memory transactional database.
///
/// Clones share the same state, so a test can keep a handle while the
/// processor owns another. All data is lost when the process exits.
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<Mutex<State>>,
}

/// Store handle for one in-memory transaction.
#[derive(Debug, Default)]
pub struct MemoryStore {
    staged: Vec<(String, Value)>,
}

impl MemoryStore {
    /// Stage a record for `entity` (e.g. `"Transfer"`).
    pub fn insert(&mut self, entity: impl Into<String>, record: Value) {
        self.staged.push((entity.into(), record));
    }

    /// Records staged so far in this transaction.
    pub fn staged(&self) -> usize {
        self.staged.len()
    }
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// A database that already committed up to `head`.
    pub fn with_head(head: HashAndHeight) -> Self {
        let db = Self::default();
        db.state.lock().unwrap().head = head;
        db
    }

    /// Current committed cursor.
    pub fn head(&self) -> HashAndHeight {
        self.state.lock().unwrap().head.clone()
    }

    /// Committed records of one entity, in commit order.
    pub fn records(&self, entity: &str) -> Vec<Value> {
        self.state
            .lock()
            .unwrap()
            .records
            .get(entity)
            .cloned()
            .unwrap_or_default()
    }

    /// Total number of committed records across all entities.
    pub fn record_count(&self) -> usize {
        self.state.lock().unwrap().records.values().map(Vec::len).sum()
    }
}

fn check_transition(current: &HashAndHeight, info: &FinalTxInfo) -> Result<(), IndexerError> {
    if *current != info.prev_head {
        return Err(IndexerError::StatusMismatch {
            expected: info.prev_head.clone(),
            actual: current.clone(),
        });
    }
    if info.next_head.height <= info.prev_head.height {
        return Err(IndexerError::Storage(format!(
            "cursor must advance: {} -> {}",
            info.prev_head, info.next_head
        )));
    }
    Ok(())
}

#[async_trait]
impl Database for MemoryDatabase {
    type Store = MemoryStore;

    async fn connect(&self) -> Result<HashAndHeight, IndexerError> {
        Ok(self.head())
    }

    async fn begin(&self, info: &FinalTxInfo) -> Result<MemoryStore, IndexerError> {
        check_transition(&self.state.lock().unwrap().head, info)?;
        Ok(MemoryStore::default())
    }

    async fn commit(&self, store: MemoryStore, info: &FinalTxInfo) -> Result<(), IndexerError> {
        let mut state = self.state.lock().unwrap();
        check_transition(&state.head, info)?;

        let staged = store.staged.len();
        for (entity, record) in store.staged {
            state.records.entry(entity).or_default().push(record);
        }
        state.head = info.next_head.clone();

        tracing::debug!(head = %info.next_head, records = staged, "batch committed");
        Ok(())
    }

    async fn rollback(&self, store: MemoryStore) -> Result<(), IndexerError> {
        tracing::debug!(records = store.staged(), "staged records discarded");
        Ok(())
    }
}
