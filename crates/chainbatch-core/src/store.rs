//! The transactional sink contract.

use async_trait::async_trait;

use crate::cursor::HashAndHeight;
use crate::error::IndexerError;
use crate::types::FinalTxInfo;

/// Trait for the persistent store batches are applied to.
///
/// Implementations include `MemoryDatabase` and `SqliteDatabase` in
/// `chainbatch-storage`.
#[async_trait]
pub trait Database: Send + Sync {
    /// Handle given to the batch handler for the duration of one transaction.
    type Store: Send;

    /// Load the resume cursor (`HashAndHeight::empty()` if nothing was committed).
    async fn connect(&self) -> Result<HashAndHeight, IndexerError>;

    /// Open a transaction moving the cursor from `info.prev_head` to `info.next_head`.
    async fn begin(&self, info: &FinalTxInfo) -> Result<Self::Store, IndexerError>;

    /// Persist the handler's writes together with `info.next_head`.
    async fn commit(&self, store: Self::Store, info: &FinalTxInfo) -> Result<(), IndexerError>;

    /// Discard everything written through `store`.
    async fn rollback(&self, store: Self::Store) -> Result<(), IndexerError>;
}
