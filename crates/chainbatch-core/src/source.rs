//! The block source contract.
//!
//! Field selection, RPC clients and rate limiting live behind this trait;
//! the processor only asks for heights, hashes and a stream of batches.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::IndexerError;
use crate::types::{Block, BlockRange};

/// A stream of non-empty block batches, in ascending height order.
pub type BlockStream<'a, B> = BoxStream<'a, Result<Vec<B>, IndexerError>>;

/// Trait for the chain data source feeding the processor.
#[async_trait]
pub trait DataSource: Send + Sync {
    type Block: Block + 'static;

    /// Highest height the source considers final.
    async fn finalized_height(&self) -> Result<u64, IndexerError>;

    /// Canonical hash at `height`, or `None` if the source has no such block.
    async fn block_hash(&self, height: u64) -> Result<Option<String>, IndexerError>;

    /// Subscribe to batches starting at `from`.
    ///
    /// The stream is not restartable; a new call re-subscribes from the given height.
    fn block_stream(&self, from: u64) -> BlockStream<'_, Self::Block>;

    /// Number of blocks the source will deliver in `range`, for sparse sources.
    fn blocks_count_in_range(&self, _range: &BlockRange) -> Option<u64> {
        None
    }
}
