//! Shared types for the batch pipeline.

use serde::{Deserialize, Serialize};

use crate::cursor::HashAndHeight;
use crate::error::IndexerError;

// ─── BlockHeader ──────────────────────────────────────────────────────────────

/// The part of a block the processor needs to track progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Block height (slot, number…).
    pub height: u64,
    /// Block hash.
    pub hash: String,
    /// Parent block hash.
    pub parent_hash: String,
    /// Unix timestamp of the block (seconds since epoch), when the source provides one.
    pub timestamp: Option<i64>,
}

impl BlockHeader {
    /// The cursor value this block produces once committed.
    pub fn head(&self) -> Result<HashAndHeight, IndexerError> {
        HashAndHeight::try_new(self.height, self.hash.clone())
    }
}

// ─── Block ────────────────────────────────────────────────────────────────────

/// A block delivered by a [`DataSource`](crate::source::DataSource).
pub trait Block: Send + Sync {
    fn header(&self) -> &BlockHeader;

    /// Number of items (transactions, logs, instructions…) carried by the block.
    fn items_count(&self) -> usize {
        0
    }
}

/// Total items across a batch.
pub fn items_count<B: Block>(blocks: &[B]) -> usize {
    blocks.iter().map(Block::items_count).sum()
}

/// A generic block: a header plus opaque JSON items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockData {
    pub header: BlockHeader,
    #[serde(default)]
    pub items: Vec<serde_json::Value>,
}

impl Block for BlockData {
    fn header(&self) -> &BlockHeader {
        &self.header
    }

    fn items_count(&self) -> usize {
        self.items.len()
    }
}

// ─── BlockRange ───────────────────────────────────────────────────────────────

/// An inclusive range of block heights; `to = None` means open-ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRange {
    pub from: u64,
    pub to: Option<u64>,
}

impl BlockRange {
    pub fn new(from: u64, to: u64) -> Self {
        Self { from, to: Some(to) }
    }

    /// Returns `true` if `height` falls into the range.
    pub fn contains(&self, height: u64) -> bool {
        height >= self.from && self.to.map_or(true, |to| height <= to)
    }
}

// ─── FinalTxInfo ──────────────────────────────────────────────────────────────

/// What a store transaction commits: the move from `prev_head` to `next_head`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalTxInfo {
    pub prev_head: HashAndHeight,
    pub next_head: HashAndHeight,
    /// The batch reaches the finalized height reported by the source.
    pub is_on_top: bool,
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn header(height: u64, hash: &str, parent: &str) -> BlockHeader {
        BlockHeader {
            height,
            hash: hash.into(),
            parent_hash: parent.into(),
            timestamp: None,
        }
    }

    #[test]
    fn batch_items_count() {
        let blocks = vec![
            BlockData {
                header: header(1, "0x1", "0x0"),
                items: vec![json!({"log": 1}), json!({"log": 2})],
            },
            BlockData {
                header: header(2, "0x2", "0x1"),
                items: vec![],
            },
            BlockData {
                header: header(3, "0x3", "0x2"),
                items: vec![json!(null)],
            },
        ];
        assert_eq!(items_count(&blocks), 3);
        assert_eq!(blocks[2].header().head().unwrap(), HashAndHeight::new(3, "0x3"));
        assert!(header(u64::MAX, "0xf", "0xe").head().is_err());
    }

    #[test]
    fn range_contains() {
        let closed = BlockRange::new(10, 20);
        assert!(closed.contains(10));
        assert!(closed.contains(20));
        assert!(!closed.contains(21));

        let open = BlockRange { from: 5, to: None };
        assert!(!open.contains(4));
        assert!(open.contains(u64::MAX));
    }
}
