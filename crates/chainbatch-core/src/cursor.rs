//! Processor cursor: the last block whose batch was committed.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::IndexerError;

/// Identity of the last successfully applied block.
///
/// A height of `-1` means nothing has been committed yet; see [`HashAndHeight::empty`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashAndHeight {
    /// Block height, `-1` when no block was processed.
    pub height: i64,
    /// Block hash (`0x…`).
    pub hash: String,
}

impl HashAndHeight {
    /// Create a cursor from a stored height.
    pub fn new(height: i64, hash: impl Into<String>) -> Self {
        Self {
            height,
            hash: hash.into(),
        }
    }

    /// Create a cursor for a block reported by a source.
    ///
    /// Heights above `i64::MAX` cannot be stored and are rejected.
    pub fn try_new(height: u64, hash: impl Into<String>) -> Result<Self, IndexerError> {
        let height = i64::try_from(height)
            .map_err(|_| IndexerError::Source(format!("block height {height} out of range")))?;
        Ok(Self::new(height, hash))
    }

    /// The "no prior state" cursor.
    pub fn empty() -> Self {
        Self {
            height: -1,
            hash: "0x".into(),
        }
    }

    /// Returns `true` if no block has been committed yet.
    pub fn is_empty(&self) -> bool {
        self.height < 0
    }

    /// Height of the committed block, if any.
    pub fn committed_height(&self) -> Option<u64> {
        u64::try_from(self.height).ok()
    }

    /// Returns the next block to process (cursor + 1).
    pub fn next_height(&self) -> u64 {
        self.committed_height().map_or(0, |h| h + 1)
    }
}

impl Default for HashAndHeight {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Display for HashAndHeight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_head(self))
    }
}

/// Render a head as `height#hash-prefix`, the way status and error lines show it.
pub fn format_head(head: &HashAndHeight) -> String {
    let hash = head.hash.strip_prefix("0x").unwrap_or(&head.hash);
    let short: String = hash.chars().take(5).collect();
    format!("{}#{}", head.height, short)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_cursor_starts_at_zero() {
        let cursor = HashAndHeight::empty();
        assert!(cursor.is_empty());
        assert_eq!(cursor.committed_height(), None);
        assert_eq!(cursor.next_height(), 0);
    }

    #[test]
    fn cursor_next_height() {
        let cursor = HashAndHeight::new(500, "0x123");
        assert!(!cursor.is_empty());
        assert_eq!(cursor.committed_height(), Some(500));
        assert_eq!(cursor.next_height(), 501);
    }

    #[test]
    fn try_new_rejects_unrepresentable_height() {
        let head = HashAndHeight::try_new(42, "0x2a").unwrap();
        assert_eq!(head.height, 42);

        let max = HashAndHeight::try_new(i64::MAX as u64, "0xff").unwrap();
        assert_eq!(max.committed_height(), Some(i64::MAX as u64));

        let err = HashAndHeight::try_new(u64::MAX, "0xff").unwrap_err();
        assert!(matches!(err, IndexerError::Source(_)), "{err}");
    }

    #[test]
    fn format_head_shortens_hash() {
        let head = HashAndHeight::new(1234, "0xabcdef0123456789");
        assert_eq!(format_head(&head), "1234#abcde");
        assert_eq!(head.to_string(), "1234#abcde");
        assert_eq!(format_head(&HashAndHeight::empty()), "-1#");
    }
}
