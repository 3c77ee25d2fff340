//! End-to-end processor runs against the bundled databases.
//!
//! Each test drives a full `Processor` over a scripted in-process source and
//! checks what ended up committed: records, cursor, and how often the source
//! was asked to stream.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::json;

use chainbatch_core::{
    handler_fn, BatchHandler, BlockData, BlockHeader, BlockRange, BlockStream, DataSource,
    HashAndHeight, IndexerError, Processor, ProcessorBuilder, ProcessorConfig,
};
use chainbatch_storage::memory::{MemoryDatabase, MemoryStore};

// ─── Helpers ──────────────────────────────────────────────────────────────────

fn block_hash(height: u64) -> String {
    format!("0x{height:064x}")
}

fn block(height: u64, items: usize) -> BlockData {
    BlockData {
        header: BlockHeader {
            height,
            hash: block_hash(height),
            parent_hash: block_hash(height.saturating_sub(1)),
            timestamp: Some(1_700_000_000 + height as i64 * 12),
        },
        items: (0..items).map(|i| json!({ "log_index": i })).collect(),
    }
}

/// Source serving a fixed chain in batches of `batch_size`.
struct ScriptedSource {
    blocks: Vec<BlockData>,
    batch_size: usize,
    finalized: u64,
    /// Yield an empty batch before every real one.
    empty_batches: bool,
    /// Answer `blocks_count_in_range` from the scripted blocks.
    sparse: bool,
    streams: Arc<AtomicU32>,
}

impl ScriptedSource {
    fn new(heights: impl IntoIterator<Item = u64>, batch_size: usize) -> Self {
        let blocks: Vec<BlockData> = heights.into_iter().map(|h| block(h, 2)).collect();
        let finalized = blocks.last().map_or(0, |b| b.header.height);
        Self {
            blocks,
            batch_size,
            finalized,
            empty_batches: false,
            sparse: false,
            streams: Arc::default(),
        }
    }
}

#[async_trait]
impl DataSource for ScriptedSource {
    type Block = BlockData;

    async fn finalized_height(&self) -> Result<u64, IndexerError> {
        Ok(self.finalized)
    }

    async fn block_hash(&self, height: u64) -> Result<Option<String>, IndexerError> {
        Ok(self
            .blocks
            .iter()
            .find(|b| b.header.height == height)
            .map(|b| b.header.hash.clone()))
    }

    fn block_stream(&self, from: u64) -> BlockStream<'_, BlockData> {
        self.streams.fetch_add(1, Ordering::SeqCst);
        let pending: Vec<BlockData> = self
            .blocks
            .iter()
            .filter(|b| b.header.height >= from)
            .cloned()
            .collect();

        let mut batches = Vec::new();
        for chunk in pending.chunks(self.batch_size) {
            if self.empty_batches {
                batches.push(Ok(Vec::new()));
            }
            batches.push(Ok(chunk.to_vec()));
        }
        stream::iter(batches).boxed()
    }

    fn blocks_count_in_range(&self, range: &BlockRange) -> Option<u64> {
        if !self.sparse {
            return None;
        }
        Some(
            self.blocks
                .iter()
                .filter(|b| range.contains(b.header.height))
                .count() as u64,
        )
    }
}

/// Stores one `Block` record per block, plus one `Item` record per item.
fn recording_handler() -> impl BatchHandler<BlockData, MemoryStore> {
    handler_fn::<BlockData, MemoryStore, _>(|ctx| {
        Box::pin(async move {
            for b in ctx.blocks {
                ctx.store.insert("Block", json!({ "height": b.header.height }));
                for item in &b.items {
                    ctx.store.insert("Item", item.clone());
                }
            }
            Ok(())
        })
    })
}

/// Like `recording_handler`, but fails (after staging writes) on the batch
/// containing `fail_at` while `armed` is set. Each failure disarms it when
/// `once` is true.
fn failing_handler(
    fail_at: u64,
    armed: Arc<AtomicBool>,
    once: bool,
) -> impl BatchHandler<BlockData, MemoryStore> {
    handler_fn::<BlockData, MemoryStore, _>(move |ctx| {
        let armed = armed.clone();
        Box::pin(async move {
            for b in ctx.blocks {
                ctx.store.insert("Block", json!({ "height": b.header.height }));
            }
            let hit = ctx.blocks.iter().any(|b| b.header.height == fail_at);
            if hit && armed.load(Ordering::SeqCst) {
                if once {
                    armed.store(false, Ordering::SeqCst);
                }
                return Err(IndexerError::handler("recorder", format!("boom at {fail_at}")));
            }
            Ok(())
        })
    })
}

fn fast_retries(max_retries: u32) -> ProcessorConfig {
    ProcessorBuilder::new()
        .max_retries(max_retries)
        .retry_delay_ms(10)
        .build_config()
}

fn heights(db: &MemoryDatabase) -> Vec<u64> {
    db.records("Block")
        .iter()
        .map(|r| r["height"].as_u64().unwrap())
        .collect()
}

// ─── Happy path ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn processes_whole_chain_from_genesis() {
    let db = MemoryDatabase::new();
    let source = ScriptedSource::new(0..25, 10);
    let streams = source.streams.clone();

    let mut processor = Processor::new(source, db.clone(), recording_handler(), fast_retries(0));
    processor.run().await.unwrap();

    assert_eq!(heights(&db), (0..25).collect::<Vec<_>>());
    assert_eq!(db.records("Item").len(), 50);
    assert_eq!(db.head(), HashAndHeight::new(24, block_hash(24)));
    assert_eq!(streams.load(Ordering::SeqCst), 1);

    let metrics = processor.metrics();
    assert_eq!(metrics.total_blocks(), 25);
    assert_eq!(metrics.total_items(), 50);
    assert_eq!(metrics.last_processed_block(), 24);
    assert_eq!(metrics.chain_height(), 24);
}

#[tokio::test]
async fn empty_batches_are_skipped() {
    let db = MemoryDatabase::new();
    let mut source = ScriptedSource::new(0..6, 2);
    source.empty_batches = true;

    let calls = Arc::new(AtomicU32::new(0));
    let counted = calls.clone();
    let handler = handler_fn::<BlockData, MemoryStore, _>(move |ctx| {
        let calls = counted.clone();
        Box::pin(async move {
            assert!(!ctx.blocks.is_empty());
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    });

    let mut processor = Processor::new(source, db.clone(), handler, fast_retries(0));
    processor.run().await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(db.head().height, 5);
}

#[tokio::test]
async fn head_flag_set_only_on_final_batch() {
    let db = MemoryDatabase::new();
    let source = ScriptedSource::new(0..9, 3);

    let handler = handler_fn::<BlockData, MemoryStore, _>(|ctx| {
        Box::pin(async move {
            let last = ctx.blocks[ctx.blocks.len() - 1].header.height;
            ctx.store.insert("Head", json!({ "last": last, "is_head": ctx.is_head }));
            Ok(())
        })
    });

    let mut processor = Processor::new(source, db.clone(), handler, fast_retries(0));
    processor.run().await.unwrap();

    let flags: Vec<bool> = db
        .records("Head")
        .iter()
        .map(|r| r["is_head"].as_bool().unwrap())
        .collect();
    assert_eq!(flags, vec![false, false, true]);
}

#[tokio::test]
async fn sparse_source_progress_uses_block_counts() {
    let db = MemoryDatabase::new();
    let mut source = ScriptedSource::new((0..10).map(|i| i * 10), 4);
    source.sparse = true;

    let mut processor = Processor::new(source, db.clone(), recording_handler(), fast_retries(0));
    processor.run().await.unwrap();

    let snapshot = processor.metrics().snapshot();
    assert_eq!(snapshot.blocks_processed, 10);
    assert_eq!(snapshot.blocks_left, 0);
    assert_eq!(snapshot.last_block, 90);
    assert_eq!(db.head().height, 90);
}

// ─── Atomicity and resume ─────────────────────────────────────────────────────

#[tokio::test]
async fn failed_batch_leaves_no_trace() {
    let db = MemoryDatabase::new();
    let source = ScriptedSource::new(0..12, 4);
    let handler = failing_handler(5, Arc::new(AtomicBool::new(true)), false);

    let mut processor = Processor::new(source, db.clone(), handler, fast_retries(0));
    let err = processor.run().await.unwrap_err();

    assert!(err.is_exhausted());
    assert!(err.to_string().contains("boom at 5"));
    // Batch [0..=3] committed; [4..=7] rolled back in full.
    assert_eq!(heights(&db), vec![0, 1, 2, 3]);
    assert_eq!(db.head(), HashAndHeight::new(3, block_hash(3)));
}

#[tokio::test]
async fn retry_resumes_after_last_commit_without_duplicates() {
    let db = MemoryDatabase::new();
    let source = ScriptedSource::new(0..12, 4);
    let streams = source.streams.clone();
    let handler = failing_handler(9, Arc::new(AtomicBool::new(true)), true);

    let mut processor = Processor::new(source, db.clone(), handler, fast_retries(1));
    processor.run().await.unwrap();

    assert_eq!(heights(&db), (0..12).collect::<Vec<_>>());
    assert_eq!(db.head().height, 11);
    assert_eq!(streams.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn restart_continues_from_stored_cursor() {
    let db = MemoryDatabase::new();

    let first = ScriptedSource::new(0..5, 5);
    let mut processor = Processor::new(first, db.clone(), recording_handler(), fast_retries(0));
    processor.run().await.unwrap();
    assert_eq!(db.head().height, 4);

    // Same chain, grown by five blocks.
    let second = ScriptedSource::new(0..10, 5);
    let mut processor = Processor::new(second, db.clone(), recording_handler(), fast_retries(0));
    processor.run().await.unwrap();

    assert_eq!(heights(&db), (0..10).collect::<Vec<_>>());
    assert_eq!(processor.metrics().total_blocks(), 5);
}

// ─── Continuity guard and retry cap ───────────────────────────────────────────

#[tokio::test]
async fn forked_cursor_is_rejected_before_streaming() {
    let db = MemoryDatabase::with_head(HashAndHeight::new(3, "0xdeadbeef"));
    let source = ScriptedSource::new(0..10, 4);
    let streams = source.streams.clone();

    let mut processor = Processor::new(source, db.clone(), recording_handler(), fast_retries(2));
    let err = processor.run().await.unwrap_err();

    let IndexerError::RetriesExhausted { attempts, last } = err else {
        panic!("expected exhausted retries");
    };
    assert_eq!(attempts, 3);
    assert!(last.is_continuity_violation());
    assert!(last.to_string().contains("block 3#deadb was not found"), "{last}");
    assert_eq!(streams.load(Ordering::SeqCst), 0);
    assert_eq!(db.record_count(), 0);
}

#[tokio::test]
async fn cursor_beyond_source_is_a_continuity_violation() {
    let db = MemoryDatabase::with_head(HashAndHeight::new(50, block_hash(50)));
    let source = ScriptedSource::new(0..10, 4);

    let mut processor = Processor::new(source, db, recording_handler(), fast_retries(0));
    let err = processor.run().await.unwrap_err();

    let IndexerError::RetriesExhausted { last, .. } = err else {
        panic!("expected exhausted retries");
    };
    assert!(last.to_string().contains("no block"));
}

#[tokio::test(start_paused = true)]
async fn retry_budget_uses_hourly_delay() {
    let db = MemoryDatabase::new();
    let source = ScriptedSource::new(0..4, 4);
    let streams = source.streams.clone();
    let handler = failing_handler(0, Arc::new(AtomicBool::new(true)), false);

    let config = ProcessorBuilder::new().max_retries(3).build_config();
    let started = tokio::time::Instant::now();
    let mut processor = Processor::new(source, db.clone(), handler, config);
    let err = processor.run().await.unwrap_err();

    assert!(matches!(err, IndexerError::RetriesExhausted { attempts: 4, .. }));
    assert_eq!(streams.load(Ordering::SeqCst), 4);
    assert_eq!(started.elapsed().as_secs() / 3600, 3);
    assert!(db.head().is_empty());
}

// ─── SQLite ───────────────────────────────────────────────────────────────────

#[cfg(feature = "sqlite")]
mod sqlite {
    use super::*;
    use chainbatch_storage::sqlite::{SqliteDatabase, SqliteStore};

    fn sqlite_handler(fail_at: Option<u64>) -> impl BatchHandler<BlockData, SqliteStore> {
        handler_fn::<BlockData, SqliteStore, _>(move |ctx| {
            Box::pin(async move {
                for b in ctx.blocks {
                    ctx.store
                        .insert("Block", &json!({ "height": b.header.height }))
                        .await?;
                    if Some(b.header.height) == fail_at {
                        return Err(IndexerError::handler("sqlite", "constraint violated"));
                    }
                }
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn commits_records_with_cursor() {
        let db = SqliteDatabase::in_memory().await.unwrap();
        let source = ScriptedSource::new(0..20, 6);

        let mut processor = Processor::new(source, db, sqlite_handler(None), fast_retries(0));
        processor.run().await.unwrap();

        let db = processor.database();
        assert_eq!(db.head().await.unwrap(), HashAndHeight::new(19, block_hash(19)));
        assert_eq!(db.record_count().await.unwrap(), 20);
        assert!(db.updated_at().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn file_database_survives_restart() {
        let dir = std::env::temp_dir().join(format!("chainbatch-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("resume.db");
        let _ = std::fs::remove_file(&path);
        let path = path.to_string_lossy().to_string();

        // First run fails inside the third batch.
        let db = SqliteDatabase::open(&path).await.unwrap();
        let source = ScriptedSource::new(0..12, 4);
        let mut processor = Processor::new(source, db, sqlite_handler(Some(9)), fast_retries(0));
        assert!(processor.run().await.is_err());

        let db = SqliteDatabase::open(&path).await.unwrap();
        assert_eq!(db.head().await.unwrap(), HashAndHeight::new(7, block_hash(7)));
        assert_eq!(db.record_count().await.unwrap(), 8);

        // Second run resumes at block 8 and finishes.
        let source = ScriptedSource::new(0..12, 4);
        let mut processor = Processor::new(source, db, sqlite_handler(None), fast_retries(0));
        processor.run().await.unwrap();

        let db = SqliteDatabase::open(&path).await.unwrap();
        assert_eq!(db.head().await.unwrap().height, 11);
        let stored: Vec<u64> = db
            .records("Block")
            .await
            .unwrap()
            .iter()
            .map(|r| r["height"].as_u64().unwrap())
            .collect();
        assert_eq!(stored, (0..12).collect::<Vec<_>>());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
