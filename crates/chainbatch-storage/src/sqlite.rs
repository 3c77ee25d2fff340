//! SQLite database for ChainBatch.
//!
//! Persists the resume cursor and JSON entity records to a single SQLite file.
//! Every batch runs in one SQLite transaction: the handler writes through
//! [`SqliteStore`] and the `status` row moves to the batch's last block in the
//! same transaction. Uses `sqlx` with WAL mode.
//!
//! # Usage
//! ```rust,no_run
//! use chainbatch_storage::sqlite::SqliteDatabase;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let db = SqliteDatabase::open("./processor.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let db = SqliteDatabase::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnection, SqlitePoolOptions};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::debug;

use chainbatch_core::cursor::HashAndHeight;
use chainbatch_core::error::IndexerError;
use chainbatch_core::store::Database;
use chainbatch_core::types::FinalTxInfo;

/// SQLite-backed transactional database.
pub struct SqliteDatabase {
    pool: SqlitePool,
}

/// Store handle wrapping the open SQLite transaction of one batch.
pub struct SqliteStore {
    tx: Transaction<'static, Sqlite>,
}

impl SqliteStore {
    /// Insert a JSON record for `entity` inside the batch transaction.
    pub async fn insert(&mut self, entity: &str, record: &Value) -> Result<(), IndexerError> {
        let data =
            serde_json::to_string(record).map_err(|e| IndexerError::Storage(e.to_string()))?;

        sqlx::query("INSERT INTO entities (entity, data) VALUES (?, ?)")
            .bind(entity)
            .bind(&data)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Raw connection for handlers that manage their own tables.
    pub fn connection(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }
}

impl SqliteDatabase {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./processor.db"`) or a full
    /// SQLite URL (`"sqlite:./processor.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, IndexerError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url)
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;

        let db = Self { pool };
        db.init_schema().await?;
        Ok(db)
    }

    /// Open an in-memory SQLite database.
    ///
    /// The pool is pinned to a single connection that never expires, since
    /// every new connection to `:memory:` is a fresh empty database.
    pub async fn in_memory() -> Result<Self, IndexerError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;

        let db = Self { pool };
        db.init_schema().await?;
        Ok(db)
    }

    /// Create tables and enable WAL mode.
    async fn init_schema(&self) -> Result<(), IndexerError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;

        // Single-row cursor table
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS status (
                id         INTEGER PRIMARY KEY CHECK (id = 0),
                height     INTEGER NOT NULL,
                hash       TEXT    NOT NULL,
                updated_at INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| IndexerError::Storage(e.to_string()))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS entities (
                id     INTEGER PRIMARY KEY AUTOINCREMENT,
                entity TEXT    NOT NULL,
                data   TEXT    NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| IndexerError::Storage(e.to_string()))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_entities_entity ON entities (entity);")
            .execute(&self.pool)
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;

        Ok(())
    }

    /// Current committed cursor (`HashAndHeight::empty()` on a fresh database).
    pub async fn head(&self) -> Result<HashAndHeight, IndexerError> {
        let row = sqlx::query("SELECT height, hash FROM status WHERE id = 0")
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;

        Ok(row
            .map(|r| HashAndHeight {
                height: r.get("height"),
                hash: r.get("hash"),
            })
            .unwrap_or_default())
    }

    /// Unix timestamp of the last commit, if any.
    pub async fn updated_at(&self) -> Result<Option<i64>, IndexerError> {
        let row = sqlx::query("SELECT updated_at FROM status WHERE id = 0")
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;
        Ok(row.map(|r| r.get("updated_at")))
    }

    /// Committed records of one entity, in insertion order.
    pub async fn records(&self, entity: &str) -> Result<Vec<Value>, IndexerError> {
        let rows = sqlx::query("SELECT data FROM entities WHERE entity = ? ORDER BY id")
            .bind(entity)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;

        rows.into_iter()
            .map(|row| {
                let data: String = row.get("data");
                serde_json::from_str(&data).map_err(|e| IndexerError::Storage(e.to_string()))
            })
            .collect()
    }

    /// Total number of committed records across all entities.
    pub async fn record_count(&self) -> Result<u64, IndexerError> {
        let row = sqlx::query("SELECT COUNT(*) as cnt FROM entities")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;

        let cnt: i64 = row.get("cnt");
        Ok(cnt as u64)
    }

    /// Delete the cursor and every record; the next run starts from genesis.
    pub async fn reset(&self) -> Result<(), IndexerError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;

        sqlx::query("DELETE FROM entities")
            .execute(&mut *tx)
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;
        sqlx::query("DELETE FROM status")
            .execute(&mut *tx)
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;
        debug!("database reset");
        Ok(())
    }
}

async fn read_head(conn: &mut SqliteConnection) -> Result<HashAndHeight, IndexerError> {
    let row = sqlx::query("SELECT height, hash FROM status WHERE id = 0")
        .fetch_optional(conn)
        .await
        .map_err(|e| IndexerError::Storage(e.to_string()))?;

    Ok(row
        .map(|r| HashAndHeight {
            height: r.get("height"),
            hash: r.get("hash"),
        })
        .unwrap_or_default())
}

// ─── Database impl ───────────────────────────────────────────────────────────

#[async_trait]
impl Database for SqliteDatabase {
    type Store = SqliteStore;

    async fn connect(&self) -> Result<HashAndHeight, IndexerError> {
        self.head().await
    }

    async fn begin(&self, info: &FinalTxInfo) -> Result<SqliteStore, IndexerError> {
        if info.next_head.height <= info.prev_head.height {
            return Err(IndexerError::Storage(format!(
                "cursor must advance: {} -> {}",
                info.prev_head, info.next_head
            )));
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;

        let current = read_head(&mut tx).await?;
        if current != info.prev_head {
            // Dropping the transaction rolls it back.
            return Err(IndexerError::StatusMismatch {
                expected: info.prev_head.clone(),
                actual: current,
            });
        }

        Ok(SqliteStore { tx })
    }

    async fn commit(&self, store: SqliteStore, info: &FinalTxInfo) -> Result<(), IndexerError> {
        let mut tx = store.tx;

        sqlx::query(
            "INSERT INTO status (id, height, hash, updated_at) VALUES (0, ?, ?, ?)
             ON CONFLICT (id) DO UPDATE SET
                height = excluded.height,
                hash = excluded.hash,
                updated_at = excluded.updated_at",
        )
        .bind(info.next_head.height)
        .bind(&info.next_head.hash)
        .bind(chrono::Utc::now().timestamp())
        .execute(&mut *tx)
        .await
        .map_err(|e| IndexerError::Storage(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;

        debug!(head = %info.next_head, "batch committed");
        Ok(())
    }

    async fn rollback(&self, store: SqliteStore) -> Result<(), IndexerError> {
        store
            .tx
            .rollback()
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
