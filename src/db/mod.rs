use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex, MutexGuard};

pub mod memory;
pub mod models;

pub use memory::MemoryUsageStore;
use models::*;

/// Document store holding usage records, keyed by [`UsageRecord::key`].
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Fetch a record by document key.
    async fn get(&self, key: &str) -> Result<Option<UsageRecord>>;

    /// Unconditionally write a record, replacing whatever is stored.
    async fn put(&self, record: &UsageRecord) -> Result<()>;

    /// Write `record` only if the stored revision still equals
    /// `expected_revision` (0 = no document yet).  Returns `false` on conflict.
    async fn compare_and_put(&self, expected_revision: u64, record: &UsageRecord) -> Result<bool>;

    /// Delete every record last written before `cutoff`.  Returns the number removed.
    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    /// Human-readable name for logging.
    fn name(&self) -> &str;
}

/// SQLite-backed usage store (single connection behind a mutex).
#[derive(Clone)]
pub struct SqliteUsageStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteUsageStore {
    /// Open (or create) the SQLite database at the given path
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open usage database {}", path))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = SqliteUsageStore {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.run_migrations()?;
        Ok(store)
    }

    /// Run schema migrations (idempotent)
    fn run_migrations(&self) -> Result<()> {
        self.lock()?.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("usage database mutex poisoned"))
    }

    /// Number of stored records, across all users and periods.
    pub fn count(&self) -> Result<i64> {
        let conn = self.lock()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM usage_records", [], |r| r.get(0))?)
    }
}

#[async_trait]
impl UsageStore for SqliteUsageStore {
    async fn get(&self, key: &str) -> Result<Option<UsageRecord>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT user_id, period_kind, period_id, feature_counts, last_updated, revision
                 FROM usage_records WHERE doc_key = ?1",
                params![key],
                map_usage_row,
            )
            .optional()?;
        row.map(RawUsageRow::into_record).transpose()
    }

    async fn put(&self, record: &UsageRecord) -> Result<()> {
        let counts = serde_json::to_string(&record.feature_counts)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO usage_records (doc_key, user_id, period_kind, period_id,
                                        feature_counts, last_updated, revision)
             VALUES (?1,?2,?3,?4,?5,?6,?7)
             ON CONFLICT(doc_key) DO UPDATE SET
                feature_counts=excluded.feature_counts,
                last_updated=excluded.last_updated,
                revision=excluded.revision",
            params![
                record.key(),
                record.user_id,
                record.period_kind.as_str(),
                record.period_id,
                counts,
                record.last_updated,
                record.revision as i64,
            ],
        )?;
        Ok(())
    }

    async fn compare_and_put(&self, expected_revision: u64, record: &UsageRecord) -> Result<bool> {
        let counts = serde_json::to_string(&record.feature_counts)?;
        let conn = self.lock()?;
        let changed = if expected_revision == 0 {
            conn.execute(
                "INSERT OR IGNORE INTO usage_records (doc_key, user_id, period_kind, period_id,
                                                      feature_counts, last_updated, revision)
                 VALUES (?1,?2,?3,?4,?5,?6,?7)",
                params![
                    record.key(),
                    record.user_id,
                    record.period_kind.as_str(),
                    record.period_id,
                    counts,
                    record.last_updated,
                    record.revision as i64,
                ],
            )?
        } else {
            conn.execute(
                "UPDATE usage_records SET feature_counts=?1, last_updated=?2, revision=?3
                 WHERE doc_key=?4 AND revision=?5",
                params![
                    counts,
                    record.last_updated,
                    record.revision as i64,
                    record.key(),
                    expected_revision as i64,
                ],
            )?
        };
        Ok(changed == 1)
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM usage_records WHERE last_updated < ?1",
            params![cutoff],
        )?;
        Ok(removed)
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}

// ── SQL helpers ────────────────────────────────────────────────────────────────

struct RawUsageRow {
    user_id: String,
    period_kind: String,
    period_id: String,
    feature_counts: String,
    last_updated: DateTime<Utc>,
    revision: i64,
}

impl RawUsageRow {
    fn into_record(self) -> Result<UsageRecord> {
        Ok(UsageRecord {
            period_kind: self.period_kind.parse()?,
            feature_counts: serde_json::from_str(&self.feature_counts)
                .context("Corrupt feature_counts column")?,
            user_id: self.user_id,
            period_id: self.period_id,
            last_updated: self.last_updated,
            revision: self.revision.max(0) as u64,
        })
    }
}

fn map_usage_row(row: &rusqlite::Row) -> rusqlite::Result<RawUsageRow> {
    Ok(RawUsageRow {
        user_id: row.get(0)?,
        period_kind: row.get(1)?,
        period_id: row.get(2)?,
        feature_counts: row.get(3)?,
        last_updated: row.get(4)?,
        revision: row.get(5)?,
    })
}

/// SQLite schema (idempotent CREATE IF NOT EXISTS)
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS usage_records (
    doc_key         TEXT    PRIMARY KEY,
    user_id         TEXT    NOT NULL,
    period_kind     TEXT    NOT NULL,
    period_id       TEXT    NOT NULL,
    feature_counts  TEXT    NOT NULL DEFAULT '{}',
    last_updated    TEXT    NOT NULL,
    revision        INTEGER NOT NULL DEFAULT 1
);

CREATE INDEX IF NOT EXISTS idx_usage_user ON usage_records(user_id);
CREATE INDEX IF NOT EXISTS idx_usage_last_updated ON usage_records(last_updated);
"#;
