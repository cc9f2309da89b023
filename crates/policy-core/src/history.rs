//! Best-effort history of analysis outcomes
//!
//! History is supplementary: a failed write is logged and dropped, a failed
//! read returns an empty list. Nothing here can fail the analysis flow.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::analysis::{AnalysisResult, RiskLevel};
use crate::error::{PolicyError, Result};

/// Maximum number of entries returned by [`HistoryStore::list`]
pub const HISTORY_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub document_id: String,
    pub summary: String,
    pub risk_level: Option<RiskLevel>,
    pub created_at: DateTime<Utc>,
}

impl HistoryEntry {
    fn from_result(result: &AnalysisResult) -> Option<Self> {
        let document_id = result.document_id.clone()?;
        Some(Self {
            document_id,
            summary: result.summary.clone(),
            risk_level: result.risk_level,
            created_at: Utc::now(),
        })
    }
}

/// Storage behind the history store
#[async_trait]
pub trait HistoryBackend: Send + Sync {
    async fn insert(&self, entry: &HistoryEntry) -> Result<()>;

    /// Newest first, at most `limit` entries
    async fn recent(&self, document_id: &str, limit: usize) -> Result<Vec<HistoryEntry>>;
}

/// SQLite-backed history
pub struct SqliteHistory {
    pool: SqlitePool,
}

impl SqliteHistory {
    pub async fn connect(database_url: &str) -> Result<Self> {
        info!("Connecting to history database: {}", database_url);
        if let Some(dir) = sqlite_parent_dir(database_url) {
            tokio::fs::create_dir_all(dir).await?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Self::with_pool(pool).await
    }

    /// Private in-memory database; one connection so the data survives
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Self::with_pool(pool).await
    }

    pub async fn with_pool(pool: SqlitePool) -> Result<Self> {
        Self::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    async fn run_migrations(pool: &SqlitePool) -> Result<()> {
        debug!("Running history migrations");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS analysis_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                document_id TEXT NOT NULL,
                summary TEXT NOT NULL,
                risk_level TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_history_document
            ON analysis_history(document_id, created_at)
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }
}

/// Directory part of a `sqlite:` file URL, if any
fn sqlite_parent_dir(database_url: &str) -> Option<&std::path::Path> {
    let path = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))?;
    let path = path.split('?').next()?;
    if path.is_empty() || path.starts_with(":memory:") {
        return None;
    }
    std::path::Path::new(path)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
}

#[async_trait]
impl HistoryBackend for SqliteHistory {
    async fn insert(&self, entry: &HistoryEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO analysis_history (document_id, summary, risk_level, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&entry.document_id)
        .bind(&entry.summary)
        .bind(entry.risk_level.map(|r| r.as_str()))
        .bind(entry.created_at.to_rfc3339_opts(SecondsFormat::Micros, true))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent(&self, document_id: &str, limit: usize) -> Result<Vec<HistoryEntry>> {
        let rows: Vec<(String, String, Option<String>, String)> = sqlx::query_as(
            r#"
            SELECT document_id, summary, risk_level, created_at
            FROM analysis_history
            WHERE document_id = ?
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(document_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(document_id, summary, risk_level, created_at)| {
                let created_at = DateTime::parse_from_rfc3339(&created_at)
                    .map_err(|e| PolicyError::Storage(format!("bad timestamp '{}': {}", created_at, e)))?
                    .with_timezone(&Utc);
                Ok(HistoryEntry {
                    document_id,
                    summary,
                    risk_level: risk_level.and_then(|r| r.parse().ok()),
                    created_at,
                })
            })
            .collect()
    }
}

/// Process-local history, mostly for tests and one-shot CLI runs
#[derive(Default)]
pub struct MemoryHistory {
    entries: Mutex<Vec<HistoryEntry>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryBackend for MemoryHistory {
    async fn insert(&self, entry: &HistoryEntry) -> Result<()> {
        lock(&self.entries).push(entry.clone());
        Ok(())
    }

    async fn recent(&self, document_id: &str, limit: usize) -> Result<Vec<HistoryEntry>> {
        // insertion order is creation order, so walk it backwards
        Ok(lock(&self.entries)
            .iter()
            .rev()
            .filter(|e| e.document_id == document_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[derive(Clone)]
pub struct HistoryStore {
    backend: Arc<dyn HistoryBackend>,
    pending: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl HistoryStore {
    pub fn new(backend: Arc<dyn HistoryBackend>) -> Self {
        Self {
            backend,
            pending: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryHistory::new()))
    }

    /// Persist a summary of `result`. Failures are logged, never returned.
    pub async fn record(&self, result: &AnalysisResult) {
        let Some(entry) = HistoryEntry::from_result(result) else {
            debug!("Skipping history for analysis without a document id");
            return;
        };
        match self.backend.insert(&entry).await {
            Ok(()) => debug!("Recorded analysis history for {}", entry.document_id),
            Err(e) => warn!(
                "Failed to record analysis history for {}: {}",
                entry.document_id, e
            ),
        }
    }

    /// Spawn [`HistoryStore::record`] so the caller never waits on storage.
    ///
    /// Must be called from within a tokio runtime.
    pub fn record_detached(&self, result: &AnalysisResult) {
        let store = self.clone();
        let result = result.clone();
        let handle = tokio::spawn(async move {
            store.record(&result).await;
        });

        let mut pending = lock(&self.pending);
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }

    /// Wait for detached writes started so far
    pub async fn flush(&self) {
        let handles: Vec<_> = lock(&self.pending).drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("History write task failed: {}", e);
            }
        }
    }

    /// Past summaries for a document, newest first, at most [`HISTORY_LIMIT`]
    pub async fn list(&self, document_id: &str) -> Vec<HistoryEntry> {
        match self.backend.recent(document_id, HISTORY_LIMIT).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to load analysis history for {}: {}", document_id, e);
                Vec::new()
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
