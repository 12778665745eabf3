//! Cache of delivered tracks: request key to messaging-platform file id.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::types::{CacheEntry, Quality};

/// Lookup/store contract for delivered tracks.
///
/// `lookup` is a pure read. `store` never overwrites: a second write for the
/// same key fails with [`Error::DuplicateKey`].
#[async_trait]
pub trait CacheGateway: Send + Sync {
    async fn lookup(&self, key: &str) -> Result<Option<CacheEntry>>;

    async fn store(&self, key: &str, remote_file_ref: &str, quality: Quality) -> Result<()>;

    /// Number of cached entries.
    async fn count(&self) -> Result<u64>;
}

/// SQLite-backed cache.
///
/// The connection lives behind a mutex and every query runs on tokio's
/// blocking pool.
#[derive(Clone)]
pub struct SqliteCache {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCache {
    /// Open (or create) the cache database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        info!(path = %path.display(), "opened cache database");
        Self::with_connection(conn)
    }

    /// In-memory database, mostly for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS file_cache (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                track_id TEXT NOT NULL UNIQUE,
                file_id TEXT NOT NULL,
                quality TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
            [],
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            f(&guard)
        })
        .await
        .map_err(|e| Error::Io(std::io::Error::other(format!("cache task failed: {e}"))))?
    }
}

#[async_trait]
impl CacheGateway for SqliteCache {
    async fn lookup(&self, key: &str) -> Result<Option<CacheEntry>> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT track_id, file_id, quality, created_at FROM file_cache WHERE track_id = ?1",
                    params![key],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, DateTime<Utc>>(3)?,
                        ))
                    },
                )
                .optional()?;

            row.map(|(key, remote_file_ref, quality, created_at)| {
                Ok(CacheEntry {
                    key,
                    remote_file_ref,
                    quality: quality.parse()?,
                    created_at,
                })
            })
            .transpose()
        })
        .await
    }

    async fn store(&self, key: &str, remote_file_ref: &str, quality: Quality) -> Result<()> {
        let key = key.to_string();
        let remote_file_ref = remote_file_ref.to_string();
        self.with_conn(move |conn| {
            let inserted = conn.execute(
                "INSERT INTO file_cache (track_id, file_id, quality, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![key, remote_file_ref, quality.as_str(), Utc::now()],
            );
            match inserted {
                Ok(_) => {
                    debug!(%key, "cache entry stored");
                    Ok(())
                }
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == ErrorCode::ConstraintViolation =>
                {
                    Err(Error::DuplicateKey(key))
                }
                Err(e) => Err(Error::CacheWrite(e.to_string())),
            }
        })
        .await
    }

    async fn count(&self) -> Result<u64> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM file_cache", [], |row| row.get(0))?;
            Ok(n.max(0) as u64)
        })
        .await
    }
}
