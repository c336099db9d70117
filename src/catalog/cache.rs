use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use rusqlite::Connection;
use tracing::{debug, info};

use crate::catalog::types::{CandidateCatalog, CatalogSnapshot, RemoteVersion};
use crate::error::CatalogError;

/// Last-known catalog kept across restarts so queries work offline
pub struct CatalogCache {
    conn: Mutex<Connection>,
}

impl CatalogCache {
    pub fn new(db_path: &Path) -> Result<Self, CatalogError> {
        info!("Initializing catalog cache at {:?}", db_path);

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CatalogError::Cache(e.to_string()))?;
        }
        let conn = Connection::open(db_path)?;

        // Enable WAL mode for better concurrency
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        let cache = Self {
            conn: Mutex::new(conn),
        };
        cache.create_schema()?;
        Ok(cache)
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>, CatalogError> {
        self.conn
            .lock()
            .map_err(|_| CatalogError::Cache("connection lock poisoned".to_string()))
    }

    fn create_schema(&self) -> Result<(), CatalogError> {
        let conn = self.lock_conn()?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS candidates (
                id TEXT PRIMARY KEY,
                fetched_at INTEGER NOT NULL
            )
            "#,
            [],
        )?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS versions (
                candidate TEXT NOT NULL,
                position INTEGER NOT NULL,
                version TEXT NOT NULL,
                vendor TEXT,
                url TEXT NOT NULL,
                sha256 TEXT,
                FOREIGN KEY (candidate) REFERENCES candidates(id) ON DELETE CASCADE,
                PRIMARY KEY (candidate, position)
            )
            "#,
            [],
        )?;

        Ok(())
    }

    /// Rebuild the snapshot from disk
    pub fn load(&self) -> Result<CatalogSnapshot, CatalogError> {
        let conn = self.lock_conn()?;

        let candidates: Vec<(String, i64)> = {
            let mut stmt = conn.prepare("SELECT id, fetched_at FROM candidates ORDER BY id")?;
            stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<_, _>>()?
        };

        let mut stmt = conn.prepare(
            "SELECT version, vendor, url, sha256 FROM versions WHERE candidate = ?1 ORDER BY position",
        )?;

        let mut snapshot = CatalogSnapshot {
            candidates: IndexMap::new(),
            fetched_at: None,
        };
        for (id, fetched_at_ms) in candidates {
            let Some(fetched_at) = DateTime::<Utc>::from_timestamp_millis(fetched_at_ms) else {
                debug!("Skipping cached {} with invalid fetch time", id);
                continue;
            };
            let versions = stmt
                .query_map([&id], |row| {
                    Ok(RemoteVersion {
                        identifier: row.get(0)?,
                        vendor: row.get(1)?,
                        url: row.get(2)?,
                        sha256: row.get(3)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            if snapshot.fetched_at.is_none_or(|latest| latest < fetched_at) {
                snapshot.fetched_at = Some(fetched_at);
            }
            snapshot
                .candidates
                .insert(id, CandidateCatalog::new(versions, fetched_at));
        }

        debug!("Loaded {} cached candidates", snapshot.candidates.len());
        Ok(snapshot)
    }

    /// Replace the stored versions of one candidate
    pub fn save_candidate(&self, id: &str, catalog: &CandidateCatalog) -> Result<(), CatalogError> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            r#"
            INSERT INTO candidates (id, fetched_at) VALUES (?1, ?2)
            ON CONFLICT(id) DO UPDATE SET fetched_at = excluded.fetched_at
            "#,
            (id, catalog.fetched_at.timestamp_millis()),
        )?;
        tx.execute("DELETE FROM versions WHERE candidate = ?1", [id])?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO versions (candidate, position, version, vendor, url, sha256) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for (position, version) in catalog.versions.iter().enumerate() {
                stmt.execute((
                    id,
                    position as i64,
                    &version.identifier,
                    &version.vendor,
                    &version.url,
                    &version.sha256,
                ))?;
            }
        }

        tx.commit()?;
        debug!("Cached {} versions for {}", catalog.versions.len(), id);
        Ok(())
    }
}
