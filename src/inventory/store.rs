use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use fs4::FileExt;
use indexmap::IndexMap;
use rusqlite::{Connection, OptionalExtension, Transaction};
use tracing::{debug, info, warn};

use crate::candidate::Candidate;
use crate::error::InventoryError;
use crate::inventory::layout;
use crate::inventory::types::{InstallToken, Origin, ReconcileReport, VersionEntry, VersionStatus};
use crate::version::ordering::compare_versions;
use crate::version::resolver::InventoryReader;

/// Reason recorded for installs found half-done at startup
pub const INTERRUPTED: &str = "interrupted";

/// Reason recorded for installed versions whose directory vanished
pub const MISSING_DIRECTORY: &str = "install directory missing";

const SCHEMA_VERSION: i32 = 1;

/// Durable record of installed versions and default pointers.
///
/// The database is the source of truth; each candidate's `current` link is
/// a projection of the `defaults` table and is rewritten when they disagree.
/// One process owns a data directory at a time, enforced by an advisory
/// lock held for the lifetime of the store.
pub struct InventoryStore {
    conn: Mutex<Connection>,
    candidates: IndexMap<String, Candidate>,
    _lock: File,
}

/// Columns of a `versions` row before validation
struct VersionRow {
    version: String,
    status: String,
    origin: String,
    size: Option<i64>,
    installed_at: Option<i64>,
    checksum: Option<String>,
    failure: Option<String>,
}

const VERSION_COLUMNS: &str =
    "version, status, origin, size, installed_at, checksum, failure";

impl VersionRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            version: row.get(0)?,
            status: row.get(1)?,
            origin: row.get(2)?,
            size: row.get(3)?,
            installed_at: row.get(4)?,
            checksum: row.get(5)?,
            failure: row.get(6)?,
        })
    }

    fn into_entry(self, candidate: &Candidate) -> Result<VersionEntry, InventoryError> {
        let status = self.status.parse::<VersionStatus>().map_err(|_| {
            InventoryError::Corrupt(format!(
                "{} {}: status {:?}",
                candidate.id, self.version, self.status
            ))
        })?;
        let origin = self.origin.parse::<Origin>().map_err(|_| {
            InventoryError::Corrupt(format!(
                "{} {}: origin {:?}",
                candidate.id, self.version, self.origin
            ))
        })?;

        Ok(VersionEntry {
            candidate: candidate.id.clone(),
            path: candidate.version_dir(&self.version),
            version: self.version,
            status,
            origin,
            size: self.size.map(|s| s.max(0) as u64),
            installed_at: self.installed_at.and_then(DateTime::from_timestamp_millis),
            checksum: self.checksum,
            failure: self.failure,
        })
    }
}

impl InventoryStore {
    /// Open (or create) the inventory at `db_path` for the given candidates
    pub fn open(db_path: &Path, candidates: &[Candidate]) -> Result<Self, InventoryError> {
        info!("Opening inventory database at {:?}", db_path);

        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let lock = Self::acquire_lock(db_path)?;

        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        // Every committed transition must survive power loss
        conn.pragma_update(None, "synchronous", "FULL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        let store = Self {
            conn: Mutex::new(conn),
            candidates: candidates
                .iter()
                .map(|c| (c.id.clone(), c.clone()))
                .collect(),
            _lock: lock,
        };
        store.create_schema()?;

        debug!("Inventory opened for {} candidates", store.candidates.len());
        Ok(store)
    }

    fn acquire_lock(db_path: &Path) -> Result<File, InventoryError> {
        let lock_path = db_path.with_extension("lock");
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(file),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(InventoryError::Locked(
                lock_path.display().to_string(),
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// Acquire database connection lock with proper error handling
    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>, InventoryError> {
        self.conn.lock().map_err(|_| InventoryError::LockPoisoned)
    }

    fn current_timestamp_ms() -> i64 {
        Utc::now().timestamp_millis()
    }

    fn create_schema(&self) -> Result<(), InventoryError> {
        let conn = self.lock_conn()?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS versions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                candidate TEXT NOT NULL,
                version TEXT NOT NULL,
                status TEXT NOT NULL,
                origin TEXT NOT NULL,
                size INTEGER,
                installed_at INTEGER,
                checksum TEXT,
                failure TEXT,
                updated_at INTEGER NOT NULL,
                UNIQUE(candidate, version)
            )
            "#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_versions_candidate ON versions(candidate)",
            [],
        )?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS defaults (
                candidate TEXT PRIMARY KEY,
                version TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
            [],
        )?;

        let current_version: i32 =
            conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
        if current_version < SCHEMA_VERSION {
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        }

        Ok(())
    }

    pub fn candidate(&self, id: &str) -> Result<&Candidate, InventoryError> {
        self.candidates
            .get(id)
            .ok_or_else(|| InventoryError::UnknownCandidate(id.to_string()))
    }

    pub fn candidates(&self) -> impl Iterator<Item = &Candidate> {
        self.candidates.values()
    }

    /// All records of a candidate, newest version first
    pub fn list(&self, candidate: &str) -> Result<Vec<VersionEntry>, InventoryError> {
        let candidate = self.candidate(candidate)?;
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM versions WHERE candidate = ?1",
            VERSION_COLUMNS
        ))?;
        let rows = stmt
            .query_map([&candidate.id], VersionRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        let mut entries = rows
            .into_iter()
            .map(|row| row.into_entry(candidate))
            .collect::<Result<Vec<_>, _>>()?;
        entries.sort_by(|a, b| compare_versions(&b.version, &a.version, candidate.scheme));
        Ok(entries)
    }

    pub fn get(&self, candidate: &str, version: &str) -> Result<Option<VersionEntry>, InventoryError> {
        let candidate = self.candidate(candidate)?;
        let conn = self.lock_conn()?;
        Self::query_entry(&conn, candidate, version)
    }

    fn query_entry(
        conn: &Connection,
        candidate: &Candidate,
        version: &str,
    ) -> Result<Option<VersionEntry>, InventoryError> {
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM versions WHERE candidate = ?1 AND version = ?2",
                    VERSION_COLUMNS
                ),
                (&candidate.id, version),
                VersionRow::from_row,
            )
            .optional()?;

        row.map(|row| row.into_entry(candidate)).transpose()
    }

    /// Number of Installed versions of a candidate
    pub fn installed_count(&self, candidate: &str) -> Result<usize, InventoryError> {
        let candidate = self.candidate(candidate)?;
        let conn = self.lock_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM versions WHERE candidate = ?1 AND status = ?2",
            (&candidate.id, VersionStatus::Installed.as_str()),
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Record that an install has begun. The entry is Downloading until
    /// [`commit_install`](Self::commit_install) or [`record_failure`](Self::record_failure).
    pub fn record_install_start(
        &self,
        candidate: &str,
        version: &str,
    ) -> Result<InstallToken, InventoryError> {
        let candidate = self.candidate(candidate)?;
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;

        let existing = Self::query_entry(&tx, candidate, version)?;
        if existing.is_some_and(|entry| entry.is_installed()) {
            return Err(InventoryError::AlreadyInstalled {
                candidate: candidate.id.clone(),
                version: version.to_string(),
            });
        }

        let now = Self::current_timestamp_ms();
        tx.execute(
            r#"
            INSERT INTO versions (candidate, version, status, origin, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(candidate, version) DO UPDATE SET
                status = excluded.status,
                origin = excluded.origin,
                size = NULL,
                installed_at = NULL,
                checksum = NULL,
                failure = NULL,
                updated_at = excluded.updated_at
            "#,
            (
                &candidate.id,
                version,
                VersionStatus::Downloading.as_str(),
                Origin::Managed.as_str(),
                now,
            ),
        )?;
        let id: i64 = tx.query_row(
            "SELECT id FROM versions WHERE candidate = ?1 AND version = ?2",
            (&candidate.id, version),
            |row| row.get(0),
        )?;
        tx.commit()?;

        debug!("Install started: {} {}", candidate.id, version);
        Ok(InstallToken {
            id,
            candidate: candidate.id.clone(),
            version: version.to_string(),
        })
    }

    /// Mark an in-progress install as Installed
    pub fn commit_install(
        &self,
        token: &InstallToken,
        size: u64,
        checksum: Option<&str>,
    ) -> Result<VersionEntry, InventoryError> {
        let candidate = self.candidate(&token.candidate)?;
        let conn = self.lock_conn()?;
        let now = Self::current_timestamp_ms();

        let updated = conn.execute(
            r#"
            UPDATE versions
            SET status = ?1, size = ?2, installed_at = ?3, checksum = ?4, failure = NULL, updated_at = ?3
            WHERE id = ?5 AND status = ?6
            "#,
            (
                VersionStatus::Installed.as_str(),
                size as i64,
                now,
                checksum,
                token.id,
                VersionStatus::Downloading.as_str(),
            ),
        )?;
        if updated == 0 {
            return Err(InventoryError::NotFound {
                candidate: token.candidate.clone(),
                version: token.version.clone(),
            });
        }

        info!("Installed {} {}", token.candidate, token.version);
        Self::query_entry(&conn, candidate, &token.version)?.ok_or_else(|| {
            InventoryError::NotFound {
                candidate: token.candidate.clone(),
                version: token.version.clone(),
            }
        })
    }

    /// Mark an in-progress install as Broken with a reason
    pub fn record_failure(&self, token: &InstallToken, reason: &str) -> Result<(), InventoryError> {
        let conn = self.lock_conn()?;
        let updated = conn.execute(
            "UPDATE versions SET status = ?1, failure = ?2, updated_at = ?3 WHERE id = ?4 AND status = ?5",
            (
                VersionStatus::Broken.as_str(),
                reason,
                Self::current_timestamp_ms(),
                token.id,
                VersionStatus::Downloading.as_str(),
            ),
        )?;

        if updated > 0 {
            warn!(
                "Install of {} {} marked broken: {}",
                token.candidate, token.version, reason
            );
        }
        Ok(())
    }

    /// Delete a version record. Fails if it is the candidate's default.
    pub fn remove(&self, candidate: &str, version: &str) -> Result<(), InventoryError> {
        let candidate = self.candidate(candidate)?;
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;

        if Self::query_default(&tx, &candidate.id)?.as_deref() == Some(version) {
            return Err(InventoryError::InUse {
                candidate: candidate.id.clone(),
                version: version.to_string(),
            });
        }

        let deleted = tx.execute(
            "DELETE FROM versions WHERE candidate = ?1 AND version = ?2",
            (&candidate.id, version),
        )?;
        if deleted == 0 {
            return Err(InventoryError::NotInstalled {
                candidate: candidate.id.clone(),
                version: version.to_string(),
            });
        }
        tx.commit()?;

        info!("Removed {} {} from inventory", candidate.id, version);
        Ok(())
    }

    fn query_default(conn: &Connection, candidate: &str) -> Result<Option<String>, InventoryError> {
        Ok(conn
            .query_row(
                "SELECT version FROM defaults WHERE candidate = ?1",
                [candidate],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Version the `current` link should name, if any
    pub fn default_version(&self, candidate: &str) -> Result<Option<String>, InventoryError> {
        let candidate = self.candidate(candidate)?;
        let conn = self.lock_conn()?;
        Self::query_default(&conn, &candidate.id)
    }

    /// Make an Installed version the default and repoint `current`
    pub fn set_default(&self, candidate: &str, version: &str) -> Result<VersionEntry, InventoryError> {
        let candidate = self.candidate(candidate)?;
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;

        let entry = match Self::query_entry(&tx, candidate, version)? {
            Some(entry) if entry.is_installed() => entry,
            _ => {
                return Err(InventoryError::NotInstalled {
                    candidate: candidate.id.clone(),
                    version: version.to_string(),
                });
            }
        };

        Self::write_default(&tx, &candidate.id, version)?;
        // Link before commit: a failed link leaves the old default in place
        layout::point_current(candidate, version)?;
        tx.commit()?;

        info!("Default for {} is now {}", candidate.id, version);
        Ok(entry)
    }

    fn write_default(tx: &Transaction<'_>, candidate: &str, version: &str) -> Result<(), InventoryError> {
        tx.execute(
            r#"
            INSERT INTO defaults (candidate, version, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(candidate) DO UPDATE SET version = excluded.version, updated_at = excluded.updated_at
            "#,
            (candidate, version, Self::current_timestamp_ms()),
        )?;
        Ok(())
    }

    /// Remove the default pointer, returning the version it named
    pub fn clear_default(&self, candidate: &str) -> Result<Option<String>, InventoryError> {
        let candidate = self.candidate(candidate)?;
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;

        let previous = Self::query_default(&tx, &candidate.id)?;
        tx.execute("DELETE FROM defaults WHERE candidate = ?1", [&candidate.id])?;
        layout::remove_current(candidate)?;
        tx.commit()?;

        if let Some(version) = &previous {
            info!("Cleared default {} for {}", version, candidate.id);
        }
        Ok(previous)
    }

    /// Bring records, directories and links back in line after a crash or
    /// outside changes to the candidate roots
    pub fn reconcile(&self) -> Result<ReconcileReport, InventoryError> {
        let mut report = ReconcileReport::default();
        for candidate in self.candidates.values() {
            self.reconcile_candidate(candidate, &mut report)?;
        }

        if !report.is_empty() {
            info!(
                "Reconciled inventory: {} interrupted, {} missing, {} adopted, {} defaults adopted",
                report.interrupted.len(),
                report.missing.len(),
                report.adopted.len(),
                report.adopted_defaults.len()
            );
        }
        Ok(report)
    }

    fn reconcile_candidate(
        &self,
        candidate: &Candidate,
        report: &mut ReconcileReport,
    ) -> Result<(), InventoryError> {
        fs::create_dir_all(&candidate.root)?;

        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        let now = Self::current_timestamp_ms();
        let id = &candidate.id;

        let rows = {
            let mut stmt = tx.prepare(&format!(
                "SELECT {} FROM versions WHERE candidate = ?1",
                VERSION_COLUMNS
            ))?;
            stmt.query_map([id], VersionRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?
        };
        let entries = rows
            .into_iter()
            .map(|row| row.into_entry(candidate))
            .collect::<Result<Vec<_>, _>>()?;

        let mut default = Self::query_default(&tx, id)?;

        for entry in &entries {
            let reason = match entry.status {
                VersionStatus::Downloading => {
                    report.interrupted.push((id.clone(), entry.version.clone()));
                    INTERRUPTED
                }
                VersionStatus::Installed if !entry.path.is_dir() => {
                    report.missing.push((id.clone(), entry.version.clone()));
                    MISSING_DIRECTORY
                }
                _ => continue,
            };

            warn!("{} {}: {}", id, entry.version, reason);
            tx.execute(
                "UPDATE versions SET status = ?1, failure = ?2, updated_at = ?3 WHERE candidate = ?4 AND version = ?5",
                (VersionStatus::Broken.as_str(), reason, now, id, &entry.version),
            )?;
            if default.as_deref() == Some(entry.version.as_str()) {
                tx.execute("DELETE FROM defaults WHERE candidate = ?1", [id])?;
                default = None;
            }
        }

        let known: HashSet<&str> = entries.iter().map(|e| e.version.as_str()).collect();
        let mut installed: HashSet<String> = entries
            .iter()
            .filter(|e| e.is_installed() && e.path.is_dir())
            .map(|e| e.version.clone())
            .collect();

        for version in layout::scan_version_dirs(candidate)? {
            if known.contains(version.as_str()) {
                continue;
            }
            let size = layout::dir_size(&candidate.version_dir(&version));
            tx.execute(
                r#"
                INSERT INTO versions (candidate, version, status, origin, size, installed_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                "#,
                (
                    id,
                    &version,
                    VersionStatus::Installed.as_str(),
                    Origin::Unmanaged.as_str(),
                    size as i64,
                    now,
                ),
            )?;
            info!("Adopted unmanaged {} {}", id, version);
            report.adopted.push((id.clone(), version.clone()));
            installed.insert(version);
        }

        let linked = layout::read_current(candidate)?;
        match (&default, linked) {
            (None, Some(linked)) if installed.contains(&linked) => {
                Self::write_default(&tx, id, &linked)?;
                info!("Adopted existing default {} {}", id, linked);
                report.adopted_defaults.push((id.clone(), linked));
            }
            (None, Some(_)) => layout::remove_current(candidate)?,
            (Some(default), linked) if linked.as_deref() != Some(default.as_str()) => {
                layout::point_current(candidate, default)?;
            }
            _ => {}
        }

        tx.commit()?;
        Ok(())
    }
}

impl InventoryReader for InventoryStore {
    fn get_default(&self, candidate: &str) -> Result<VersionEntry, InventoryError> {
        let candidate = self.candidate(candidate)?;
        let conn = self.lock_conn()?;
        let version = Self::query_default(&conn, &candidate.id)?
            .ok_or_else(|| InventoryError::NoDefaultSet(candidate.id.clone()))?;

        Self::query_entry(&conn, candidate, &version)?
            .ok_or_else(|| InventoryError::NoDefaultSet(candidate.id.clone()))
    }
}
