//! Orchestration of catalog, inventory and installer per candidate
//!
//! ```text
//!                     ┌──────────────────────────────┐
//!  install(java, tok) │        CandidateEngine       │
//!  ──────────────────►│                              │
//!                     │  resolve ──► VersionResolver │
//!                     │     │                        │
//!                     │  lock(java)   OperationLocks │
//!                     │     │                        │
//!                     │  record_install_start        │──► InventoryStore
//!                     │  install ────────────────────│──► ArchiveInstaller
//!                     │  commit / record_failure     │──► InventoryStore
//!                     │  publish ────────────────────│──► ChangeNotifier
//!                     └──────────────────────────────┘
//! ```
//!
//! Install, uninstall and default changes on one candidate never overlap.
//! Refreshes do not take the candidate lock; the catalog client coalesces
//! them on its own.

mod locks;
pub mod query;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use indexmap::IndexMap;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::candidate::{Candidate, is_valid_version_identifier};
use crate::catalog::cache::CatalogCache;
use crate::catalog::http::HttpCatalogSource;
use crate::catalog::{CatalogClient, CatalogSnapshot, RefreshScope};
use crate::config::EngineConfig;
use crate::error::{EngineError, InventoryError, ResolveError};
use crate::installer::{ArchiveInstaller, HttpArchiveInstaller, InstallRequest, ProgressFn};
use crate::inventory::store::INTERRUPTED;
use crate::inventory::{InstallToken, InventoryStore, ReconcileReport, VersionEntry};
use crate::notify::{ChangeNotifier, EventKind, Subscription};
use crate::version::resolver::{InventoryReader, VersionResolver, VersionToken};

use locks::OperationLocks;

pub use query::{CandidateFilter, CandidateSummary, VersionFilter, VersionListing};

/// Tunables taken from [`EngineConfig`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Catalog data older than this is refreshed before resolving "latest"
    pub catalog_max_age: Duration,
    pub event_buffer: usize,
}

impl From<&EngineConfig> for EngineSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            catalog_max_age: millis(config.catalog.max_age),
            event_buffer: config.events.buffer_size,
        }
    }
}

/// Per-call install controls
#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    /// Overrides the installer's download timeout
    pub deadline: Option<Instant>,
    pub cancel: CancellationToken,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    Installed(VersionEntry),
    /// The resolved version was already installed; nothing was done
    AlreadyInstalled(VersionEntry),
}

impl InstallOutcome {
    pub fn entry(&self) -> &VersionEntry {
        match self {
            InstallOutcome::Installed(entry) | InstallOutcome::AlreadyInstalled(entry) => entry,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, InstallOutcome::Installed(_))
    }
}

pub struct CandidateEngine {
    candidates: IndexMap<String, Candidate>,
    inventory: Arc<InventoryStore>,
    catalog: CatalogClient,
    installer: Arc<dyn ArchiveInstaller>,
    notifier: Arc<ChangeNotifier>,
    locks: OperationLocks,
    settings: EngineSettings,
    startup_report: ReconcileReport,
}

/// Install record between `record_install_start` and its outcome.
///
/// Dropped without an outcome (the install future was cancelled), the entry
/// is marked Broken right away instead of waiting for the next reconcile.
struct PendingInstall {
    inventory: Arc<InventoryStore>,
    token: InstallToken,
    settled: bool,
}

impl PendingInstall {
    fn new(inventory: Arc<InventoryStore>, token: InstallToken) -> Self {
        Self {
            inventory,
            token,
            settled: false,
        }
    }

    fn commit(mut self, size: u64, checksum: &str) -> Result<VersionEntry, EngineError> {
        let entry = self
            .inventory
            .commit_install(&self.token, size, Some(checksum))?;
        self.settled = true;
        Ok(entry)
    }

    fn fail(mut self, reason: &str) -> Result<(), EngineError> {
        self.settled = true;
        self.inventory.record_failure(&self.token, reason)?;
        Ok(())
    }
}

impl Drop for PendingInstall {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        warn!(
            "Install of {} {} abandoned before completing",
            self.token.candidate, self.token.version
        );
        let _ = self
            .inventory
            .record_failure(&self.token, INTERRUPTED)
            .inspect_err(|e| error!("Failed to record abandoned install: {}", e));
    }
}

impl CandidateEngine {
    /// Open the engine against the real catalog endpoint and data directory
    pub fn open(config: &EngineConfig) -> Result<Self, EngineError> {
        let candidates_dir = config.candidates_dir();
        let candidates: Vec<Candidate> = config
            .candidates
            .iter()
            .map(|c| Candidate::from_config(c, &candidates_dir))
            .collect();

        let inventory = InventoryStore::open(&config.inventory_db_path(), &candidates)?;

        let source = HttpCatalogSource::new(&config.catalog.url, millis(config.catalog.fetch_timeout))?;
        let cache = CatalogCache::new(&config.catalog_db_path())
            .inspect_err(|e| warn!("Catalog cache unavailable, continuing without it: {}", e))
            .ok();
        let catalog = CatalogClient::new(
            Arc::new(source),
            cache,
            candidates.iter().map(|c| c.id.clone()).collect(),
            millis(config.catalog.fetch_timeout),
        );

        let archives_dir = config.install.keep_downloads.then(|| config.archives_dir());
        let installer =
            HttpArchiveInstaller::new(millis(config.install.download_timeout), archives_dir)?;

        Self::new(
            candidates,
            inventory,
            catalog,
            Arc::new(installer),
            EngineSettings::from(config),
        )
    }

    /// Assemble an engine from its parts and reconcile the inventory with disk
    pub fn new(
        candidates: Vec<Candidate>,
        inventory: InventoryStore,
        catalog: CatalogClient,
        installer: Arc<dyn ArchiveInstaller>,
        settings: EngineSettings,
    ) -> Result<Self, EngineError> {
        let startup_report = inventory.reconcile()?;
        let candidates: IndexMap<String, Candidate> =
            candidates.into_iter().map(|c| (c.id.clone(), c)).collect();
        let locks = OperationLocks::new(candidates.keys().map(String::as_str));

        info!("Engine ready with {} candidates", candidates.len());
        Ok(Self {
            candidates,
            inventory: Arc::new(inventory),
            catalog,
            installer,
            notifier: Arc::new(ChangeNotifier::new(settings.event_buffer)),
            locks,
            settings,
            startup_report,
        })
    }

    /// What reconciliation changed when the engine was opened
    pub fn startup_report(&self) -> &ReconcileReport {
        &self.startup_report
    }

    pub fn candidate(&self, id: &str) -> Result<&Candidate, EngineError> {
        self.candidates
            .get(id)
            .ok_or_else(|| EngineError::UnknownCandidate(id.to_string()))
    }

    pub fn subscribe(&self) -> Subscription {
        self.notifier.subscribe()
    }

    /// The installed default version of a candidate
    pub fn get_default(&self, candidate: &str) -> Result<VersionEntry, EngineError> {
        self.candidate(candidate)?;
        Ok(self.inventory.get_default(candidate)?)
    }

    pub async fn install(
        &self,
        candidate: &str,
        token: &VersionToken,
    ) -> Result<InstallOutcome, EngineError> {
        self.install_with(candidate, token, InstallOptions::default())
            .await
    }

    /// Resolve `token` and install the version it names.
    ///
    /// Failures leave the version Broken and are never retried here.
    pub async fn install_with(
        &self,
        candidate: &str,
        token: &VersionToken,
        options: InstallOptions,
    ) -> Result<InstallOutcome, EngineError> {
        let candidate = self.candidate(candidate)?;

        if let VersionToken::Exact(version) = token {
            if let Some(entry) = self.installed_entry(&candidate.id, version)? {
                debug!("{} {} already installed", candidate.id, version);
                return Ok(InstallOutcome::AlreadyInstalled(entry));
            }
        }

        let snapshot = self.snapshot_for(candidate, token).await?;
        let version = self.resolver(&snapshot).resolve(candidate, token)?;

        let _guard = self.locks.acquire(&candidate.id).await?;

        // Another caller may have finished the same install while we waited
        if let Some(entry) = self.inventory.get(&candidate.id, &version)? {
            if entry.is_installed() {
                return Ok(InstallOutcome::AlreadyInstalled(entry));
            }
            if entry.path.exists() {
                info!("Clearing leftovers of {} {}", candidate.id, version);
                self.installer
                    .uninstall(candidate, &version, &entry.path)
                    .await
                    .map_err(|source| EngineError::Install {
                        candidate: candidate.id.clone(),
                        version: version.clone(),
                        source,
                    })?;
            }
        }

        let remote = snapshot
            .find(&candidate.id, &version)
            .ok_or_else(|| ResolveError::UnknownVersion {
                candidate: candidate.id.clone(),
                version: version.clone(),
            })?;

        let install_token = self.inventory.record_install_start(&candidate.id, &version)?;
        let pending = PendingInstall::new(Arc::clone(&self.inventory), install_token);

        let request = InstallRequest {
            candidate: candidate.clone(),
            version: version.clone(),
            url: remote.url.clone(),
            sha256: remote.sha256.clone(),
            destination: candidate.version_dir(&version),
            deadline: options.deadline,
            cancel: options.cancel,
            progress: Some(self.progress_reporter(&candidate.id, &version)),
        };

        info!("Installing {} {}", candidate.id, version);
        match self.installer.install(request).await {
            Ok(receipt) => {
                let entry = pending.commit(receipt.size, &receipt.checksum)?;
                info!("Installed {} {} ({} bytes)", candidate.id, version, receipt.size);
                self.notifier.publish(
                    &candidate.id,
                    EventKind::Installed {
                        version: version.clone(),
                    },
                );
                Ok(InstallOutcome::Installed(entry))
            }
            Err(source) => {
                error!("Install of {} {} failed: {}", candidate.id, version, source);
                let reason = source.to_string();
                pending.fail(&reason)?;
                self.notifier.publish(
                    &candidate.id,
                    EventKind::InstallFailed {
                        version: version.clone(),
                        reason,
                    },
                );
                Err(EngineError::Install {
                    candidate: candidate.id.clone(),
                    version,
                    source,
                })
            }
        }
    }

    /// Remove an installed version. The default version cannot be removed.
    pub async fn uninstall(&self, candidate: &str, version: &str) -> Result<(), EngineError> {
        let candidate = self.candidate(candidate)?;
        check_identifier(candidate, version)?;
        let _guard = self.locks.acquire(&candidate.id).await?;

        if self.inventory.default_version(&candidate.id)?.as_deref() == Some(version) {
            return Err(EngineError::CannotRemoveDefault {
                candidate: candidate.id.clone(),
                version: version.to_string(),
            });
        }

        let path = match self.inventory.get(&candidate.id, version)? {
            Some(entry) => entry.path,
            None => {
                return Err(InventoryError::NotInstalled {
                    candidate: candidate.id.clone(),
                    version: version.to_string(),
                }
                .into());
            }
        };

        self.installer
            .uninstall(candidate, version, &path)
            .await
            .map_err(|source| EngineError::Uninstall {
                candidate: candidate.id.clone(),
                version: version.to_string(),
                source,
            })?;
        self.inventory.remove(&candidate.id, version)?;

        info!("Uninstalled {} {}", candidate.id, version);
        self.notifier.publish(
            &candidate.id,
            EventKind::Uninstalled {
                version: version.to_string(),
            },
        );
        Ok(())
    }

    /// Point the candidate's default at an installed version
    pub async fn set_default(
        &self,
        candidate: &str,
        version: &str,
    ) -> Result<VersionEntry, EngineError> {
        let candidate = self.candidate(candidate)?;
        check_identifier(candidate, version)?;
        let _guard = self.locks.acquire(&candidate.id).await?;

        let previous = self.inventory.default_version(&candidate.id)?;
        let entry = self.inventory.set_default(&candidate.id, version)?;

        if previous.as_deref() != Some(version) {
            self.notifier.publish(
                &candidate.id,
                EventKind::DefaultChanged {
                    previous,
                    current: Some(version.to_string()),
                },
            );
        }
        Ok(entry)
    }

    /// Drop the default pointer, returning the version it named
    pub async fn clear_default(&self, candidate: &str) -> Result<Option<String>, EngineError> {
        let candidate = self.candidate(candidate)?;
        let _guard = self.locks.acquire(&candidate.id).await?;

        let previous = self.inventory.clear_default(&candidate.id)?;
        if previous.is_some() {
            self.notifier.publish(
                &candidate.id,
                EventKind::DefaultChanged {
                    previous: previous.clone(),
                    current: None,
                },
            );
        }
        Ok(previous)
    }

    /// Refresh one candidate's catalog, or every candidate's when `None`.
    ///
    /// A refresh event is published once per candidate whose data was
    /// swapped in, including the successful ones of a partially failed
    /// refresh-all.
    pub async fn refresh(&self, candidate: Option<&str>) -> Result<Arc<CatalogSnapshot>, EngineError> {
        let scope = match candidate {
            Some(id) => RefreshScope::Candidate(self.candidate(id)?.id.clone()),
            None => RefreshScope::All,
        };
        self.refresh_scope(scope).await
    }

    async fn refresh_scope(&self, scope: RefreshScope) -> Result<Arc<CatalogSnapshot>, EngineError> {
        let refreshed = self.catalog.refresh_tracked(scope).await;

        // Callers that joined another refresh leave the event to its leader
        for id in &refreshed.swapped {
            self.notifier.publish(id, EventKind::CatalogRefreshed);
        }

        Ok(refreshed.result?)
    }

    /// Snapshot to resolve `token` against, refreshing first when the
    /// catalog cannot answer
    async fn snapshot_for(
        &self,
        candidate: &Candidate,
        token: &VersionToken,
    ) -> Result<Arc<CatalogSnapshot>, EngineError> {
        let snapshot = self.catalog.current();
        let needs_refresh = match token {
            VersionToken::Latest => !self.resolver(&snapshot).is_fresh(&candidate.id),
            // The download URL only comes from the catalog
            VersionToken::Exact(_) => !snapshot.has_candidate(&candidate.id),
            VersionToken::Default => false,
        };

        if !needs_refresh {
            return Ok(snapshot);
        }
        debug!("Catalog for {} missing or stale, refreshing", candidate.id);
        self.refresh_scope(RefreshScope::Candidate(candidate.id.clone()))
            .await
    }

    fn resolver<'a>(&'a self, snapshot: &'a CatalogSnapshot) -> VersionResolver<'a> {
        VersionResolver::new(
            snapshot,
            self.inventory.as_ref(),
            self.settings.catalog_max_age,
            Utc::now(),
        )
    }

    fn installed_entry(
        &self,
        candidate: &str,
        version: &str,
    ) -> Result<Option<VersionEntry>, EngineError> {
        Ok(self
            .inventory
            .get(candidate, version)?
            .filter(VersionEntry::is_installed))
    }

    fn progress_reporter(&self, candidate: &str, version: &str) -> ProgressFn {
        let notifier = Arc::clone(&self.notifier);
        let candidate = candidate.to_string();
        let version = version.to_string();
        Arc::new(move |phase| {
            notifier.publish(
                &candidate,
                EventKind::Progress {
                    version: version.clone(),
                    phase,
                },
            )
        })
    }
}

/// Identifiers that would not land directly inside the candidate root are
/// reported as unknown versions
fn check_identifier(candidate: &Candidate, version: &str) -> Result<(), ResolveError> {
    if is_valid_version_identifier(version) {
        Ok(())
    } else {
        Err(ResolveError::UnknownVersion {
            candidate: candidate.id.clone(),
            version: version.to_string(),
        })
    }
}

fn millis(ms: i64) -> Duration {
    Duration::from_millis(ms.max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::RemoteVersion;
    use crate::catalog::source::MockCatalogSource;
    use crate::error::{CatalogError, ErrorKind, InstallError};
    use crate::installer::{InstallReceipt, MockArchiveInstaller};
    use crate::inventory::VersionStatus;
    use crate::version::ordering::VersionScheme;
    use tempfile::TempDir;

    fn remote(version: &str) -> RemoteVersion {
        RemoteVersion {
            identifier: version.to_string(),
            vendor: None,
            url: format!("https://downloads.example.com/java/{}.tar.gz", version),
            sha256: None,
        }
    }

    fn catalog_with(versions: &'static [&'static str]) -> MockCatalogSource {
        let mut source = MockCatalogSource::new();
        source
            .expect_fetch_versions()
            .returning(move |_| Ok(versions.iter().map(|v| remote(v)).collect()));
        source
    }

    fn installer_that_unpacks() -> MockArchiveInstaller {
        let mut installer = MockArchiveInstaller::new();
        installer.expect_install().returning(|request| {
            std::fs::create_dir_all(request.destination.join("bin")).unwrap();
            Ok(InstallReceipt {
                path: request.destination,
                size: 42,
                checksum: "abc123".to_string(),
            })
        });
        installer.expect_uninstall().returning(|_, _, path| {
            let _ = std::fs::remove_dir_all(path);
            Ok(())
        });
        installer.expect_has_cached_archive().return_const(false);
        installer
    }

    fn engine(
        temp_dir: &TempDir,
        source: MockCatalogSource,
        installer: MockArchiveInstaller,
    ) -> CandidateEngine {
        let candidates = vec![
            Candidate::new(
                "java",
                "Java",
                temp_dir.path().join("candidates/java"),
                VersionScheme::Numeric,
            ),
            Candidate::new(
                "maven",
                "Maven",
                temp_dir.path().join("candidates/maven"),
                VersionScheme::Numeric,
            ),
        ];
        let inventory =
            InventoryStore::open(&temp_dir.path().join("inventory.db"), &candidates).unwrap();
        let catalog = CatalogClient::new(
            Arc::new(source),
            None,
            vec!["java".to_string(), "maven".to_string()],
            Duration::from_secs(5),
        );
        CandidateEngine::new(
            candidates,
            inventory,
            catalog,
            Arc::new(installer),
            EngineSettings {
                catalog_max_age: Duration::from_secs(3600),
                event_buffer: 64,
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn install_latest_refreshes_then_installs_newest() {
        let temp_dir = TempDir::new().unwrap();
        let engine = engine(
            &temp_dir,
            catalog_with(&["17.0.9", "21.0.1", "11.0.21"]),
            installer_that_unpacks(),
        );

        let outcome = engine.install("java", &VersionToken::Latest).await.unwrap();

        assert!(outcome.is_new());
        assert_eq!(outcome.entry().version, "21.0.1");
        assert_eq!(outcome.entry().status, VersionStatus::Installed);
        assert_eq!(outcome.entry().size, Some(42));
    }

    #[tokio::test]
    async fn installing_an_installed_version_is_a_no_op() {
        let temp_dir = TempDir::new().unwrap();
        let mut installer = MockArchiveInstaller::new();
        installer.expect_install().times(1).returning(|request| {
            std::fs::create_dir_all(&request.destination).unwrap();
            Ok(InstallReceipt {
                path: request.destination,
                size: 1,
                checksum: "00".to_string(),
            })
        });
        let engine = engine(&temp_dir, catalog_with(&["21.0.1"]), installer);
        let token = VersionToken::Exact("21.0.1".to_string());

        let first = engine.install("java", &token).await.unwrap();
        let second = engine.install("java", &token).await.unwrap();

        assert!(first.is_new());
        assert!(matches!(second, InstallOutcome::AlreadyInstalled(_)));
    }

    #[tokio::test]
    async fn failed_install_marks_version_broken_and_emits_event() {
        let temp_dir = TempDir::new().unwrap();
        let mut installer = MockArchiveInstaller::new();
        installer.expect_install().returning(|_| {
            Err(InstallError::Checksum {
                expected: "aa".to_string(),
                actual: "bb".to_string(),
            })
        });
        let engine = engine(&temp_dir, catalog_with(&["21.0.1"]), installer);
        let mut events = engine.subscribe();

        let err = engine
            .install("java", &VersionToken::Exact("21.0.1".to_string()))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Checksum);
        let entry = engine.inventory.get("java", "21.0.1").unwrap().unwrap();
        assert_eq!(entry.status, VersionStatus::Broken);

        let mut saw_failure = false;
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_millis(50), events.next()).await
        {
            if matches!(event.kind, EventKind::InstallFailed { .. }) {
                saw_failure = true;
            }
        }
        assert!(saw_failure);
    }

    #[tokio::test]
    async fn unknown_exact_version_is_rejected_after_refresh() {
        let temp_dir = TempDir::new().unwrap();
        let engine = engine(&temp_dir, catalog_with(&["21.0.1"]), installer_that_unpacks());

        let err = engine
            .install("java", &VersionToken::Exact("99".to_string()))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::UnknownVersion);
    }

    #[tokio::test]
    async fn identifiers_outside_candidate_root_are_never_touched() {
        let temp_dir = TempDir::new().unwrap();
        let engine = engine(
            &temp_dir,
            catalog_with(&["../../escaped", "current", "21.0.1"]),
            installer_that_unpacks(),
        );
        let escaped = temp_dir.path().join("escaped");

        for version in ["../../escaped", "current"] {
            let token = VersionToken::Exact(version.to_string());
            let err = engine.install("java", &token).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::UnknownVersion, "{}", version);
            assert!(engine.inventory.get("java", version).unwrap().is_none());
        }
        assert!(!escaped.exists());

        let latest = engine.install("java", &VersionToken::Latest).await.unwrap();
        assert_eq!(latest.entry().version, "21.0.1");

        std::fs::create_dir_all(&escaped).unwrap();
        let err = engine.uninstall("java", "../../escaped").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownVersion);
        assert!(escaped.exists());

        let err = engine.set_default("java", "../../escaped").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownVersion);
    }

    #[tokio::test]
    async fn refresh_failure_propagates_from_install_latest() {
        let temp_dir = TempDir::new().unwrap();
        let mut source = MockCatalogSource::new();
        source
            .expect_fetch_versions()
            .returning(|_| Err(CatalogError::Network("connection refused".to_string())));
        let engine = engine(&temp_dir, source, installer_that_unpacks());

        let err = engine.install("java", &VersionToken::Latest).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Network);
        assert!(engine.inventory.get("java", "21.0.1").unwrap().is_none());
    }

    #[tokio::test]
    async fn default_cannot_be_uninstalled() {
        let temp_dir = TempDir::new().unwrap();
        let engine = engine(&temp_dir, catalog_with(&["21.0.1"]), installer_that_unpacks());
        engine
            .install("java", &VersionToken::Exact("21.0.1".to_string()))
            .await
            .unwrap();
        engine.set_default("java", "21.0.1").await.unwrap();

        let err = engine.uninstall("java", "21.0.1").await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::CannotRemoveDefault);
        assert!(engine.inventory.get("java", "21.0.1").unwrap().is_some());
    }

    #[tokio::test]
    async fn uninstall_after_clearing_default() {
        let temp_dir = TempDir::new().unwrap();
        let engine = engine(&temp_dir, catalog_with(&["21.0.1"]), installer_that_unpacks());
        engine
            .install("java", &VersionToken::Exact("21.0.1".to_string()))
            .await
            .unwrap();
        engine.set_default("java", "21.0.1").await.unwrap();

        assert_eq!(
            engine.clear_default("java").await.unwrap().as_deref(),
            Some("21.0.1")
        );
        engine.uninstall("java", "21.0.1").await.unwrap();

        assert!(engine.inventory.get("java", "21.0.1").unwrap().is_none());
        assert_eq!(
            engine.get_default("java").unwrap_err().kind(),
            ErrorKind::NoDefaultSet
        );
    }

    #[tokio::test]
    async fn uninstalling_unknown_version_is_not_installed() {
        let temp_dir = TempDir::new().unwrap();
        let engine = engine(&temp_dir, catalog_with(&[]), installer_that_unpacks());

        let err = engine.uninstall("java", "8.0.392").await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotInstalled);
    }

    #[tokio::test]
    async fn set_default_publishes_previous_and_current() {
        let temp_dir = TempDir::new().unwrap();
        let engine = engine(
            &temp_dir,
            catalog_with(&["17.0.9", "21.0.1"]),
            installer_that_unpacks(),
        );
        for version in ["17.0.9", "21.0.1"] {
            engine
                .install("java", &VersionToken::Exact(version.to_string()))
                .await
                .unwrap();
        }
        engine.set_default("java", "17.0.9").await.unwrap();
        let mut events = engine.subscribe();

        engine.set_default("java", "21.0.1").await.unwrap();

        let event = events.next().await.unwrap();
        assert_eq!(event.candidate, "java");
        assert_eq!(
            event.kind,
            EventKind::DefaultChanged {
                previous: Some("17.0.9".to_string()),
                current: Some("21.0.1".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn unknown_candidate_is_rejected_everywhere() {
        let temp_dir = TempDir::new().unwrap();
        let engine = engine(&temp_dir, catalog_with(&[]), installer_that_unpacks());

        let kinds = [
            engine
                .install("node", &VersionToken::Latest)
                .await
                .unwrap_err()
                .kind(),
            engine.uninstall("node", "1").await.unwrap_err().kind(),
            engine.set_default("node", "1").await.unwrap_err().kind(),
            engine.refresh(Some("node")).await.unwrap_err().kind(),
            engine.get_default("node").unwrap_err().kind(),
        ];

        assert!(kinds.iter().all(|k| *k == ErrorKind::UnknownCandidate));
    }

    #[tokio::test]
    async fn refresh_publishes_catalog_event() {
        let temp_dir = TempDir::new().unwrap();
        let engine = engine(&temp_dir, catalog_with(&["3.9.6"]), installer_that_unpacks());
        let mut events = engine.subscribe();

        engine.refresh(Some("maven")).await.unwrap();

        let event = events.next().await.unwrap();
        assert_eq!(event.candidate, "maven");
        assert_eq!(event.kind, EventKind::CatalogRefreshed);
    }

    #[tokio::test]
    async fn cancelled_install_leaves_version_broken() {
        let temp_dir = TempDir::new().unwrap();
        let mut installer = MockArchiveInstaller::new();
        installer
            .expect_install()
            .returning(|_| Err(InstallError::Cancelled));
        let engine = engine(&temp_dir, catalog_with(&["21.0.1"]), installer);

        let err = engine
            .install("java", &VersionToken::Exact("21.0.1".to_string()))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Cancelled);
        let entry = engine.inventory.get("java", "21.0.1").unwrap().unwrap();
        assert_eq!(entry.status, VersionStatus::Broken);
    }

    /// Never finishes an install
    struct StalledInstaller;

    #[async_trait::async_trait]
    impl ArchiveInstaller for StalledInstaller {
        async fn install(&self, _request: InstallRequest) -> Result<InstallReceipt, InstallError> {
            std::future::pending().await
        }

        async fn uninstall(
            &self,
            _candidate: &Candidate,
            _version: &str,
            _path: &std::path::Path,
        ) -> Result<(), InstallError> {
            Ok(())
        }

        fn has_cached_archive(&self, _candidate: &str, _version: &str) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn dropped_install_future_marks_version_broken() {
        let temp_dir = TempDir::new().unwrap();
        let engine = engine(&temp_dir, catalog_with(&["21.0.1"]), MockArchiveInstaller::new());
        let engine = CandidateEngine {
            installer: Arc::new(StalledInstaller),
            ..engine
        };

        let token = VersionToken::Exact("21.0.1".to_string());
        let install = engine.install("java", &token);
        let result = tokio::time::timeout(Duration::from_millis(100), install).await;

        assert!(result.is_err());
        let entry = engine.inventory.get("java", "21.0.1").unwrap().unwrap();
        assert_eq!(entry.status, VersionStatus::Broken);
        assert_eq!(entry.failure.as_deref(), Some(INTERRUPTED));
    }

    #[tokio::test]
    async fn list_versions_merges_catalog_and_inventory() {
        let temp_dir = TempDir::new().unwrap();
        let engine = engine(
            &temp_dir,
            catalog_with(&["17.0.9-tem", "21.0.1-tem", "21.0.1-zulu"]),
            installer_that_unpacks(),
        );
        engine
            .install("java", &VersionToken::Exact("17.0.9-tem".to_string()))
            .await
            .unwrap();
        engine.set_default("java", "17.0.9-tem").await.unwrap();
        std::fs::create_dir_all(temp_dir.path().join("candidates/java/8.0.392-local")).unwrap();
        let engine = CandidateEngine::new(
            engine.candidates.values().cloned().collect(),
            Arc::into_inner(engine.inventory).unwrap(),
            engine.catalog,
            engine.installer,
            engine.settings,
        )
        .unwrap();

        let listings = engine.list_versions("java").unwrap();

        let versions: Vec<_> = listings.iter().map(|l| l.version.as_str()).collect();
        assert_eq!(
            versions,
            vec!["21.0.1-zulu", "21.0.1-tem", "17.0.9-tem", "8.0.392-local"]
        );
        let installed = &listings[2];
        assert_eq!(installed.status, VersionStatus::Installed);
        assert_eq!(installed.origin, Some(crate::inventory::Origin::Managed));
        assert!(installed.is_default);
        assert_eq!(installed.vendor.as_deref(), Some("tem"));
        let adopted = &listings[3];
        assert_eq!(adopted.origin, Some(crate::inventory::Origin::Unmanaged));
        assert_eq!(listings[0].status, VersionStatus::Available);

        let filtered = engine
            .list_versions_filtered(
                "java",
                &VersionFilter {
                    text: Some("21 zulu".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].version, "21.0.1-zulu");
    }

    #[tokio::test]
    async fn list_candidates_sorted_by_name_with_counts() {
        let temp_dir = TempDir::new().unwrap();
        let engine = engine(&temp_dir, catalog_with(&["3.9.6"]), installer_that_unpacks());
        engine
            .install("maven", &VersionToken::Exact("3.9.6".to_string()))
            .await
            .unwrap();

        let all = engine.list_candidates(&CandidateFilter::default()).unwrap();
        let installed = engine
            .list_candidates(&CandidateFilter {
                installed_only: true,
                ..Default::default()
            })
            .unwrap();

        let names: Vec<_> = all.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Java", "Maven"]);
        assert_eq!(installed.len(), 1);
        assert_eq!(installed[0].id, "maven");
        assert_eq!(installed[0].installed, 1);
    }
}
