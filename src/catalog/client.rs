//! Catalog client with snapshot swapping and refresh coalescing
//!
//! ```text
//! refresh(java) ─┐
//!                │                         CatalogSource
//! refresh(java) ─┼──► in-flight map ─────► fetch_versions(java)
//!                │        │                       │
//! refresh(all)  ─┘        ▼                       ▼
//!                  [every waiter gets      build new snapshot,
//!                   the same result] ◄──── swap, persist
//! ```
//!
//! Readers call [`CatalogClient::current`] and keep the returned `Arc` for as
//! long as they need a consistent view; a refresh never mutates a snapshot
//! that has been handed out.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::broadcast;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::catalog::cache::CatalogCache;
use crate::catalog::source::CatalogSource;
use crate::catalog::types::{CandidateCatalog, CatalogSnapshot};
use crate::config::FETCH_STAGGER_DELAY_MS;
use crate::error::CatalogError;

type RefreshResult = Result<(), CatalogError>;

/// Result of [`CatalogClient::refresh_tracked`]
#[derive(Debug)]
pub struct Refreshed {
    /// Candidates whose new data this call fetched and swapped in
    pub swapped: Vec<String>,
    /// The snapshot after the refresh, or the first failure
    pub result: Result<Arc<CatalogSnapshot>, CatalogError>,
}

/// Which candidates a refresh covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshScope {
    All,
    Candidate(String),
}

pub struct CatalogClient {
    source: Arc<dyn CatalogSource>,
    cache: Option<CatalogCache>,
    candidates: Vec<String>,
    fetch_timeout: Duration,
    snapshot: RwLock<Arc<CatalogSnapshot>>,
    /// Candidate id -> sender for the result of the fetch in progress
    in_flight: Mutex<HashMap<String, broadcast::Sender<RefreshResult>>>,
}

/// Registration of a fetch in progress. Dropping it without
/// [`complete`](InFlight::complete) (e.g. the refreshing task was cancelled)
/// releases waiters with [`CatalogError::Interrupted`].
struct InFlight<'a> {
    map: &'a Mutex<HashMap<String, broadcast::Sender<RefreshResult>>>,
    candidate: String,
    sender: Option<broadcast::Sender<RefreshResult>>,
}

impl InFlight<'_> {
    fn complete(mut self, result: RefreshResult) {
        self.release();
        if let Some(sender) = self.sender.take() {
            // No receivers is fine: nobody joined this refresh
            let waiters = sender.receiver_count();
            let _ = sender.send(result);
            if waiters > 0 {
                debug!("Shared {} refresh with {} waiters", self.candidate, waiters);
            }
        }
    }

    fn release(&self) {
        let mut map = self.map.lock().unwrap_or_else(PoisonError::into_inner);
        map.remove(&self.candidate);
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.sender.is_some() {
            self.release();
        }
    }
}

enum Registration<'a> {
    /// Caller performs the fetch
    Leader(InFlight<'a>),
    /// Caller waits for another caller's fetch
    Waiter(broadcast::Receiver<RefreshResult>),
}

impl CatalogClient {
    /// Create a client, seeding the snapshot from the cache when one is given
    pub fn new(
        source: Arc<dyn CatalogSource>,
        cache: Option<CatalogCache>,
        candidates: Vec<String>,
        fetch_timeout: Duration,
    ) -> Self {
        let snapshot = match &cache {
            Some(cache) => cache
                .load()
                .inspect_err(|e| warn!("Ignoring unreadable catalog cache: {}", e))
                .unwrap_or_default(),
            None => CatalogSnapshot::default(),
        };

        Self {
            source,
            cache,
            candidates,
            fetch_timeout,
            snapshot: RwLock::new(Arc::new(snapshot)),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// The latest snapshot. Never blocks on a refresh in progress.
    pub fn current(&self) -> Arc<CatalogSnapshot> {
        let snapshot = self.snapshot.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&snapshot)
    }

    /// Fetch fresh data and swap in a new snapshot.
    ///
    /// Concurrent refreshes of the same candidate share one fetch. For
    /// [`RefreshScope::All`], candidates that fetched successfully are kept even
    /// when others fail; the first failure is returned.
    pub async fn refresh(&self, scope: RefreshScope) -> Result<Arc<CatalogSnapshot>, CatalogError> {
        self.refresh_tracked(scope).await.result
    }

    /// Like [`refresh`](Self::refresh), also naming the candidates whose data
    /// this call swapped in itself. Callers that joined another caller's
    /// fetch get the same result but an empty `swapped` for that candidate.
    pub async fn refresh_tracked(&self, scope: RefreshScope) -> Refreshed {
        let results = match scope {
            RefreshScope::Candidate(id) => {
                if !self.candidates.contains(&id) {
                    return Refreshed {
                        swapped: Vec::new(),
                        result: Err(CatalogError::UnknownCandidate(id)),
                    };
                }
                let result = self.refresh_candidate(&id).await;
                vec![(id, result)]
            }
            RefreshScope::All => {
                let futures = self.candidates.iter().enumerate().map(|(i, id)| {
                    let delay = Duration::from_millis(FETCH_STAGGER_DELAY_MS * i as u64);
                    async move {
                        sleep(delay).await;
                        (id.clone(), self.refresh_candidate(id).await)
                    }
                });

                let results = join_all(futures).await;
                let failed = results.iter().filter(|(_, r)| r.is_err()).count();
                info!(
                    "Refreshed {} of {} candidates",
                    results.len() - failed,
                    results.len()
                );
                results
            }
        };

        let mut swapped = Vec::new();
        let mut first_error = None;
        for (id, result) in results {
            match result {
                Ok(true) => swapped.push(id),
                Ok(false) => {}
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        Refreshed {
            swapped,
            result: match first_error {
                Some(e) => Err(e),
                None => Ok(self.current()),
            },
        }
    }

    /// `Ok(true)` when this caller led the fetch and swapped the result in
    async fn refresh_candidate(&self, id: &str) -> Result<bool, CatalogError> {
        match self.register(id) {
            Registration::Leader(in_flight) => {
                let result = self.fetch_and_swap(id).await;
                in_flight.complete(result.clone());
                result.map(|()| true)
            }
            Registration::Waiter(mut rx) => {
                debug!("Joining refresh of {} already in flight", id);
                rx.recv()
                    .await
                    .unwrap_or(Err(CatalogError::Interrupted))
                    .map(|()| false)
            }
        }
    }

    fn register(&self, id: &str) -> Registration<'_> {
        let mut map = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(sender) = map.get(id) {
            return Registration::Waiter(sender.subscribe());
        }

        let (sender, _rx) = broadcast::channel(1);
        map.insert(id.to_string(), sender.clone());
        Registration::Leader(InFlight {
            map: &self.in_flight,
            candidate: id.to_string(),
            sender: Some(sender),
        })
    }

    async fn fetch_and_swap(&self, id: &str) -> RefreshResult {
        let fetch = self.source.fetch_versions(id);
        let versions = match tokio::time::timeout(self.fetch_timeout, fetch).await {
            Ok(result) => {
                result.inspect_err(|e| error!("Failed to fetch catalog for {}: {}", id, e))?
            }
            Err(_) => {
                error!("Catalog fetch for {} timed out", id);
                return Err(CatalogError::Timeout);
            }
        };

        let catalog = CandidateCatalog::new(versions, Utc::now());
        if let Some(cache) = &self.cache {
            // The in-memory snapshot stays authoritative when persisting fails
            let _ = cache
                .save_candidate(id, &catalog)
                .inspect_err(|e| error!("Failed to cache catalog for {}: {}", id, e));
        }

        let count = catalog.versions.len();
        {
            let mut snapshot = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
            *snapshot = Arc::new(snapshot.with_candidate(id, catalog));
        }
        info!("Refreshed {} versions for {}", count, id);
        Ok(())
    }
}
