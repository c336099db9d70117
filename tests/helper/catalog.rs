//! Catalog source test utilities

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use sdkvm::catalog::RemoteVersion;
use sdkvm::catalog::source::CatalogSource;
use sdkvm::error::CatalogError;

/// In-memory catalog that counts fetches
pub struct StaticCatalog {
    versions: HashMap<String, Vec<RemoteVersion>>,
    delay: Duration,
    fetches: AtomicUsize,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self {
            versions: HashMap::new(),
            delay: Duration::ZERO,
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn with_versions(mut self, candidate: &str, versions: &[&str]) -> Self {
        let versions = versions
            .iter()
            .map(|v| RemoteVersion {
                identifier: v.to_string(),
                vendor: None,
                url: format!("https://downloads.example.com/{}/{}.tar.gz", candidate, v),
                sha256: None,
            })
            .collect();
        self.versions.insert(candidate.to_string(), versions);
        self
    }

    /// Hold every fetch for `delay` so concurrent callers overlap
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

#[async_trait]
impl CatalogSource for StaticCatalog {
    async fn fetch_versions(&self, candidate: &str) -> Result<Vec<RemoteVersion>, CatalogError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.versions
            .get(candidate)
            .cloned()
            .ok_or_else(|| CatalogError::UnknownCandidate(candidate.to_string()))
    }
}
