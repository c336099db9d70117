//! Common types for catalog data

use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A version the remote catalog knows about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteVersion {
    #[serde(rename = "version")]
    pub identifier: String,
    #[serde(default)]
    pub vendor: Option<String>,
    /// Where the distribution archive is downloaded from
    pub url: String,
    /// Hex-encoded SHA-256 of the archive, when published
    #[serde(default)]
    pub sha256: Option<String>,
}

/// Versions of one candidate as of a fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateCatalog {
    /// Ordered as the catalog published them
    pub versions: Vec<RemoteVersion>,
    pub fetched_at: DateTime<Utc>,
}

impl CandidateCatalog {
    pub fn new(versions: Vec<RemoteVersion>, fetched_at: DateTime<Utc>) -> Self {
        Self {
            versions,
            fetched_at,
        }
    }

    pub fn find(&self, identifier: &str) -> Option<&RemoteVersion> {
        self.versions.iter().find(|v| v.identifier == identifier)
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.versions.iter().map(|v| v.identifier.as_str())
    }
}

/// Immutable point-in-time copy of the remote catalog.
///
/// Never mutated after construction: refreshes build a new snapshot via
/// [`CatalogSnapshot::with_candidate`] and swap it in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogSnapshot {
    pub candidates: IndexMap<String, CandidateCatalog>,
    /// Time of the most recent successful fetch folded into this snapshot
    pub fetched_at: Option<DateTime<Utc>>,
}

impl CatalogSnapshot {
    pub fn empty() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn candidate(&self, id: &str) -> Option<&CandidateCatalog> {
        self.candidates.get(id)
    }

    /// Whether the candidate has been refreshed at least once
    pub fn has_candidate(&self, id: &str) -> bool {
        self.candidates.contains_key(id)
    }

    pub fn find(&self, candidate: &str, identifier: &str) -> Option<&RemoteVersion> {
        self.candidate(candidate).and_then(|c| c.find(identifier))
    }

    /// Copy of this snapshot with one candidate's versions replaced
    pub fn with_candidate(&self, id: &str, catalog: CandidateCatalog) -> Self {
        let mut candidates = self.candidates.clone();
        let fetched_at = match self.fetched_at {
            Some(previous) if previous > catalog.fetched_at => previous,
            _ => catalog.fetched_at,
        };
        candidates.insert(id.to_string(), catalog);
        Self {
            candidates,
            fetched_at: Some(fetched_at),
        }
    }
}
