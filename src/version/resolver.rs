//! Symbolic version token resolution
//!
//! Turns "latest", "default" or an exact identifier into a concrete version
//! using only the current catalog snapshot and inventory state.

use std::convert::Infallible;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;

use crate::candidate::{Candidate, is_valid_version_identifier};
use crate::catalog::types::CatalogSnapshot;
use crate::error::{InventoryError, ResolveError};
use crate::inventory::types::VersionEntry;
use crate::version::ordering::find_max;

/// What a caller asked for
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VersionToken {
    Exact(String),
    /// Highest catalog version under the candidate's ordering
    Latest,
    /// The candidate's current default
    Default,
}

impl std::str::FromStr for VersionToken {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim() {
            "latest" => VersionToken::Latest,
            "default" => VersionToken::Default,
            exact => VersionToken::Exact(exact.to_string()),
        })
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionToken::Exact(v) => f.write_str(v),
            VersionToken::Latest => f.write_str("latest"),
            VersionToken::Default => f.write_str("default"),
        }
    }
}

/// Read access to the default pointer
#[cfg_attr(test, automock)]
pub trait InventoryReader: Send + Sync {
    fn get_default(&self, candidate: &str) -> Result<VersionEntry, InventoryError>;
}

/// Stateless resolver over one catalog snapshot and the inventory.
///
/// `now` is captured at construction so repeated calls agree on freshness.
pub struct VersionResolver<'a> {
    snapshot: &'a CatalogSnapshot,
    inventory: &'a dyn InventoryReader,
    max_age: Duration,
    now: DateTime<Utc>,
}

impl<'a> VersionResolver<'a> {
    pub fn new(
        snapshot: &'a CatalogSnapshot,
        inventory: &'a dyn InventoryReader,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            snapshot,
            inventory,
            max_age,
            now,
        }
    }

    /// Whether the candidate's catalog data is younger than the freshness threshold
    pub fn is_fresh(&self, candidate: &str) -> bool {
        let Some(catalog) = self.snapshot.candidate(candidate) else {
            return false;
        };
        let age = self.now.signed_duration_since(catalog.fetched_at);
        match age.to_std() {
            Ok(age) => age <= self.max_age,
            // Fetched "in the future" (clock skew) counts as fresh
            Err(_) => true,
        }
    }

    pub fn resolve(
        &self,
        candidate: &Candidate,
        token: &VersionToken,
    ) -> Result<String, ResolveError> {
        match token {
            VersionToken::Exact(version) => self.resolve_exact(candidate, version),
            VersionToken::Latest => self.resolve_latest(candidate),
            VersionToken::Default => match self.inventory.get_default(&candidate.id) {
                Ok(entry) => Ok(entry.version),
                Err(InventoryError::NoDefaultSet(id)) => Err(ResolveError::NoDefaultSet(id)),
                Err(e) => Err(e.into()),
            },
        }
    }

    fn resolve_exact(&self, candidate: &Candidate, version: &str) -> Result<String, ResolveError> {
        let unknown = || ResolveError::UnknownVersion {
            candidate: candidate.id.clone(),
            version: version.to_string(),
        };
        if !is_valid_version_identifier(version) {
            return Err(unknown());
        }

        // Without catalog data there is nothing to validate against
        let Some(catalog) = self.snapshot.candidate(&candidate.id) else {
            return Ok(version.to_string());
        };

        if catalog.find(version).is_some() {
            Ok(version.to_string())
        } else {
            Err(unknown())
        }
    }

    fn resolve_latest(&self, candidate: &Candidate) -> Result<String, ResolveError> {
        let Some(catalog) = self.snapshot.candidate(&candidate.id) else {
            return Err(ResolveError::NoCatalogData(candidate.id.clone()));
        };

        if !self.is_fresh(&candidate.id) {
            return Err(ResolveError::StaleCatalog(candidate.id.clone()));
        }

        let usable = catalog
            .identifiers()
            .filter(|version| is_valid_version_identifier(version));
        find_max(usable, candidate.scheme)
            .map(str::to_string)
            .ok_or_else(|| ResolveError::UnknownVersion {
                candidate: candidate.id.clone(),
                version: VersionToken::Latest.to_string(),
            })
    }
}
