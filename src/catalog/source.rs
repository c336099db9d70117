//! Source trait for fetching candidate versions from the remote catalog

#[cfg(test)]
use mockall::automock;

use crate::catalog::types::RemoteVersion;
use crate::error::CatalogError;

/// Trait for fetching the published versions of a candidate
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait CatalogSource: Send + Sync {
    /// Fetches every version the catalog publishes for a candidate
    ///
    /// # Returns
    /// * `Ok(Vec<RemoteVersion>)` - Versions in catalog order
    /// * `Err(CatalogError::UnknownCandidate)` - The catalog has no such candidate
    /// * `Err(CatalogError)` - Any other fetch or decode failure
    async fn fetch_versions(&self, candidate: &str) -> Result<Vec<RemoteVersion>, CatalogError>;
}
