//! HTTP catalog API implementation

use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::candidate::is_valid_version_identifier;
use crate::catalog::source::CatalogSource;
use crate::catalog::types::RemoteVersion;
use crate::error::CatalogError;

/// Response from `GET /candidates/{id}`
#[derive(Debug, Deserialize)]
struct CandidateResponse {
    versions: Vec<RemoteVersion>,
}

/// Catalog source backed by the remote JSON API
pub struct HttpCatalogSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCatalogSource {
    /// Creates a new HttpCatalogSource with a custom base URL and per-request timeout
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, CatalogError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("sdkvm/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait::async_trait]
impl CatalogSource for HttpCatalogSource {
    async fn fetch_versions(&self, candidate: &str) -> Result<Vec<RemoteVersion>, CatalogError> {
        let url = format!("{}/candidates/{}", self.base_url, candidate);

        let response = self.client.get(&url).send().await?;

        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(CatalogError::UnknownCandidate(candidate.to_string()));
        }

        // Server-side and rate-limit failures are transient; other client
        // errors mean the request itself is wrong
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            warn!("Catalog unavailable, status {}: {}", status, url);
            return Err(CatalogError::Network(format!("Catalog returned {}", status)));
        }

        if !status.is_success() {
            warn!("Catalog returned status {}: {}", status, url);
            return Err(CatalogError::InvalidResponse(format!(
                "Unexpected status: {}",
                status
            )));
        }

        let body: CandidateResponse = response.json().await.map_err(|e| {
            warn!("Failed to parse catalog response for {}: {}", candidate, e);
            if e.is_timeout() {
                CatalogError::Timeout
            } else {
                CatalogError::Parse(e.to_string())
            }
        })?;

        Ok(body
            .versions
            .into_iter()
            .filter(|v| {
                let valid = is_valid_version_identifier(&v.identifier);
                if !valid {
                    warn!(
                        "Skipping catalog entry {:?} for {}: not a usable version name",
                        v.identifier, candidate
                    );
                }
                valid
            })
            .collect())
    }
}
