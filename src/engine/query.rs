//! Read-only views over candidates and versions

use std::cmp::Ordering;

use indexmap::IndexMap;

use crate::engine::CandidateEngine;
use crate::error::EngineError;
use crate::inventory::{Origin, VersionStatus};
use crate::version::ordering::{VersionScheme, compare_versions, vendor_suffix};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateFilter {
    /// Case-insensitive substring of the id or display name
    pub text: Option<String>,
    pub installed_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateSummary {
    pub id: String,
    pub name: String,
    /// Number of Installed versions
    pub installed: usize,
    pub default: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionFilter {
    /// Space-separated terms; every term must match the version or vendor
    pub text: Option<String>,
    pub installed_only: bool,
    pub downloaded_only: bool,
    pub default_only: bool,
}

/// One row of a candidate's version list, merging catalog and inventory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionListing {
    pub version: String,
    pub vendor: Option<String>,
    pub status: VersionStatus,
    /// `None` for versions only known to the catalog
    pub origin: Option<Origin>,
    pub is_default: bool,
    /// A verified archive is kept locally
    pub downloaded: bool,
}

impl CandidateFilter {
    fn matches(&self, summary: &CandidateSummary) -> bool {
        if self.installed_only && summary.installed == 0 {
            return false;
        }
        match &self.text {
            Some(text) => {
                let text = text.to_lowercase();
                summary.id.to_lowercase().contains(&text)
                    || summary.name.to_lowercase().contains(&text)
            }
            None => true,
        }
    }
}

impl VersionFilter {
    pub fn matches(&self, listing: &VersionListing) -> bool {
        if self.installed_only && listing.status != VersionStatus::Installed {
            return false;
        }
        if self.downloaded_only && !listing.downloaded {
            return false;
        }
        if self.default_only && !listing.is_default {
            return false;
        }

        let Some(text) = &self.text else {
            return true;
        };
        let version = listing.version.to_lowercase();
        let vendor = listing.vendor.as_deref().unwrap_or_default().to_lowercase();
        text.split_whitespace()
            .map(str::to_lowercase)
            .all(|term| version.contains(&term) || vendor.contains(&term))
    }
}

impl CandidateEngine {
    /// Candidates sorted by display name, case-insensitively
    pub fn list_candidates(
        &self,
        filter: &CandidateFilter,
    ) -> Result<Vec<CandidateSummary>, EngineError> {
        let mut summaries = Vec::with_capacity(self.candidates.len());
        for candidate in self.candidates.values() {
            let summary = CandidateSummary {
                id: candidate.id.clone(),
                name: candidate.name.clone(),
                installed: self.inventory.installed_count(&candidate.id)?,
                default: self.inventory.default_version(&candidate.id)?,
            };
            if filter.matches(&summary) {
                summaries.push(summary);
            }
        }

        summaries.sort_by(|a, b| {
            a.name
                .to_lowercase()
                .cmp(&b.name.to_lowercase())
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(summaries)
    }

    /// Every version the catalog or the inventory knows, newest first
    pub fn list_versions(&self, candidate: &str) -> Result<Vec<VersionListing>, EngineError> {
        let candidate = self.candidate(candidate)?;
        let snapshot = self.catalog.current();
        let default = self.inventory.default_version(&candidate.id)?;

        let mut listings: IndexMap<String, VersionListing> = IndexMap::new();
        if let Some(catalog) = snapshot.candidate(&candidate.id) {
            for remote in &catalog.versions {
                listings.insert(
                    remote.identifier.clone(),
                    VersionListing {
                        version: remote.identifier.clone(),
                        vendor: remote.vendor.clone(),
                        status: VersionStatus::Available,
                        origin: None,
                        is_default: false,
                        downloaded: false,
                    },
                );
            }
        }

        for entry in self.inventory.list(&candidate.id)? {
            let listing = listings
                .entry(entry.version.clone())
                .or_insert_with(|| VersionListing {
                    version: entry.version.clone(),
                    vendor: None,
                    status: entry.status,
                    origin: None,
                    is_default: false,
                    downloaded: false,
                });
            listing.status = entry.status;
            listing.origin = Some(entry.origin);
        }

        let mut listings: Vec<VersionListing> = listings.into_values().collect();
        for listing in &mut listings {
            if listing.vendor.is_none() {
                listing.vendor = vendor_suffix(&listing.version).map(str::to_string);
            }
            listing.is_default = default.as_deref() == Some(listing.version.as_str());
            listing.downloaded = self
                .installer
                .has_cached_archive(&candidate.id, &listing.version);
        }

        listings.sort_by(|a, b| newest_first(candidate.scheme, &a.version, &b.version));
        Ok(listings)
    }

    pub fn list_versions_filtered(
        &self,
        candidate: &str,
        filter: &VersionFilter,
    ) -> Result<Vec<VersionListing>, EngineError> {
        Ok(self
            .list_versions(candidate)?
            .into_iter()
            .filter(|listing| filter.matches(listing))
            .collect())
    }
}

fn newest_first(scheme: VersionScheme, a: &str, b: &str) -> Ordering {
    compare_versions(b, a, scheme)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn listing(version: &str, vendor: Option<&str>, status: VersionStatus) -> VersionListing {
        VersionListing {
            version: version.to_string(),
            vendor: vendor.map(str::to_string),
            status,
            origin: None,
            is_default: false,
            downloaded: false,
        }
    }

    #[rstest]
    #[case("21", true)]
    #[case("TEM", true)]
    #[case("21 tem", true)]
    #[case("21 zulu", false)]
    #[case("17", false)]
    fn version_filter_text_terms_must_all_match(#[case] text: &str, #[case] expected: bool) {
        let filter = VersionFilter {
            text: Some(text.to_string()),
            ..Default::default()
        };

        let row = listing("21.0.1-tem", Some("tem"), VersionStatus::Available);

        assert_eq!(filter.matches(&row), expected);
    }

    #[test]
    fn version_filter_flags_narrow_results() {
        let installed = VersionFilter {
            installed_only: true,
            ..Default::default()
        };
        let default_only = VersionFilter {
            default_only: true,
            ..Default::default()
        };

        let mut row = listing("17.0.9", None, VersionStatus::Broken);
        assert!(!installed.matches(&row));

        row.status = VersionStatus::Installed;
        assert!(installed.matches(&row));
        assert!(!default_only.matches(&row));

        row.is_default = true;
        assert!(default_only.matches(&row));
    }

    #[test]
    fn candidate_filter_matches_name_or_id() {
        let summary = CandidateSummary {
            id: "sbt".to_string(),
            name: "Scala Build Tool".to_string(),
            installed: 0,
            default: None,
        };

        let by_name = CandidateFilter {
            text: Some("build".to_string()),
            ..Default::default()
        };
        let installed_only = CandidateFilter {
            installed_only: true,
            ..Default::default()
        };

        assert!(by_name.matches(&summary));
        assert!(!installed_only.matches(&summary));
    }
}
