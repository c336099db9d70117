//! Common types for the installed-version inventory

use std::path::PathBuf;

use chrono::{DateTime, Utc};

/// Lifecycle state of a version on this machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VersionStatus {
    /// Known to the remote catalog, nothing on disk
    Available,
    /// Install started and not yet committed
    Downloading,
    Installed,
    /// Install failed or was interrupted; needs an explicit re-install or uninstall
    Broken,
}

impl VersionStatus {
    /// Returns the string representation of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            VersionStatus::Available => "available",
            VersionStatus::Downloading => "downloading",
            VersionStatus::Installed => "installed",
            VersionStatus::Broken => "broken",
        }
    }
}

impl std::str::FromStr for VersionStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(VersionStatus::Available),
            "downloading" => Ok(VersionStatus::Downloading),
            "installed" => Ok(VersionStatus::Installed),
            "broken" => Ok(VersionStatus::Broken),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Who put a version directory on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// Installed through the engine
    Managed,
    /// Found in a candidate root without a matching install record
    Unmanaged,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Managed => "managed",
            Origin::Unmanaged => "unmanaged",
        }
    }
}

impl std::str::FromStr for Origin {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "managed" => Ok(Origin::Managed),
            "unmanaged" => Ok(Origin::Unmanaged),
            _ => Err(()),
        }
    }
}

/// A version record belonging to exactly one candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionEntry {
    pub candidate: String,
    pub version: String,
    /// Canonical install directory (`<candidate root>/<version>`)
    pub path: PathBuf,
    pub status: VersionStatus,
    pub origin: Origin,
    /// Size of the installed tree in bytes
    pub size: Option<u64>,
    pub installed_at: Option<DateTime<Utc>>,
    /// SHA-256 of the archive the version was installed from
    pub checksum: Option<String>,
    /// Reason recorded when the entry became Broken
    pub failure: Option<String>,
}

impl VersionEntry {
    pub fn is_installed(&self) -> bool {
        self.status == VersionStatus::Installed
    }
}

/// Handle for an install in progress, returned by `record_install_start`
#[derive(Debug, PartialEq, Eq)]
pub struct InstallToken {
    pub(crate) id: i64,
    pub candidate: String,
    pub version: String,
}

/// Outcome of startup reconciliation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Interrupted installs demoted to Broken
    pub interrupted: Vec<(String, String)>,
    /// Installed entries whose directory disappeared
    pub missing: Vec<(String, String)>,
    /// Directories adopted as unmanaged installs
    pub adopted: Vec<(String, String)>,
    /// Defaults taken over from an existing `current` link
    pub adopted_defaults: Vec<(String, String)>,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.interrupted.is_empty()
            && self.missing.is_empty()
            && self.adopted.is_empty()
            && self.adopted_defaults.is_empty()
    }
}
