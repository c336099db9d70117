//! Download, verify and unpack SDK archives
//!
//! An install never exposes a partial version directory: archives are
//! downloaded and unpacked inside a `.staging-*` directory in the candidate
//! root and renamed into place only once complete.

pub mod extract;
pub mod http;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[cfg(test)]
use mockall::automock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::candidate::Candidate;
use crate::error::InstallError;

pub use http::HttpArchiveInstaller;

/// Step an install is in, reported through [`ProgressFn`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallPhase {
    /// Percentage is unknown when the server sends no content length
    Downloading { percent: Option<u8> },
    Verifying,
    Extracting,
}

impl fmt::Display for InstallPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallPhase::Downloading { percent: Some(p) } => write!(f, "downloading {}%", p),
            InstallPhase::Downloading { percent: None } => f.write_str("downloading"),
            InstallPhase::Verifying => f.write_str("verifying"),
            InstallPhase::Extracting => f.write_str("extracting"),
        }
    }
}

pub type ProgressFn = Arc<dyn Fn(InstallPhase) + Send + Sync>;

/// Everything an installer needs to put one version on disk
#[derive(Clone)]
pub struct InstallRequest {
    pub candidate: Candidate,
    pub version: String,
    pub url: String,
    /// Expected hex SHA-256 of the archive
    pub sha256: Option<String>,
    /// Canonical version directory; must not be visible until complete
    pub destination: PathBuf,
    pub deadline: Option<Instant>,
    pub cancel: CancellationToken,
    pub progress: Option<ProgressFn>,
}

impl InstallRequest {
    /// Forward a phase to the progress callback, if any
    pub fn report(&self, phase: InstallPhase) {
        if let Some(progress) = &self.progress {
            progress(phase);
        }
    }
}

impl fmt::Debug for InstallRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstallRequest")
            .field("candidate", &self.candidate.id)
            .field("version", &self.version)
            .field("url", &self.url)
            .field("destination", &self.destination)
            .finish_non_exhaustive()
    }
}

/// What a successful install produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReceipt {
    pub path: PathBuf,
    /// Bytes on disk after unpacking
    pub size: u64,
    /// Hex SHA-256 of the archive
    pub checksum: String,
}

/// Puts version directories on disk and takes them away again
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait ArchiveInstaller: Send + Sync {
    /// Download, verify and unpack into `request.destination`.
    ///
    /// On error nothing is left at the destination.
    async fn install(&self, request: InstallRequest) -> Result<InstallReceipt, InstallError>;

    /// Remove an installed version directory. A missing directory is not an error.
    async fn uninstall(
        &self,
        candidate: &Candidate,
        version: &str,
        path: &Path,
    ) -> Result<(), InstallError>;

    /// Whether a re-install of this version can skip the download
    fn has_cached_archive(&self, candidate: &str, version: &str) -> bool;
}
