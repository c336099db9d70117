//! SDK candidates known to the engine

use std::path::{Path, PathBuf};

use crate::config::CandidateConfig;
use crate::version::ordering::VersionScheme;

/// A manageable SDK family, fixed for the lifetime of the process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Stable key (e.g. "java")
    pub id: String,
    pub name: String,
    /// Directory holding one subdirectory per installed version
    pub root: PathBuf,
    pub scheme: VersionScheme,
}

impl Candidate {
    pub fn new(id: &str, name: &str, root: impl Into<PathBuf>, scheme: VersionScheme) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            root: root.into(),
            scheme,
        }
    }

    /// Build from configuration, placing the root under `candidates_dir` unless overridden
    pub fn from_config(config: &CandidateConfig, candidates_dir: &Path) -> Self {
        let root = config
            .root
            .clone()
            .unwrap_or_else(|| candidates_dir.join(&config.id));
        Self::new(&config.id, &config.name, root, config.version_scheme)
    }

    /// Canonical install directory of a version
    pub fn version_dir(&self, version: &str) -> PathBuf {
        self.root.join(version)
    }

    /// Link naming the default version
    pub fn current_link(&self) -> PathBuf {
        self.root.join(CURRENT_LINK)
    }
}

/// Name of the default-pointer link inside a candidate root
pub const CURRENT_LINK: &str = "current";

/// Whether `version` can name a directory directly inside a candidate root.
///
/// Rejects anything that would leave the root, hide behind a leading dot
/// (staging directories live there) or collide with the default link.
pub fn is_valid_version_identifier(version: &str) -> bool {
    !version.is_empty()
        && !version.starts_with('.')
        && !version.contains(['/', '\\'])
        && !version.chars().any(char::is_control)
        && version != CURRENT_LINK
}
