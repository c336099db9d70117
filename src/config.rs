use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::ConfigError;
use crate::version::ordering::VersionScheme;

// =============================================================================
// Time-related constants
// =============================================================================

/// Default freshness threshold for resolving "latest" (24 hours)
pub const DEFAULT_CATALOG_MAX_AGE_MS: i64 = 24 * 60 * 60 * 1000;

/// Timeout for catalog fetch operations in milliseconds (30 seconds)
pub const FETCH_TIMEOUT_MS: i64 = 30_000;

/// Timeout for a whole archive download in milliseconds (30 minutes)
pub const DOWNLOAD_TIMEOUT_MS: i64 = 30 * 60 * 1000;

/// Delay between starting each catalog fetch to avoid rate limiting (10ms)
pub const FETCH_STAGGER_DELAY_MS: u64 = 10;

/// Number of change events a slow subscriber may fall behind before the
/// oldest ones are dropped
pub const DEFAULT_EVENT_BUFFER: usize = 64;

const INVENTORY_DB: &str = "inventory.db";
const CATALOG_DB: &str = "catalog.db";
const LOG_FILE: &str = "sdkvm.log";

/// Default remote catalog endpoint
pub const DEFAULT_CATALOG_URL: &str = "https://catalog.sdkvm.dev/v1";

/// Engine configuration structure
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    pub catalog: CatalogConfig,
    pub install: InstallConfig,
    pub events: EventsConfig,
    /// Overrides the XDG data directory holding databases, archives and logs
    pub data_dir: Option<PathBuf>,
    /// Overrides `<data dir>/candidates` as the parent of candidate roots
    pub candidates_dir: Option<PathBuf>,
    pub candidates: Vec<CandidateConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            catalog: CatalogConfig::default(),
            install: InstallConfig::default(),
            events: EventsConfig::default(),
            data_dir: None,
            candidates_dir: None,
            candidates: default_candidates(),
        }
    }
}

/// Remote catalog configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct CatalogConfig {
    pub url: String,
    /// Maximum catalog age in milliseconds before "latest" forces a refresh
    pub max_age: i64,
    /// Per-request deadline in milliseconds
    pub fetch_timeout: i64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_CATALOG_URL.to_string(),
            max_age: DEFAULT_CATALOG_MAX_AGE_MS,
            fetch_timeout: FETCH_TIMEOUT_MS,
        }
    }
}

/// Download and unpack configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct InstallConfig {
    /// Deadline for a single archive download in milliseconds
    pub download_timeout: i64,
    /// Keep verified archives so a re-install can skip the download
    pub keep_downloads: bool,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            download_timeout: DOWNLOAD_TIMEOUT_MS,
            keep_downloads: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct EventsConfig {
    pub buffer_size: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_EVENT_BUFFER,
        }
    }
}

/// A manageable SDK family
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CandidateConfig {
    pub id: String,
    pub name: String,
    /// Install root; defaults to `<candidates dir>/<id>`
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default)]
    pub version_scheme: VersionScheme,
}

impl CandidateConfig {
    fn numeric(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            root: None,
            version_scheme: VersionScheme::Numeric,
        }
    }
}

fn default_candidates() -> Vec<CandidateConfig> {
    vec![
        CandidateConfig::numeric("java", "Java"),
        CandidateConfig::numeric("maven", "Maven"),
        CandidateConfig::numeric("gradle", "Gradle"),
        CandidateConfig::numeric("kotlin", "Kotlin"),
        CandidateConfig::numeric("scala", "Scala"),
        CandidateConfig::numeric("sbt", "sbt"),
    ]
}

impl EngineConfig {
    /// Load configuration from a JSON file, using defaults when it does not exist
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!("No config file at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        info!("Loading config from {:?}", path);
        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for candidate in &self.candidates {
            if !seen.insert(candidate.id.as_str()) {
                return Err(ConfigError::DuplicateCandidate(candidate.id.clone()));
            }
        }
        Ok(())
    }

    /// Directory for the engine's own state
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(data_dir)
    }

    /// Directory that holds one root directory per candidate
    pub fn candidates_dir(&self) -> PathBuf {
        self.candidates_dir
            .clone()
            .unwrap_or_else(|| self.data_dir().join("candidates"))
    }

    pub fn inventory_db_path(&self) -> PathBuf {
        self.data_dir().join(INVENTORY_DB)
    }

    pub fn catalog_db_path(&self) -> PathBuf {
        self.data_dir().join(CATALOG_DB)
    }

    /// Directory where kept archives are stored
    pub fn archives_dir(&self) -> PathBuf {
        self.data_dir().join("archives")
    }

    pub fn log_path(&self) -> PathBuf {
        self.data_dir().join(LOG_FILE)
    }
}

/// Returns the path to the data directory for sdkvm.
/// Uses $XDG_DATA_HOME/sdkvm if XDG_DATA_HOME is set,
/// otherwise falls back to ~/.local/share/sdkvm,
/// or ./sdkvm if neither is available.
pub fn data_dir() -> PathBuf {
    dir_with_env(
        std::env::var("XDG_DATA_HOME").ok(),
        dirs::home_dir(),
        ".local/share",
    )
}

/// Returns the path to the configuration file.
pub fn config_path() -> PathBuf {
    dir_with_env(
        std::env::var("XDG_CONFIG_HOME").ok(),
        dirs::home_dir(),
        ".config",
    )
    .join("config.json")
}

fn dir_with_env(xdg_home: Option<String>, home_dir: Option<PathBuf>, fallback: &str) -> PathBuf {
    let base = xdg_home
        .map(PathBuf::from)
        .or_else(|| home_dir.map(|home| home.join(fallback)))
        .unwrap_or_else(|| PathBuf::from("."));

    base.join("sdkvm")
}
