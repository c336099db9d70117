use std::io;

use thiserror::Error;

/// Failure classes shared by every engine operation.
///
/// Components report their most specific error; [`EngineError::kind`]
/// projects it onto this taxonomy so callers can decide on retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Network,
    Parse,
    Checksum,
    Extract,
    DiskSpace,
    NotInstalled,
    UnknownVersion,
    NoDefaultSet,
    CannotRemoveDefault,
    InUse,
    Timeout,
    Cancelled,
    Io,
    Storage,
    UnknownCandidate,
    StaleCatalog,
}

impl ErrorKind {
    /// Whether retrying the same call may succeed without outside changes
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Network
                | ErrorKind::Checksum
                | ErrorKind::Extract
                | ErrorKind::Timeout
                | ErrorKind::Cancelled
        )
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Duplicate candidate id in config: {0}")]
    DuplicateCandidate(String),
}

/// Errors from fetching or caching the remote catalog.
///
/// Cloneable so that a coalesced refresh can hand the same failure to every
/// waiting caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Catalog request timed out")]
    Timeout,

    #[error("Unknown candidate: {0}")]
    UnknownCandidate(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Malformed catalog data: {0}")]
    Parse(String),

    #[error("Catalog cache error: {0}")]
    Cache(String),

    #[error("Refresh was abandoned before it completed")]
    Interrupted,
}

impl From<reqwest::Error> for CatalogError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            CatalogError::Timeout
        } else if e.is_decode() {
            CatalogError::Parse(e.to_string())
        } else {
            CatalogError::Network(e.to_string())
        }
    }
}

impl From<rusqlite::Error> for CatalogError {
    fn from(e: rusqlite::Error) -> Self {
        CatalogError::Cache(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Filesystem error: {0}")]
    Io(#[from] io::Error),

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error("Inventory is locked by another process: {0}")]
    Locked(String),

    #[error("{candidate} {version} is not in the inventory")]
    NotFound { candidate: String, version: String },

    #[error("{candidate} {version} is not installed")]
    NotInstalled { candidate: String, version: String },

    #[error("{candidate} {version} is already installed")]
    AlreadyInstalled { candidate: String, version: String },

    #[error("{candidate} {version} is the current default")]
    InUse { candidate: String, version: String },

    #[error("No default version set for {0}")]
    NoDefaultSet(String),

    #[error("Unknown candidate: {0}")]
    UnknownCandidate(String),

    #[error("Corrupt inventory record: {0}")]
    Corrupt(String),
}

impl InventoryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            InventoryError::Database(_)
            | InventoryError::LockPoisoned
            | InventoryError::Locked(_)
            | InventoryError::Corrupt(_) => ErrorKind::Storage,
            InventoryError::Io(e) => io_kind(e),
            InventoryError::NotFound { .. } | InventoryError::NotInstalled { .. } => {
                ErrorKind::NotInstalled
            }
            // Reinstalling an installed version is a caller logic error
            InventoryError::AlreadyInstalled { .. } => ErrorKind::InUse,
            InventoryError::InUse { .. } => ErrorKind::InUse,
            InventoryError::NoDefaultSet(_) => ErrorKind::NoDefaultSet,
            InventoryError::UnknownCandidate(_) => ErrorKind::UnknownCandidate,
        }
    }
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Download server returned status {0}")]
    Status(u16),

    #[error("Download timed out")]
    Timeout,
}

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("Download failed: {0}")]
    Download(#[from] DownloadError),

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    Checksum { expected: String, actual: String },

    #[error("Failed to extract archive: {0}")]
    Extract(String),

    #[error("Not enough disk space: {0}")]
    DiskSpace(io::Error),

    #[error("Filesystem error: {0}")]
    Io(io::Error),

    #[error("Install was cancelled")]
    Cancelled,
}

impl From<io::Error> for InstallError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::StorageFull {
            InstallError::DiskSpace(e)
        } else {
            InstallError::Io(e)
        }
    }
}

impl InstallError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            InstallError::Download(DownloadError::Timeout) => ErrorKind::Timeout,
            InstallError::Download(DownloadError::Network(e)) if e.is_timeout() => {
                ErrorKind::Timeout
            }
            InstallError::Download(_) => ErrorKind::Network,
            InstallError::Checksum { .. } => ErrorKind::Checksum,
            InstallError::Extract(_) => ErrorKind::Extract,
            InstallError::DiskSpace(_) => ErrorKind::DiskSpace,
            InstallError::Io(e) => io_kind(e),
            InstallError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Unknown version {version} for {candidate}")]
    UnknownVersion { candidate: String, version: String },

    #[error("No default version set for {0}")]
    NoDefaultSet(String),

    #[error("No catalog data for {0}; refresh first")]
    NoCatalogData(String),

    #[error("Catalog data for {0} is older than the freshness threshold")]
    StaleCatalog(String),

    #[error(transparent)]
    Inventory(#[from] InventoryError),
}

impl ResolveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ResolveError::UnknownVersion { .. } => ErrorKind::UnknownVersion,
            ResolveError::NoDefaultSet(_) => ErrorKind::NoDefaultSet,
            ResolveError::NoCatalogData(_) | ResolveError::StaleCatalog(_) => {
                ErrorKind::StaleCatalog
            }
            ResolveError::Inventory(e) => e.kind(),
        }
    }
}

impl CatalogError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CatalogError::Network(_) => ErrorKind::Network,
            CatalogError::Timeout => ErrorKind::Timeout,
            CatalogError::UnknownCandidate(_) => ErrorKind::UnknownCandidate,
            CatalogError::InvalidResponse(_) | CatalogError::Parse(_) => ErrorKind::Parse,
            CatalogError::Cache(_) => ErrorKind::Storage,
            CatalogError::Interrupted => ErrorKind::Cancelled,
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Unknown candidate: {0}")]
    UnknownCandidate(String),

    #[error("Cannot remove {candidate} {version}: it is the current default")]
    CannotRemoveDefault { candidate: String, version: String },

    #[error("Failed to install {candidate} {version}: {source}")]
    Install {
        candidate: String,
        version: String,
        #[source]
        source: InstallError,
    },

    #[error("Failed to uninstall {candidate} {version}: {source}")]
    Uninstall {
        candidate: String,
        version: String,
        #[source]
        source: InstallError,
    },

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Inventory(#[from] InventoryError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to create HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::UnknownCandidate(_) => ErrorKind::UnknownCandidate,
            EngineError::CannotRemoveDefault { .. } => ErrorKind::CannotRemoveDefault,
            EngineError::Install { source, .. } | EngineError::Uninstall { source, .. } => {
                source.kind()
            }
            EngineError::Catalog(e) => e.kind(),
            EngineError::Inventory(e) => e.kind(),
            EngineError::Resolve(e) => e.kind(),
            EngineError::Config(_) => ErrorKind::Parse,
            EngineError::Http(_) => ErrorKind::Network,
        }
    }
}

fn io_kind(e: &io::Error) -> ErrorKind {
    match e.kind() {
        io::ErrorKind::StorageFull => ErrorKind::DiskSpace,
        io::ErrorKind::TimedOut => ErrorKind::Timeout,
        _ => ErrorKind::Io,
    }
}
