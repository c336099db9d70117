//! HTTP archive installer

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::StreamExt;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

use crate::candidate::Candidate;
use crate::error::{DownloadError, InstallError};
use crate::installer::extract;
use crate::installer::{ArchiveInstaller, InstallPhase, InstallReceipt, InstallRequest};
use crate::inventory::layout::dir_size;

const STAGING_PREFIX: &str = ".staging-";
const ARCHIVE_NAME: &str = "archive";

/// Installer that downloads archives over HTTP(S)
pub struct HttpArchiveInstaller {
    client: reqwest::Client,
    download_timeout: Duration,
    /// Where verified archives are kept for re-installs, when enabled
    archives_dir: Option<PathBuf>,
}

impl HttpArchiveInstaller {
    pub fn new(
        download_timeout: Duration,
        archives_dir: Option<PathBuf>,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("sdkvm/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            download_timeout,
            archives_dir,
        })
    }

    /// Location of a kept archive, whether or not it exists
    fn kept_archive(&self, candidate: &str, version: &str) -> Option<PathBuf> {
        self.archives_dir
            .as_ref()
            .map(|dir| dir.join(candidate).join(format!("{}.archive", version)))
    }

    async fn download(&self, request: &InstallRequest, dest: &Path) -> Result<String, InstallError> {
        let deadline = request
            .deadline
            .unwrap_or_else(|| Instant::now() + self.download_timeout);

        tokio::select! {
            biased;
            _ = request.cancel.cancelled() => Err(InstallError::Cancelled),
            _ = sleep_until(deadline) => Err(DownloadError::Timeout.into()),
            result = self.stream_to_file(request, dest) => result,
        }
    }

    /// Write the response body to `dest`, hashing as it goes
    async fn stream_to_file(&self, request: &InstallRequest, dest: &Path) -> Result<String, InstallError> {
        info!("Downloading {} {} from {}", request.candidate.id, request.version, request.url);
        let response = self
            .client
            .get(&request.url)
            .send()
            .await
            .map_err(DownloadError::from)?;

        let status = response.status();
        if !status.is_success() {
            warn!("Download server returned status {}: {}", status, request.url);
            return Err(DownloadError::Status(status.as_u16()).into());
        }

        let total = response.content_length().filter(|len| *len > 0);
        let mut file = tokio::fs::File::create(dest).await?;
        let mut hasher = Sha256::new();
        let mut downloaded: u64 = 0;
        let mut last_percent = None;
        request.report(InstallPhase::Downloading { percent: total.map(|_| 0) });

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(DownloadError::from)?;
            file.write_all(&chunk).await?;
            hasher.update(&chunk);
            downloaded += chunk.len() as u64;

            if let Some(total) = total {
                let percent = ((downloaded.min(total) * 100) / total) as u8;
                if last_percent != Some(percent) {
                    last_percent = Some(percent);
                    request.report(InstallPhase::Downloading { percent: Some(percent) });
                }
            }
        }

        file.flush().await?;
        file.sync_all().await?;
        debug!("Downloaded {} bytes", downloaded);

        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Reuse a kept archive if it still matches the published checksum
    async fn reuse_kept(&self, request: &InstallRequest) -> Option<(PathBuf, String)> {
        let path = self.kept_archive(&request.candidate.id, &request.version)?;
        if !path.is_file() {
            return None;
        }

        let hash_path = path.clone();
        let checksum = tokio::task::spawn_blocking(move || sha256_file(&hash_path))
            .await
            .ok()?
            .inspect_err(|e| warn!("Cannot read kept archive {:?}: {}", path, e))
            .ok()?;

        match &request.sha256 {
            Some(expected) if !expected.eq_ignore_ascii_case(&checksum) => {
                warn!("Discarding kept archive {:?}: checksum changed", path);
                let _ = tokio::fs::remove_file(&path).await;
                None
            }
            _ => {
                info!("Reusing kept archive for {} {}", request.candidate.id, request.version);
                Some((path, checksum))
            }
        }
    }

    /// Install from inside an existing staging directory
    async fn install_staged(
        &self,
        request: &InstallRequest,
        staging: &Path,
    ) -> Result<InstallReceipt, InstallError> {
        let (archive, checksum) = match self.reuse_kept(request).await {
            Some(kept) => kept,
            None => {
                let archive = staging.join(ARCHIVE_NAME);
                let checksum = self.download(request, &archive).await?;
                (archive, checksum)
            }
        };
        ensure_not_cancelled(request)?;

        request.report(InstallPhase::Verifying);
        match &request.sha256 {
            Some(expected) if !expected.eq_ignore_ascii_case(&checksum) => {
                return Err(InstallError::Checksum {
                    expected: expected.to_lowercase(),
                    actual: checksum,
                });
            }
            Some(_) => {}
            None => debug!("No published checksum for {} {}", request.candidate.id, request.version),
        }

        request.report(InstallPhase::Extracting);
        let unpack_into = staging.join("content");
        let destination = request.destination.clone();
        let cancel = request.cancel.clone();
        let kept = self.kept_archive(&request.candidate.id, &request.version);
        let size = blocking(move || {
            let content = extract::unpack(&archive, &unpack_into)?;
            if cancel.is_cancelled() {
                return Err(InstallError::Cancelled);
            }

            let size = dir_size(&content);
            if destination.exists() {
                debug!("Replacing leftover directory {:?}", destination);
                fs::remove_dir_all(&destination)?;
            }
            fs::rename(&content, &destination)?;

            if let Some(kept) = kept {
                if let Err(e) = keep_archive(&archive, &kept) {
                    warn!("Failed to keep archive at {:?}: {}", kept, e);
                }
            }
            Ok(size)
        })
        .await?;

        info!(
            "Unpacked {} {} into {:?} ({} bytes)",
            request.candidate.id, request.version, request.destination, size
        );
        Ok(InstallReceipt {
            path: request.destination.clone(),
            size,
            checksum,
        })
    }
}

/// Run filesystem work off the async executor
async fn blocking<T, F>(work: F) -> Result<T, InstallError>
where
    F: FnOnce() -> Result<T, InstallError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| InstallError::Io(io::Error::other(e)))?
}

/// Move a verified archive into the keep directory
fn keep_archive(archive: &Path, kept: &Path) -> io::Result<()> {
    if archive == kept {
        return Ok(());
    }
    if let Some(parent) = kept.parent() {
        fs::create_dir_all(parent)?;
    }
    // Cross-device moves fall back to a copy
    fs::rename(archive, kept).or_else(|_| fs::copy(archive, kept).map(|_| ()))
}

fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

fn ensure_not_cancelled(request: &InstallRequest) -> Result<(), InstallError> {
    if request.cancel.is_cancelled() {
        Err(InstallError::Cancelled)
    } else {
        Ok(())
    }
}

#[async_trait::async_trait]
impl ArchiveInstaller for HttpArchiveInstaller {
    async fn install(&self, request: InstallRequest) -> Result<InstallReceipt, InstallError> {
        // Staging lives in the candidate root so the final rename stays on one filesystem
        let root = request.candidate.root.clone();
        let staging = blocking(move || {
            fs::create_dir_all(&root)?;
            Ok(tempfile::Builder::new()
                .prefix(STAGING_PREFIX)
                .tempdir_in(&root)?)
        })
        .await?;

        let result = self.install_staged(&request, staging.path()).await;

        // Whatever is left in staging is a partial download or tree
        let staging_path = staging.path().to_path_buf();
        if let Err(e) = blocking(move || Ok(staging.close()?)).await {
            warn!("Failed to remove staging directory {:?}: {}", staging_path, e);
        }
        result
    }

    async fn uninstall(
        &self,
        candidate: &Candidate,
        version: &str,
        path: &Path,
    ) -> Result<(), InstallError> {
        info!("Removing {} {} at {:?}", candidate.id, version, path);
        let path = path.to_path_buf();
        let result = tokio::task::spawn_blocking(move || match fs::remove_dir_all(&path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        })
        .await
        .map_err(|e| InstallError::Io(io::Error::other(e)))?;

        Ok(result?)
    }

    fn has_cached_archive(&self, candidate: &str, version: &str) -> bool {
        self.kept_archive(candidate, version)
            .is_some_and(|path| path.is_file())
    }
}
