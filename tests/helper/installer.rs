//! Archive installer test utilities

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use sdkvm::candidate::Candidate;
use sdkvm::error::InstallError;
use sdkvm::installer::{ArchiveInstaller, InstallPhase, InstallReceipt, InstallRequest};

/// Installer that writes a small fake SDK tree instead of downloading.
///
/// Tracks how many installs ran and the peak number running at once per
/// candidate root.
pub struct FakeInstaller {
    delay: Duration,
    failing: HashSet<String>,
    installs: AtomicUsize,
    active: Mutex<Vec<String>>,
    overlaps: AtomicUsize,
}

impl FakeInstaller {
    pub fn new() -> Self {
        Self {
            delay: Duration::ZERO,
            failing: HashSet::new(),
            installs: AtomicUsize::new(0),
            active: Mutex::new(Vec::new()),
            overlaps: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Make installs of `version` fail with a checksum mismatch
    pub fn failing_on(mut self, version: &str) -> Self {
        self.failing.insert(version.to_string());
        self
    }

    pub fn install_count(&self) -> usize {
        self.installs.load(Ordering::SeqCst)
    }

    /// Times an install started while another install of the same candidate was running
    pub fn overlap_count(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }

    fn enter(&self, candidate: &str) {
        let mut active = self.active.lock().unwrap();
        if active.iter().any(|c| c == candidate) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        active.push(candidate.to_string());
    }

    fn leave(&self, candidate: &str) {
        let mut active = self.active.lock().unwrap();
        if let Some(pos) = active.iter().position(|c| c == candidate) {
            active.remove(pos);
        }
    }
}

#[async_trait]
impl ArchiveInstaller for FakeInstaller {
    async fn install(&self, request: InstallRequest) -> Result<InstallReceipt, InstallError> {
        self.installs.fetch_add(1, Ordering::SeqCst);
        self.enter(&request.candidate.id);

        let result: Result<InstallReceipt, InstallError> = async {
            request.report(InstallPhase::Downloading { percent: Some(100) });
            tokio::select! {
                _ = request.cancel.cancelled() => return Err(InstallError::Cancelled),
                _ = tokio::time::sleep(self.delay) => {}
            }

            request.report(InstallPhase::Verifying);
            if self.failing.contains(&request.version) {
                return Err(InstallError::Checksum {
                    expected: "00".to_string(),
                    actual: "ff".to_string(),
                });
            }

            request.report(InstallPhase::Extracting);
            let bin = request.destination.join("bin");
            fs::create_dir_all(&bin)?;
            fs::write(bin.join(&request.candidate.id), b"#!/bin/sh\n")?;
            Ok(InstallReceipt {
                path: request.destination.clone(),
                size: 10,
                checksum: format!("sha-{}", request.version),
            })
        }
        .await;

        self.leave(&request.candidate.id);
        result
    }

    async fn uninstall(
        &self,
        _candidate: &Candidate,
        _version: &str,
        path: &Path,
    ) -> Result<(), InstallError> {
        match fs::remove_dir_all(path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn has_cached_archive(&self, _candidate: &str, _version: &str) -> bool {
        false
    }
}
