//! On-disk layout of a candidate root
//!
//! ```text
//! <root>/
//!   <version>/          one directory per installed version
//!   .staging-XXXX/      in-flight installs, never treated as versions
//!   current -> <version>
//! ```

use std::fs;
use std::io;
use std::path::Path;

use tracing::debug;
use walkdir::WalkDir;

use crate::candidate::{CURRENT_LINK, Candidate};

const CURRENT_TMP: &str = ".current.tmp";

/// Point `current` at a version directory, replacing any previous target atomically
pub fn point_current(candidate: &Candidate, version: &str) -> io::Result<()> {
    fs::create_dir_all(&candidate.root)?;
    let tmp = candidate.root.join(CURRENT_TMP);
    remove_link(&tmp)?;

    // Relative target keeps the root relocatable
    make_link(Path::new(version), &tmp)?;

    let link = candidate.current_link();
    #[cfg(windows)]
    remove_link(&link)?;
    fs::rename(&tmp, &link)?;

    debug!("{} current -> {}", candidate.id, version);
    Ok(())
}

/// Remove the `current` link if present
pub fn remove_current(candidate: &Candidate) -> io::Result<()> {
    remove_link(&candidate.current_link())
}

/// Version named by the `current` link, if it is a link
pub fn read_current(candidate: &Candidate) -> io::Result<Option<String>> {
    match fs::read_link(candidate.current_link()) {
        Ok(target) => Ok(target
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        // Exists but is not a link
        Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(None),
        Err(e) => Err(e),
    }
}

/// Names of directories in the root that look like installed versions
pub fn scan_version_dirs(candidate: &Candidate) -> io::Result<Vec<String>> {
    let entries = match fs::read_dir(&candidate.root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut versions = Vec::new();
    for entry in entries {
        let entry = entry?;
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if name == CURRENT_LINK || name.starts_with('.') {
            continue;
        }
        // file_type does not follow links, so stray links are never versions
        if entry.file_type()?.is_dir() {
            versions.push(name);
        }
    }
    versions.sort();
    Ok(versions)
}

/// Total size in bytes of regular files under `path`
pub fn dir_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|metadata| metadata.len())
        .sum()
}

fn remove_link(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(metadata) if metadata.is_dir() => fs::remove_dir(path),
        Ok(_) => remove_file_or_dir_link(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(unix)]
fn make_link(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn make_link(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_dir(target, link)
}

#[cfg(unix)]
fn remove_file_or_dir_link(path: &Path) -> io::Result<()> {
    fs::remove_file(path)
}

#[cfg(windows)]
fn remove_file_or_dir_link(path: &Path) -> io::Result<()> {
    // Directory symlinks are removed with remove_dir on Windows
    fs::remove_dir(path).or_else(|_| fs::remove_file(path))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::version::ordering::VersionScheme;
    use tempfile::TempDir;

    fn candidate(dir: &TempDir) -> Candidate {
        Candidate::new("java", "Java", dir.path().join("java"), VersionScheme::Numeric)
    }

    #[test]
    fn point_current_replaces_previous_target() {
        let temp_dir = TempDir::new().unwrap();
        let java = candidate(&temp_dir);
        fs::create_dir_all(java.version_dir("17.0.2")).unwrap();
        fs::create_dir_all(java.version_dir("21.0.1")).unwrap();

        point_current(&java, "17.0.2").unwrap();
        point_current(&java, "21.0.1").unwrap();

        assert_eq!(read_current(&java).unwrap().as_deref(), Some("21.0.1"));
        assert!(!java.root.join(CURRENT_TMP).exists());
        assert!(java.current_link().join(".").is_dir());
    }

    #[test]
    fn read_current_ignores_plain_directory() {
        let temp_dir = TempDir::new().unwrap();
        let java = candidate(&temp_dir);
        fs::create_dir_all(java.current_link()).unwrap();

        assert_eq!(read_current(&java).unwrap(), None);
    }

    #[test]
    fn scan_version_dirs_skips_link_and_staging() {
        let temp_dir = TempDir::new().unwrap();
        let java = candidate(&temp_dir);
        fs::create_dir_all(java.version_dir("17.0.2")).unwrap();
        fs::create_dir_all(java.root.join(".staging-abc")).unwrap();
        fs::write(java.root.join("notes.txt"), "x").unwrap();
        point_current(&java, "17.0.2").unwrap();

        assert_eq!(scan_version_dirs(&java).unwrap(), vec!["17.0.2"]);
    }

    #[test]
    fn scan_version_dirs_of_missing_root_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let java = candidate(&temp_dir);

        assert!(scan_version_dirs(&java).unwrap().is_empty());
    }

    #[test]
    fn dir_size_sums_nested_files() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("sdk");
        fs::create_dir_all(root.join("bin")).unwrap();
        fs::write(root.join("release"), vec![0u8; 10]).unwrap();
        fs::write(root.join("bin/java"), vec![0u8; 32]).unwrap();

        assert_eq!(dir_size(&root), 42);
    }
}
