//! Archive unpacking
//!
//! Formats are detected from magic bytes rather than URL suffixes since
//! catalog download URLs often lack one.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tar::Archive;
use tracing::debug;

use crate::error::InstallError;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ZIP_MAGIC: [u8; 4] = [b'P', b'K', 0x03, 0x04];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    TarGz,
    Zip,
}

/// Identify the archive format from its first bytes
pub fn detect_format(archive: &Path) -> Result<ArchiveFormat, InstallError> {
    let mut header = [0u8; 4];
    let mut file = File::open(archive)?;
    let read = file.read(&mut header)?;

    if read >= 2 && header[..2] == GZIP_MAGIC {
        Ok(ArchiveFormat::TarGz)
    } else if read == 4 && header == ZIP_MAGIC {
        Ok(ArchiveFormat::Zip)
    } else {
        Err(InstallError::Extract("unrecognized archive format".to_string()))
    }
}

/// Unpack `archive` into `into` and return the directory holding the SDK.
///
/// Distribution archives usually wrap everything in one top-level directory
/// (`jdk-21.0.1/`); when that is the case the wrapper is returned instead.
pub fn unpack(archive: &Path, into: &Path) -> Result<PathBuf, InstallError> {
    fs::create_dir_all(into)?;

    match detect_format(archive)? {
        ArchiveFormat::TarGz => {
            debug!("Unpacking tar.gz {:?}", archive);
            let decoder = GzDecoder::new(File::open(archive)?);
            Archive::new(decoder).unpack(into).map_err(extract_error)?;
        }
        ArchiveFormat::Zip => {
            debug!("Unpacking zip {:?}", archive);
            let mut zip = zip::ZipArchive::new(File::open(archive)?)
                .map_err(|e| InstallError::Extract(e.to_string()))?;
            zip.extract(into).map_err(|e| match e {
                zip::result::ZipError::Io(e) => extract_error(e),
                e => InstallError::Extract(e.to_string()),
            })?;
        }
    }

    Ok(single_root(into)?.unwrap_or_else(|| into.to_path_buf()))
}

/// Out-of-space stays distinguishable from a corrupt archive
fn extract_error(e: io::Error) -> InstallError {
    if e.kind() == io::ErrorKind::StorageFull {
        InstallError::DiskSpace(e)
    } else {
        InstallError::Extract(e.to_string())
    }
}

fn single_root(dir: &Path) -> io::Result<Option<PathBuf>> {
    let mut entries = fs::read_dir(dir)?;
    let Some(first) = entries.next().transpose()? else {
        return Ok(None);
    };
    if entries.next().is_some() {
        return Ok(None);
    }
    if first.file_type()?.is_dir() {
        Ok(Some(first.path()))
    } else {
        Ok(None)
    }
}
