use crate::error::{Error, Result};
use anyhow::Context;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;
use zip::ZipArchive;

pub const CURRENT_METADATA_ENTRY: &str = "course/course.xml";
pub const LEGACY_METADATA_ENTRY: &str = "moodle.xml";
pub const EXTRACT_DIR_PREFIX: &str = "cli_restore_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Current,
    Legacy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedArchive {
    /// Directory name relative to the archive store.
    pub dir_name: String,
    pub path: PathBuf,
    pub entry_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataLocation {
    pub path: PathBuf,
    pub format: ArchiveFormat,
}

/// Rejects anything that is not a readable regular file. Runs before any
/// extraction work is done.
pub fn validate_archive_path(path: &Path) -> Result<()> {
    let meta =
        std::fs::metadata(path).map_err(|_| Error::ArchiveUnreadable(path.to_path_buf()))?;
    if !meta.is_file() {
        return Err(Error::ArchiveNotFile(path.to_path_buf()));
    }
    File::open(path).map_err(|_| Error::ArchiveUnreadable(path.to_path_buf()))?;
    Ok(())
}

fn is_zip_file(path: &Path) -> anyhow::Result<bool> {
    let mut f = File::open(path)
        .with_context(|| format!("failed to open input file {}", path.to_string_lossy()))?;
    let mut sig = [0u8; 4];
    let read = f.read(&mut sig).context("failed to read file signature")?;
    if read < 4 {
        return Ok(false);
    }
    Ok(sig == [0x50, 0x4B, 0x03, 0x04])
}

/// Extracts `path` into a fresh `cli_restore_<uuid>` directory under `temp_root`.
pub fn extract_archive(path: &Path, temp_root: &Path) -> Result<ExtractedArchive> {
    validate_archive_path(path)?;
    if !is_zip_file(path)? {
        return Err(Error::UnsupportedArchive(path.to_path_buf()));
    }

    let dir_name = format!("{}{}", EXTRACT_DIR_PREFIX, Uuid::new_v4().simple());
    let dest = temp_root.join(&dir_name);
    std::fs::create_dir_all(&dest)
        .with_context(|| format!("failed to create directory {}", dest.to_string_lossy()))?;
    info!(archive = %path.display(), dest = %dest.display(), "extracting archive");

    let in_file = File::open(path)
        .with_context(|| format!("failed to open archive {}", path.to_string_lossy()))?;
    let mut archive = ZipArchive::new(in_file).context("invalid zip archive")?;

    let mut entry_count = 0usize;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let Some(rel) = entry.enclosed_name().map(|p| p.to_path_buf()) else {
            return Err(Error::UnsafeArchiveEntry(entry.name().to_string()));
        };
        let out_path = dest.join(&rel);
        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&out_path)
            .with_context(|| format!("failed to create {}", out_path.to_string_lossy()))?;
        std::io::copy(&mut entry, &mut out)
            .with_context(|| format!("failed to extract {}", rel.to_string_lossy()))?;
        entry_count += 1;
    }
    debug!(entry_count, "archive extracted");

    Ok(ExtractedArchive {
        dir_name,
        path: dest,
        entry_count,
    })
}

/// Finds the course metadata document, preferring the current layout.
pub fn locate_metadata(dir: &Path) -> Result<MetadataLocation> {
    let current = dir.join(CURRENT_METADATA_ENTRY);
    if current.is_file() {
        return Ok(MetadataLocation {
            path: current,
            format: ArchiveFormat::Current,
        });
    }
    let legacy = dir.join(LEGACY_METADATA_ENTRY);
    if legacy.is_file() {
        return Ok(MetadataLocation {
            path: legacy,
            format: ArchiveFormat::Legacy,
        });
    }
    Err(Error::MetadataNotFound(dir.to_path_buf()))
}
