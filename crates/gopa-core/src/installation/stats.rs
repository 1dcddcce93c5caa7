//! Disk usage of installed toolchains

use crate::errors::{GopaError, GopaResult};
use crate::platform::InstallKey;
use serde::Serialize;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// One toolchain on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstalledToolchain {
    pub key: InstallKey,
    pub path: PathBuf,
    /// Total size of the tree in bytes
    pub size: u64,
}

impl InstalledToolchain {
    pub fn size_human(&self) -> String {
        human_size(self.size)
    }
}

/// Installation statistics
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct InstallStats {
    /// Number of installed toolchains
    pub installations: usize,
    /// Total size of all installations in bytes
    pub total_size: u64,
}

impl InstallStats {
    pub fn from_toolchains(toolchains: &[InstalledToolchain]) -> Self {
        Self {
            installations: toolchains.len(),
            total_size: toolchains.iter().map(|t| t.size).sum(),
        }
    }

    /// Get total size in human-readable format
    pub fn total_size_human(&self) -> String {
        human_size(self.total_size)
    }
}

pub fn human_size(bytes: u64) -> String {
    let sizes = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < sizes.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, sizes[unit_index])
}

/// Apparent size of a directory tree. Symlinks are counted, not followed.
pub fn dir_size(path: &Path) -> GopaResult<u64> {
    let mut total = 0;
    for entry in WalkDir::new(path).follow_links(false) {
        let entry = entry.map_err(|e| walk_error(path, e))?;
        if entry.file_type().is_dir() {
            continue;
        }
        let metadata = entry.metadata().map_err(|e| walk_error(entry.path(), e))?;
        total += metadata.len();
    }
    Ok(total)
}

fn walk_error(path: &Path, err: walkdir::Error) -> GopaError {
    let at = err.path().unwrap_or(path).to_path_buf();
    GopaError::filesystem("walking", &at, err)
}
