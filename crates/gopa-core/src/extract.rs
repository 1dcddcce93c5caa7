//! Safe extraction of downloaded toolchain archives
//!
//! Both archive kinds go through the same containment check: every entry
//! name is normalised lexically and joined onto the canonical target, and
//! anything that lands outside the target aborts the whole extraction with
//! [`GopaError::PathTraversal`]. A failed extraction removes whatever it had
//! already written, so the caller never sees a half-populated directory.

use crate::errors::{GopaError, GopaResult};
use crate::platform::ArchiveKind;
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Cursor, Read};
use std::path::{Component, Path, PathBuf};
use tar::{Archive, EntryType};
use zip::ZipArchive;

/// What to do with archive entries that are neither files nor directories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryPolicy {
    /// Fail the extraction on symlinks, hard links, devices and FIFOs
    #[default]
    Reject,
    /// Leave such entries out and carry on
    Skip,
}

/// Counts of what an extraction produced
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExtractSummary {
    pub files: usize,
    pub directories: usize,
    pub skipped: usize,
}

/// Extract `reader` into `target`, which must already exist
pub fn extract<R: Read>(
    reader: R,
    target: &Path,
    kind: ArchiveKind,
    policy: EntryPolicy,
) -> GopaResult<ExtractSummary> {
    let target = target
        .canonicalize()
        .map_err(|e| GopaError::filesystem("resolving extraction target", target, e))?;

    let mut journal = Journal::default();
    let result = match kind {
        ArchiveKind::TarGz => untar(reader, &target, policy, &mut journal),
        ArchiveKind::Zip => unzip(reader, &target, policy, &mut journal),
    };

    if result.is_err() {
        log::debug!(
            "Rolling back {} paths written to {}",
            journal.created.len(),
            target.display()
        );
        journal.rollback();
    }

    result
}

/// Resolve an archive entry name against the canonical target directory
pub fn resolve_entry_path(target: &Path, name: &str) -> GopaResult<PathBuf> {
    let traversal = || GopaError::PathTraversal {
        entry: name.to_string(),
        target: target.to_path_buf(),
    };

    // Archives built on Windows may use backslashes as separators.
    let normalised_name = name.replace('\\', "/");
    let mut relative = PathBuf::new();

    for component in Path::new(&normalised_name).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !relative.pop() {
                    return Err(traversal());
                }
            }
            Component::RootDir | Component::Prefix(_) => return Err(traversal()),
        }
    }

    let resolved = target.join(&relative);
    if !resolved.starts_with(target) {
        return Err(traversal());
    }

    Ok(resolved)
}

/// Paths created by one extraction, in creation order
#[derive(Debug, Default)]
struct Journal {
    created: Vec<PathBuf>,
}

impl Journal {
    fn create_dir_all(&mut self, path: &Path) -> GopaResult<()> {
        let mut missing = Vec::new();
        let mut cursor = Some(path);
        while let Some(dir) = cursor {
            if dir.exists() {
                break;
            }
            missing.push(dir.to_path_buf());
            cursor = dir.parent();
        }

        for dir in missing.into_iter().rev() {
            fs::create_dir(&dir)
                .map_err(|e| GopaError::filesystem("creating directory", &dir, e))?;
            self.created.push(dir);
        }
        Ok(())
    }

    fn create_file(&mut self, path: &Path, mode: Option<u32>) -> GopaResult<File> {
        if let Some(parent) = path.parent() {
            self.create_dir_all(parent)?;
        }

        let existed = path.exists();
        let file = open_truncate(path, mode)
            .map_err(|e| GopaError::filesystem("creating file", path, e))?;
        if !existed {
            self.created.push(path.to_path_buf());
        }
        Ok(file)
    }

    fn rollback(self) {
        for path in self.created.into_iter().rev() {
            let outcome = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            if let Err(e) = outcome {
                if e.kind() != io::ErrorKind::NotFound {
                    log::warn!("Failed to remove {} during rollback: {}", path.display(), e);
                }
            }
        }
    }
}

fn open_truncate(path: &Path, mode: Option<u32>) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode.map(|m| m & 0o777).unwrap_or(0o644));
    }
    #[cfg(not(unix))]
    let _ = mode;

    options.open(path)
}

fn set_dir_mode(path: &Path, mode: Option<u32>) -> GopaResult<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Some(mode) = mode {
            // Owner keeps rwx so the rest of the tree can be written.
            let permissions = fs::Permissions::from_mode((mode & 0o777) | 0o700);
            fs::set_permissions(path, permissions)
                .map_err(|e| GopaError::filesystem("setting permissions on", path, e))?;
        }
    }
    #[cfg(not(unix))]
    let _ = (path, mode);

    Ok(())
}

fn untar<R: Read>(
    reader: R,
    target: &Path,
    policy: EntryPolicy,
    journal: &mut Journal,
) -> GopaResult<ExtractSummary> {
    let mut archive = Archive::new(GzDecoder::new(reader));
    let mut summary = ExtractSummary::default();

    let entries = archive
        .entries()
        .map_err(|e| GopaError::extract(format!("Failed to read tar.gz entries: {}", e)))?;

    for entry in entries {
        let mut entry =
            entry.map_err(|e| GopaError::extract(format!("Failed to read tar.gz entry: {}", e)))?;

        let name = entry
            .path()
            .map_err(|e| GopaError::extract(format!("Failed to get entry path: {}", e)))?
            .to_string_lossy()
            .into_owned();
        let entry_type = entry.header().entry_type();

        // Global PAX headers describe the archive, not a filesystem entry.
        if entry_type == EntryType::XGlobalHeader {
            continue;
        }

        let path = resolve_entry_path(target, &name)?;
        let mode = entry.header().mode().ok();

        match entry_type {
            EntryType::Directory => {
                journal.create_dir_all(&path)?;
                set_dir_mode(&path, mode)?;
                summary.directories += 1;
            }
            EntryType::Regular | EntryType::Continuous => {
                let mut file = journal.create_file(&path, mode)?;
                io::copy(&mut entry, &mut file)
                    .map_err(|e| GopaError::filesystem("writing", &path, e))?;
                summary.files += 1;
            }
            other => match policy {
                EntryPolicy::Reject => {
                    return Err(GopaError::UnsupportedEntry {
                        entry: name,
                        kind: format!("{:?}", other),
                    });
                }
                EntryPolicy::Skip => {
                    log::debug!("Skipping {:?} entry {}", other, name);
                    summary.skipped += 1;
                }
            },
        }
    }

    Ok(summary)
}

fn unzip<R: Read>(
    mut reader: R,
    target: &Path,
    policy: EntryPolicy,
    journal: &mut Journal,
) -> GopaResult<ExtractSummary> {
    // The central directory sits at the end, so the whole archive is needed up front.
    let mut buffer = Vec::new();
    reader
        .read_to_end(&mut buffer)
        .map_err(|e| GopaError::extract(format!("Failed to read zip archive: {}", e)))?;

    let mut archive = ZipArchive::new(Cursor::new(buffer))?;

    // Validate every name before writing anything.
    let mut planned = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let file = archive.by_index(i)?;
        let path = resolve_entry_path(target, file.name())?;
        let is_link = file
            .unix_mode()
            .map(|mode| mode & 0o170000 == 0o120000)
            .unwrap_or(false);

        if is_link && policy == EntryPolicy::Reject {
            return Err(GopaError::UnsupportedEntry {
                entry: file.name().to_string(),
                kind: "Symlink".to_string(),
            });
        }
        planned.push((path, is_link));
    }

    let mut summary = ExtractSummary::default();
    for (i, (path, is_link)) in planned.into_iter().enumerate() {
        let mut file = archive.by_index(i)?;

        if is_link {
            log::debug!("Skipping symlink entry {}", file.name());
            summary.skipped += 1;
            continue;
        }

        if file.is_dir() {
            journal.create_dir_all(&path)?;
            set_dir_mode(&path, file.unix_mode())?;
            summary.directories += 1;
            continue;
        }

        let mut out = journal.create_file(&path, file.unix_mode())?;
        io::copy(&mut file, &mut out).map_err(|e| GopaError::filesystem("writing", &path, e))?;
        summary.files += 1;
    }

    Ok(summary)
}
