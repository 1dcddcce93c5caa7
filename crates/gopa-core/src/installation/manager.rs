//! Download, stage and commit toolchain installations

use crate::catalog::until_cancelled;
use crate::config::{DataDir, GopaConfig};
use crate::errors::{GopaError, GopaResult};
use crate::extract::{extract, EntryPolicy};
use crate::installation::stats::{dir_size, InstallStats, InstalledToolchain};
use crate::installation::STAGING_PREFIX;
use crate::platform::{ArchiveKind, InstallKey, PlatformKey};
use crate::version::VersionTag;
use futures_util::StreamExt;
use std::fs::{self, File};
use std::io::{BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

/// Owns the versions directory and the process-wide active selection
pub struct InstallationManager {
    data: DataDir,
    client: reqwest::Client,
    base_url: String,
    toolchain_name: String,
    entry_policy: EntryPolicy,
    platform: PlatformKey,
    /// Longest wait for the response head or for the next body chunk
    idle_timeout: Duration,
    active: Mutex<Option<InstallKey>>,
}

impl InstallationManager {
    pub fn new(config: &GopaConfig, client: reqwest::Client) -> Self {
        Self {
            data: config.data_dir(),
            client,
            base_url: config.base_url().to_string(),
            toolchain_name: config.toolchain_name.clone(),
            entry_policy: config.entry_policy,
            platform: PlatformKey::current(),
            idle_timeout: Duration::from_secs(config.http_timeout_secs),
            active: Mutex::new(None),
        }
    }

    /// Install for a platform other than the host
    pub fn with_platform(mut self, platform: PlatformKey) -> Self {
        self.platform = platform;
        self
    }

    pub fn platform(&self) -> &PlatformKey {
        &self.platform
    }

    pub fn install_key(&self, tag: &VersionTag) -> InstallKey {
        InstallKey::new(tag, &self.platform)
    }

    pub fn install_dir(&self, key: &InstallKey) -> PathBuf {
        self.data.versions_dir().join(key.as_str())
    }

    pub fn is_installed(&self, key: &InstallKey) -> bool {
        self.install_dir(key).is_dir()
    }

    /// Runner executable inside an installation, e.g. `gos/<key>/bin/go`
    pub fn runner_path(&self, key: &InstallKey) -> PathBuf {
        self.install_dir(key)
            .join("bin")
            .join(format!("{}{}", self.toolchain_name, self.platform.exe_suffix()))
    }

    pub fn download_url(&self, key: &InstallKey) -> String {
        format!(
            "{}/dl/{}",
            self.base_url,
            key.archive_name(self.platform.archive_kind())
        )
    }

    /// Make sure the release is on disk and return its key.
    ///
    /// An existing installation short-circuits before any network traffic.
    pub async fn ensure_installed(
        &self,
        tag: &VersionTag,
        cancel: &CancellationToken,
    ) -> GopaResult<InstallKey> {
        let key = self.install_key(tag);
        if self.is_installed(&key) {
            log::debug!("{} already installed", key);
            return Ok(key);
        }

        self.data.ensure()?;
        let archive = self.download(&key, cancel).await?;

        if cancel.is_cancelled() {
            return Err(GopaError::Cancelled);
        }

        let data = self.data.clone();
        let target = self.install_dir(&key);
        let kind = self.platform.archive_kind();
        let policy = self.entry_policy;
        let installed = tokio::task::spawn_blocking(move || commit(&data, archive, &target, kind, policy))
            .await
            .map_err(|e| GopaError::Extract {
                message: format!("extraction task failed: {}", e),
            })??;

        if installed {
            log::info!("Installed {} into {}", key, self.install_dir(&key).display());
        } else {
            log::info!("{} was installed concurrently, keeping existing tree", key);
        }
        Ok(key)
    }

    /// Stream the archive into an anonymous temporary file
    async fn download(&self, key: &InstallKey, cancel: &CancellationToken) -> GopaResult<File> {
        let url = self.download_url(key);
        log::info!("Downloading {}", url);

        let response = until_cancelled(cancel, self.within_idle(&url, self.client.get(&url).send()))
            .await??
            .map_err(|e| GopaError::network(format!("downloading {}", url), e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GopaError::UnexpectedStatus {
                url,
                status: status.as_u16(),
            });
        }

        let versions_dir = self.data.versions_dir();
        let spool = tempfile::tempfile_in(&versions_dir)
            .map_err(|e| GopaError::filesystem("creating download file in", &versions_dir, e))?;
        let mut file = tokio::fs::File::from_std(spool);

        let mut stream = response.bytes_stream();
        let mut received: u64 = 0;
        while let Some(chunk) = until_cancelled(cancel, self.within_idle(&url, stream.next())).await?? {
            let chunk = chunk.map_err(|e| GopaError::network(format!("downloading {}", url), e))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| GopaError::filesystem("spooling download in", &versions_dir, e))?;
            received += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|e| GopaError::filesystem("spooling download in", &versions_dir, e))?;

        log::debug!("Downloaded {} bytes from {}", received, url);

        let mut spool = file.into_std().await;
        spool
            .seek(SeekFrom::Start(0))
            .map_err(|e| GopaError::filesystem("rewinding download in", &versions_dir, e))?;
        Ok(spool)
    }

    /// Fail with a network error when `future` makes no progress for the idle timeout.
    /// Total transfer time is unbounded.
    async fn within_idle<F: std::future::Future>(&self, url: &str, future: F) -> GopaResult<F::Output> {
        tokio::time::timeout(self.idle_timeout, future)
            .await
            .map_err(|_| GopaError::Network {
                context: format!("downloading {}", url),
                message: format!("no data received for {:?}", self.idle_timeout),
            })
    }

    /// Make `key` the active installation. Does not touch disk.
    pub fn select(&self, key: InstallKey) {
        log::info!("Selected {}", key);
        *self.lock_active() = Some(key);
    }

    pub fn active(&self) -> Option<InstallKey> {
        self.lock_active().clone()
    }

    /// Runner of the active installation, resolved under the selection lock
    pub fn active_runner(&self) -> GopaResult<PathBuf> {
        let active = self.lock_active();
        match active.as_ref() {
            Some(key) => Ok(self.runner_path(key)),
            None => Err(GopaError::NoActiveInstallation),
        }
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<InstallKey>> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Keys of every committed installation, sorted
    pub async fn installed(&self) -> GopaResult<Vec<InstallKey>> {
        let mut keys = Vec::new();
        let versions_dir = self.data.versions_dir();
        let mut entries = match tokio::fs::read_dir(&versions_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(keys),
            Err(e) => return Err(GopaError::filesystem("reading", &versions_dir, e)),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| GopaError::filesystem("reading", &versions_dir, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            if is_dir {
                keys.push(InstallKey::from_raw(name));
            }
        }

        keys.sort();
        Ok(keys)
    }

    /// Every installation with its size on disk
    pub async fn installations(&self) -> GopaResult<Vec<InstalledToolchain>> {
        let keys = self.installed().await?;
        let dirs: Vec<(InstallKey, PathBuf)> = keys
            .into_iter()
            .map(|key| {
                let path = self.install_dir(&key);
                (key, path)
            })
            .collect();

        tokio::task::spawn_blocking(move || {
            dirs.into_iter()
                .map(|(key, path)| {
                    let size = dir_size(&path)?;
                    Ok(InstalledToolchain { key, path, size })
                })
                .collect::<GopaResult<Vec<_>>>()
        })
        .await
        .map_err(|e| GopaError::Filesystem {
            context: "measuring installations".to_string(),
            message: e.to_string(),
        })?
    }

    pub async fn stats(&self) -> GopaResult<InstallStats> {
        Ok(InstallStats::from_toolchains(&self.installations().await?))
    }

    /// Delete an installation, clearing the selection if it pointed there
    pub async fn uninstall(&self, key: &InstallKey) -> GopaResult<()> {
        let name = key.as_str();
        if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\']) || !self.is_installed(key) {
            return Err(GopaError::NotInstalled {
                key: name.to_string(),
            });
        }

        {
            let mut active = self.lock_active();
            if active.as_ref() == Some(key) {
                *active = None;
            }
        }

        let data = self.data.clone();
        let dir = self.install_dir(key);
        tokio::task::spawn_blocking(move || -> GopaResult<()> {
            let _lock = data.lock()?;
            fs::remove_dir_all(&dir).map_err(|e| GopaError::filesystem("removing", &dir, e))
        })
        .await
        .map_err(|e| GopaError::Filesystem {
            context: format!("removing {}", key),
            message: e.to_string(),
        })??;

        log::info!("Uninstalled {}", key);
        Ok(())
    }
}

/// Extract into a staging directory and rename it into place.
///
/// Returns `false` when another process committed the same key first.
fn commit(
    data: &DataDir,
    archive: File,
    target: &Path,
    kind: ArchiveKind,
    policy: EntryPolicy,
) -> GopaResult<bool> {
    let _lock = data.lock()?;
    if target.is_dir() {
        return Ok(false);
    }

    let versions_dir = data.versions_dir();
    let staging = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .tempdir_in(&versions_dir)
        .map_err(|e| GopaError::filesystem("creating staging directory in", &versions_dir, e))?;

    let summary = extract(BufReader::new(archive), staging.path(), kind, policy)?;
    log::debug!(
        "Extracted {} files, {} directories ({} skipped) into {}",
        summary.files,
        summary.directories,
        summary.skipped,
        staging.path().display()
    );

    let tree = single_top_level_dir(staging.path())?.unwrap_or_else(|| staging.path().to_path_buf());
    fs::rename(&tree, target).map_err(|e| GopaError::filesystem("renaming into", target, e))?;

    Ok(true)
}

/// The only entry of `dir`, when that entry is a directory
fn single_top_level_dir(dir: &Path) -> GopaResult<Option<PathBuf>> {
    let mut entries = fs::read_dir(dir).map_err(|e| GopaError::filesystem("reading", dir, e))?;
    let first = match entries.next() {
        Some(entry) => entry.map_err(|e| GopaError::filesystem("reading", dir, e))?,
        None => return Ok(None),
    };
    if entries.next().is_some() {
        return Ok(None);
    }
    let is_dir = first
        .file_type()
        .map_err(|e| GopaError::filesystem("inspecting", &first.path(), e))?
        .is_dir();
    Ok(is_dir.then(|| first.path()))
}
