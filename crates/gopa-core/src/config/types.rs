//! Configuration types and the on-disk data directory layout

use crate::errors::{GopaError, GopaResult};
use crate::extract::EntryPolicy;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

pub const DEFAULT_HOME_DIRNAME: &str = ".gopa";
pub const DEFAULT_BASE_URL: &str = "https://go.dev";
pub const LOG_FILENAME: &str = "gopa.log";
pub const VERSIONS_DIRNAME: &str = "gos";
pub const MANIFEST_FILENAME: &str = "versions.txt";
pub const LOCK_FILENAME: &str = ".gopa.lock";
pub const CONFIG_FILENAME: &str = "config.yaml";

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GopaConfig {
    /// Private root directory holding the log, manifest and installations
    pub home: PathBuf,
    /// Base URL of the toolchain distribution site
    pub base_url: String,
    /// Prefix of every version tag, e.g. `go` in `go1.22.3`
    pub toolchain_name: String,
    /// Verb passed to the runner before the source file
    pub run_command: String,
    /// Extension given to submitted source files
    pub source_extension: String,
    pub user_agent: String,
    /// Timeout applied to every HTTP request, including archive downloads
    pub http_timeout_secs: u64,
    /// Handling of symlinks and other special archive entries
    pub entry_policy: EntryPolicy,
}

impl Default for GopaConfig {
    fn default() -> Self {
        Self {
            home: default_home(),
            base_url: DEFAULT_BASE_URL.to_string(),
            toolchain_name: "go".to_string(),
            run_command: "run".to_string(),
            source_extension: "go".to_string(),
            user_agent: format!("gopa/{}", env!("CARGO_PKG_VERSION")),
            http_timeout_secs: 300,
            entry_policy: EntryPolicy::default(),
        }
    }
}

impl GopaConfig {
    /// Default configuration rooted at a specific directory
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> GopaResult<()> {
        if self.home.as_os_str().is_empty() {
            return Err(GopaError::Config {
                message: "home directory must not be empty".to_string(),
            });
        }

        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(GopaError::Config {
                message: format!("base_url must be an http(s) URL, got '{}'", self.base_url),
            });
        }

        if self.toolchain_name.trim().is_empty() {
            return Err(GopaError::Config {
                message: "toolchain_name must not be empty".to_string(),
            });
        }

        if self.source_extension.trim().is_empty() || self.source_extension.contains('/') {
            return Err(GopaError::Config {
                message: format!("invalid source_extension '{}'", self.source_extension),
            });
        }

        if self.http_timeout_secs == 0 {
            return Err(GopaError::Config {
                message: "http_timeout_secs must be greater than zero".to_string(),
            });
        }

        Ok(())
    }

    /// Base URL without a trailing slash
    pub fn base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    pub fn data_dir(&self) -> DataDir {
        DataDir::new(self.home.clone())
    }
}

fn default_home() -> PathBuf {
    match dirs::home_dir() {
        Some(home) => home.join(DEFAULT_HOME_DIRNAME),
        None => PathBuf::from(DEFAULT_HOME_DIRNAME),
    }
}

/// Paths inside the private root directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn log_file(&self) -> PathBuf {
        self.root.join(LOG_FILENAME)
    }

    pub fn versions_dir(&self) -> PathBuf {
        self.root.join(VERSIONS_DIRNAME)
    }

    pub fn manifest_file(&self) -> PathBuf {
        self.root.join(MANIFEST_FILENAME)
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join(CONFIG_FILENAME)
    }

    pub fn lock_file(&self) -> PathBuf {
        self.root.join(LOCK_FILENAME)
    }

    /// Create the root and versions directories if they are missing
    pub fn ensure(&self) -> GopaResult<()> {
        for dir in [self.root.clone(), self.versions_dir()] {
            fs::create_dir_all(&dir)
                .map_err(|e| GopaError::filesystem("creating directory", &dir, e))?;
        }
        Ok(())
    }

    /// Take the advisory lock guarding manifest rewrites and installation commits.
    ///
    /// Blocks until the lock is free. The lock is released when the guard drops.
    pub fn lock(&self) -> GopaResult<DataDirLock> {
        let path = self.lock_file();
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| GopaError::filesystem("opening lock file", &path, e))?;

        file.lock_exclusive()
            .map_err(|e| GopaError::filesystem("locking", &path, e))?;

        Ok(DataDirLock { file, path })
    }
}

/// Held advisory lock on the data directory
#[derive(Debug)]
pub struct DataDirLock {
    file: File,
    path: PathBuf,
}

impl Drop for DataDirLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            log::warn!("Failed to release lock {}: {}", self.path.display(), e);
        }
    }
}
