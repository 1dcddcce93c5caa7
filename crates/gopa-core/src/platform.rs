//! Host platform detection and installation naming

use crate::version::VersionTag;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Host operating system and architecture in the toolchain's vocabulary
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlatformKey {
    pub os: String,
    pub arch: String,
}

impl PlatformKey {
    /// Get the current platform
    pub fn current() -> Self {
        Self::from_rust(std::env::consts::OS, std::env::consts::ARCH)
    }

    /// Translate Rust's target names into the names used in release archives
    pub fn from_rust(os: &str, arch: &str) -> Self {
        let os = match os {
            "macos" => "darwin",
            other => other,
        };

        let arch = match arch {
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            "x86" => "386",
            "arm" => "armv6l",
            "powerpc64" => "ppc64",
            "loongarch64" => "loong64",
            other => other,
        };

        Self {
            os: os.to_string(),
            arch: arch.to_string(),
        }
    }

    pub fn is_windows(&self) -> bool {
        self.os == "windows"
    }

    /// Archive format published for this platform
    pub fn archive_kind(&self) -> ArchiveKind {
        ArchiveKind::for_platform(self)
    }

    /// Suffix the runner executable carries on this platform
    pub fn exe_suffix(&self) -> &'static str {
        if self.is_windows() {
            ".exe"
        } else {
            ""
        }
    }
}

impl fmt::Display for PlatformKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.os, self.arch)
    }
}

/// Compression format of a downloaded toolchain archive.
///
/// Chosen from the host platform, never sniffed from archive content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    TarGz,
    Zip,
}

impl ArchiveKind {
    pub fn for_platform(platform: &PlatformKey) -> Self {
        if platform.is_windows() {
            ArchiveKind::Zip
        } else {
            ArchiveKind::TarGz
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveKind::TarGz => "tar.gz",
            ArchiveKind::Zip => "zip",
        }
    }
}

/// Names one on-disk installation: version plus platform, e.g. `go1.22.3.linux-amd64`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstallKey(String);

impl InstallKey {
    pub fn new(version: &VersionTag, platform: &PlatformKey) -> Self {
        Self(format!("{}.{}", version, platform))
    }

    /// Wrap a key read back from disk or typed by the user
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Archive file name for this installation, e.g. `go1.22.3.linux-amd64.tar.gz`
    pub fn archive_name(&self, kind: ArchiveKind) -> String {
        format!("{}.{}", self.0, kind.extension())
    }
}

impl fmt::Display for InstallKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
