//! Error types for the toolchain engine
//!
//! Every failure carries the stage or path it came from so callers can log
//! and report it without guessing. Nothing here is retried automatically;
//! retry policy belongs to whoever drives the engine.
//!
//! A program that fails to compile or exits non-zero is *not* an error: its
//! diagnostics are ordinary output of the sandbox run.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while discovering, installing or running a toolchain
#[derive(Error, Debug)]
pub enum GopaError {
    #[error("Network error while {context}: {message}")]
    Network { context: String, message: String },

    #[error("Unexpected HTTP status {status} from {url}")]
    UnexpectedStatus { url: String, status: u16 },

    #[error("Parse error: {message}")]
    Parse { message: String },

    #[error("Archive entry '{entry}' resolves outside of {}", .target.display())]
    PathTraversal { entry: String, target: PathBuf },

    #[error("Archive entry '{entry}' has unsupported type {kind}")]
    UnsupportedEntry { entry: String, kind: String },

    #[error("Extraction failed: {message}")]
    Extract { message: String },

    #[error("Filesystem error while {context}: {message}")]
    Filesystem { context: String, message: String },

    #[error("Failed to start '{}': {message}", .program.display())]
    Spawn { program: PathBuf, message: String },

    #[error("No toolchain is currently selected")]
    NoActiveInstallation,

    #[error("Toolchain '{key}' is not installed")]
    NotInstalled { key: String },

    #[error("Invalid version tag '{tag}'")]
    InvalidVersion { tag: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Operation cancelled")]
    Cancelled,
}

impl GopaError {
    /// Filesystem failure tied to the operation and path that caused it
    pub fn filesystem(context: impl Into<String>, path: &Path, err: impl std::fmt::Display) -> Self {
        GopaError::Filesystem {
            context: format!("{} {}", context.into(), path.display()),
            message: err.to_string(),
        }
    }

    /// Transport failure tied to the request that caused it
    pub fn network(context: impl Into<String>, err: impl std::fmt::Display) -> Self {
        GopaError::Network {
            context: context.into(),
            message: err.to_string(),
        }
    }

    pub fn extract(err: impl std::fmt::Display) -> Self {
        GopaError::Extract {
            message: err.to_string(),
        }
    }

    /// Whether the error came from the remote service rather than local state
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            GopaError::Network { .. } | GopaError::UnexpectedStatus { .. }
        )
    }
}

impl From<std::io::Error> for GopaError {
    fn from(err: std::io::Error) -> Self {
        GopaError::Filesystem {
            context: "performing I/O".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for GopaError {
    fn from(err: reqwest::Error) -> Self {
        let context = match err.url() {
            Some(url) => format!("requesting {}", url),
            None => "sending request".to_string(),
        };
        GopaError::Network {
            context,
            message: err.to_string(),
        }
    }
}

impl From<zip::result::ZipError> for GopaError {
    fn from(err: zip::result::ZipError) -> Self {
        GopaError::Extract {
            message: err.to_string(),
        }
    }
}

/// Result type for engine operations
pub type GopaResult<T> = Result<T, GopaError>;
