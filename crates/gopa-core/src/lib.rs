//! Toolchain acquisition and execution engine for the gopa playground.
//!
//! The engine discovers published toolchain releases, keeps a daily cache of
//! the catalog, installs releases into a private data directory and runs
//! submitted source through the selected installation.
//!
//! # Components
//!
//! - **Catalog client**: latest-release endpoint and download page scraping
//! - **Version cache**: date-stamped manifest, refreshed once per calendar day
//! - **Archive extractor**: tar.gz and zip extraction confined to a target directory
//! - **Installation manager**: download, stage and commit by rename; active selection
//! - **Sandbox**: temporary source file, child process, merged output
//! - **Worker**: action/event message passing with cancellation for interactive front ends

pub mod cache;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod errors;
pub mod extract;
pub mod installation;
pub mod platform;
pub mod sandbox;
pub mod version;
pub mod worker;

pub use cache::{CacheManifest, Clock, SystemClock, VersionCache};
pub use catalog::{CatalogClient, VersionSource};
pub use config::*;
pub use engine::Engine;
pub use errors::{GopaError, GopaResult};
pub use extract::{EntryPolicy, ExtractSummary};
pub use installation::{InstallStats, InstallationManager, InstalledToolchain};
pub use platform::{ArchiveKind, InstallKey, PlatformKey};
pub use sandbox::{ExecutionResult, Sandbox};
pub use version::VersionTag;
pub use worker::{Action, ActionsService, Event};

#[cfg(test)]
pub mod test_utils;
