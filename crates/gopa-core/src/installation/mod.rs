//! Toolchain installations under `<root>/gos`
//!
//! Each installation is one extracted release tree named by its
//! [`InstallKey`](crate::platform::InstallKey). A tree becomes visible only
//! through a single rename out of a staging directory, so a failed or
//! interrupted install never leaves a half-populated key behind.

pub mod manager;
pub mod stats;

pub use manager::*;
pub use stats::*;

/// Prefix of in-flight staging directories; never listed as installations
pub const STAGING_PREFIX: &str = ".staging-";
