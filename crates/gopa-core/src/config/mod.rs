//! Configuration and on-disk layout of the private data directory

pub mod loader;
pub mod types;

pub use loader::*;
pub use types::*;
