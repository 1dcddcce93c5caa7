//! Fixtures for the unit tests of this crate

pub mod archives;

pub use archives::*;
