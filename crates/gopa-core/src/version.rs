//! Version tags as published by the toolchain catalog
//!
//! A tag is the toolchain name followed by `major.minor[.patch]`, e.g.
//! `go1.22.3`. Ordering follows semantic-version precedence with a missing
//! patch ordered below any explicit patch, so `go1.21` < `go1.21.0`.

use crate::errors::GopaError;
use regex::Regex;
use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;

/// An immutable, comparable release identifier
#[derive(Debug, Clone)]
pub struct VersionTag {
    raw: String,
    major: u64,
    minor: u64,
    patch: Option<u64>,
}

impl VersionTag {
    /// Parse a tag of the form `{name}{major}.{minor}[.{patch}]`
    pub fn parse(name: &str, raw: &str) -> Result<Self, GopaError> {
        let invalid = || GopaError::InvalidVersion {
            tag: raw.to_string(),
        };

        let numbers = raw.strip_prefix(name).ok_or_else(invalid)?;
        let mut parts = numbers.split('.');

        let major = parse_component(parts.next()).ok_or_else(invalid)?;
        let minor = parse_component(parts.next()).ok_or_else(invalid)?;
        let patch = match parts.next() {
            Some(part) => Some(parse_component(Some(part)).ok_or_else(invalid)?),
            None => None,
        };

        if parts.next().is_some() {
            return Err(invalid());
        }

        Ok(Self {
            raw: raw.to_string(),
            major,
            minor,
            patch,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn major(&self) -> u64 {
        self.major
    }

    pub fn minor(&self) -> u64 {
        self.minor
    }

    pub fn patch(&self) -> Option<u64> {
        self.patch
    }

    /// The numeric part without the toolchain prefix, e.g. `1.22.3`
    pub fn number(&self) -> String {
        match self.patch {
            Some(patch) => format!("{}.{}.{}", self.major, self.minor, patch),
            None => format!("{}.{}", self.major, self.minor),
        }
    }
}

fn parse_component(part: Option<&str>) -> Option<u64> {
    let part = part?;
    if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    // Reject leading zeros the same way semver does ("01" is not a version).
    if part.len() > 1 && part.starts_with('0') {
        return None;
    }
    part.parse().ok()
}

impl PartialEq for VersionTag {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for VersionTag {}

impl std::hash::Hash for VersionTag {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl Ord for VersionTag {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then(self.minor.cmp(&other.minor))
            .then(self.patch.cmp(&other.patch))
            .then_with(|| self.raw.cmp(&other.raw))
    }
}

impl PartialOrd for VersionTag {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for VersionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl Serialize for VersionTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

/// Matches catalog labels for listed releases.
///
/// Only minor versions 16 and later are listed; older releases are left out
/// of the catalog on purpose, not because they fail to parse.
#[derive(Debug, Clone)]
pub struct CatalogPattern {
    name: String,
    regex: Regex,
}

impl CatalogPattern {
    pub fn new(name: &str) -> Result<Self, GopaError> {
        let pattern = format!(r"^{}(\d+)\.(1[6-9]|[2-9]\d+)(?:\.(\d+))?$", regex::escape(name));
        let regex = Regex::new(&pattern).map_err(|e| GopaError::Config {
            message: format!("Invalid toolchain name '{}': {}", name, e),
        })?;

        Ok(Self {
            name: name.to_string(),
            regex,
        })
    }

    /// Parse a label if it is a listed release; anything else yields `None`
    pub fn matches(&self, label: &str) -> Option<VersionTag> {
        let label = label.trim();
        if !self.regex.is_match(label) {
            return None;
        }
        VersionTag::parse(&self.name, label).ok()
    }
}

/// Deduplicate and order tags newest first
pub fn sort_descending(mut tags: Vec<VersionTag>) -> Vec<VersionTag> {
    tags.sort_by(|a, b| b.cmp(a));
    tags.dedup();
    tags
}
