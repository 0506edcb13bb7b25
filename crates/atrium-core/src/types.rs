//! Core data types shared across the Atrium host.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Version of the host core, compiled in from the crate manifest.
///
/// Plugin compatibility ranges (`min_core_version` / `max_core_version`)
/// are checked against this value at registration time.
pub const CORE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Error returned when a version string cannot be parsed.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid version string: {value}")]
pub struct VersionParseError {
    pub value: String,
}

/// A semantic version.
///
/// Build metadata (`+...`) is accepted on input and discarded; it never
/// participates in ordering or compatibility decisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub pre_release: Option<String>,
}

impl Version {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            pre_release: None,
        }
    }

    /// Parses a semver string (`1.2.3`, `1.2.3-beta.1`, `1.2.3+build5`).
    pub fn parse(value: &str) -> std::result::Result<Self, VersionParseError> {
        value.parse()
    }

    /// Whether this version satisfies `required` under caret semantics:
    /// the major component must match exactly and the minor/patch pair
    /// must be at least the required one.
    pub fn is_compatible(&self, required: &Version) -> bool {
        if self.major != required.major {
            return false;
        }
        match self.minor.cmp(&required.minor) {
            Ordering::Greater => true,
            Ordering::Equal => self.patch >= required.patch,
            Ordering::Less => false,
        }
    }
}

impl FromStr for Version {
    type Err = VersionParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let err = || VersionParseError {
            value: s.to_string(),
        };

        // Strip build metadata, split off the pre-release tag.
        let without_build = s.split('+').next().ok_or_else(err)?;
        let (core, pre_release) = match without_build.split_once('-') {
            Some((core, pre)) if !pre.is_empty() => (core, Some(pre.to_string())),
            Some(_) => return Err(err()),
            None => (without_build, None),
        };

        let mut parts = core.split('.');
        let major = parts.next().and_then(|p| p.parse().ok()).ok_or_else(err)?;
        let minor = parts.next().and_then(|p| p.parse().ok()).ok_or_else(err)?;
        let patch = parts.next().and_then(|p| p.parse().ok()).ok_or_else(err)?;
        if parts.next().is_some() {
            return Err(err());
        }

        Ok(Version {
            major,
            minor,
            patch,
            pre_release,
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(ref pre) = self.pre_release {
            write!(f, "-{pre}")?;
        }
        Ok(())
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (&self.pre_release, &other.pre_release) {
                // A release sorts after any of its pre-releases.
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => a.cmp(b),
            })
    }
}
