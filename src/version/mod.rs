// src/version/mod.rs

//! Formula version tokens
//!
//! Formula releases use semantic-version-like tokens: one or more dot
//! separated numeric components, an optional `-prerelease` suffix and an
//! optional `+build` suffix. Examples: `0.1.9`, `1.2`, `2.0.0-rc.1`,
//! `1.2.3.4`.
//!
//! Ordering pads missing numeric components with zeros (`1.2 == 1.2.0`),
//! ranks a prerelease below its release, and ignores build metadata, the
//! same way [`semver`] does for three-component versions.

use semver::{BuildMetadata, Prerelease};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Why a version token is malformed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionParseError {
    pub version: String,
    pub reason: String,
}

impl fmt::Display for VersionParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid version '{}': {}", self.version, self.reason)
    }
}

impl std::error::Error for VersionParseError {}

/// A parsed, comparable formula version
#[derive(Debug, Clone)]
pub struct FormulaVersion {
    raw: String,
    components: Vec<u64>,
    pre: Prerelease,
    build: BuildMetadata,
}

impl FormulaVersion {
    pub fn parse(s: &str) -> Result<Self, VersionParseError> {
        let fail = |reason: &str| VersionParseError {
            version: s.to_string(),
            reason: reason.to_string(),
        };

        if s.is_empty() {
            return Err(fail("empty version"));
        }
        if s.trim() != s {
            return Err(fail("surrounding whitespace"));
        }

        let (rest, build) = match s.split_once('+') {
            Some((_, "")) => return Err(fail("empty build metadata")),
            Some((rest, build)) => (
                rest,
                BuildMetadata::new(build).map_err(|e| fail(&e.to_string()))?,
            ),
            None => (s, BuildMetadata::EMPTY),
        };

        let (core, pre) = match rest.split_once('-') {
            Some((_, "")) => return Err(fail("empty prerelease")),
            Some((core, pre)) => (
                core,
                Prerelease::new(pre).map_err(|e| fail(&e.to_string()))?,
            ),
            None => (rest, Prerelease::EMPTY),
        };

        let mut components = Vec::new();
        for part in core.split('.') {
            if part.is_empty() {
                return Err(fail("empty numeric component"));
            }
            if !part.chars().all(|c| c.is_ascii_digit()) {
                return Err(fail("numeric components must be digits"));
            }
            let value = part
                .parse::<u64>()
                .map_err(|_| fail("numeric component out of range"))?;
            components.push(value);
        }

        Ok(Self {
            raw: s.to_string(),
            components,
            pre,
            build,
        })
    }

    /// The version exactly as written in the formula
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn components(&self) -> &[u64] {
        &self.components
    }

    pub fn is_prerelease(&self) -> bool {
        !self.pre.is_empty()
    }

    /// Convert to a [`semver::Version`] when the token has at most three
    /// numeric components
    pub fn to_semver(&self) -> Option<semver::Version> {
        if self.components.len() > 3 {
            return None;
        }
        let get = |i: usize| self.components.get(i).copied().unwrap_or(0);
        let mut version = semver::Version::new(get(0), get(1), get(2));
        version.pre = self.pre.clone();
        version.build = self.build.clone();
        Some(version)
    }
}

impl fmt::Display for FormulaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for FormulaVersion {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Ord for FormulaVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.components.len().max(other.components.len());
        for i in 0..len {
            let a = self.components.get(i).copied().unwrap_or(0);
            let b = other.components.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => {}
                ord => return ord,
            }
        }

        // A release outranks any of its prereleases
        match (self.pre.is_empty(), other.pre.is_empty()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => self.pre.cmp(&other.pre),
        }
    }
}

impl PartialOrd for FormulaVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for FormulaVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FormulaVersion {}
