// src/manifest/format.rs

//! Formula file format and the resolved per-version manifest
//!
//! A formula file is TOML. Directives are shared by every release and
//! release-specific data (version, digest, optionally the URL) lives in
//! the `[[releases]]` array:
//!
//! ```toml
//! [package]
//! name = "metadata"
//! description = "Media file metadata for human consumption"
//!
//! [source]
//! url = "https://github.com/zmwangx/metadata/archive/v%(version)s.tar.gz"
//!
//! [[releases]]
//! version = "0.1.0"
//! digest = "sha256:1ac3491c1bf92fd339cabee49beb04fd913667d9f214bd2777722c25c477586e"
//!
//! [build]
//! dependencies = ["pkg-config", "cargo", "make"]
//! command = ["make", "release"]
//!
//! [[install]]
//! from = "dist/v%(version)s/metadata"
//! category = "bin"
//!
//! [test]
//! command = ["%(bin)s/metadata", "test.mp3"]
//! expect = 'Filename:\s+test.mp3.*Container format:\s+MP3'
//! fixtures = ["test.mp3"]
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A formula file: one package, many releases
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Formula {
    pub package: PackageSection,

    /// URL template shared by all releases
    pub source: SourceSection,

    #[serde(default)]
    pub releases: Vec<Release>,

    pub build: BuildDirective,

    #[serde(default)]
    pub install: Vec<InstallDirective>,

    pub test: TestDirective,
}

/// Package metadata section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageSection {
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub homepage: Option<String>,

    #[serde(default)]
    pub license: Option<String>,

    /// Packages needed at run time. Recorded, never resolved.
    #[serde(default)]
    pub runtime_dependencies: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSection {
    /// Archive URL; may contain `%(name)s` and `%(version)s`
    pub url: String,
}

/// One released version of the package
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Release {
    pub version: String,

    /// `algorithm:hex` digest of the source archive
    pub digest: String,

    /// Overrides the shared URL template for this release
    #[serde(default)]
    pub url: Option<String>,
}

/// How to build the extracted source tree
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildDirective {
    /// Tools that must be available before building
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Program followed by its arguments
    #[serde(default)]
    pub command: Vec<String>,

    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

/// Copy one build output into a category directory under the prefix
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallDirective {
    /// Path relative to the source tree; may contain template variables
    pub from: String,

    /// Category name, see [`super::Category`]
    pub category: String,
}

/// Post-install acceptance test
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestDirective {
    #[serde(default)]
    pub command: Vec<String>,

    /// Regular expression the combined stdout/stderr must match
    pub expect: String,

    /// Fixture files staged into the scratch directory before running
    #[serde(default)]
    pub fixtures: Vec<String>,
}

/// Source archive location and its declared digest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub url: String,
    pub digest: String,
}

/// Everything needed to fetch, build, install and test one package version
///
/// Built once from a [`Formula`] release. Every stage takes it by shared
/// reference, so a run never changes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    pub version: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub homepage: Option<String>,

    #[serde(default)]
    pub runtime_dependencies: Vec<String>,

    pub source: Source,

    pub build: BuildDirective,

    pub install: Vec<InstallDirective>,

    pub test: TestDirective,
}

impl Manifest {
    /// `name-version`, unique per manifest
    pub fn id(&self) -> String {
        format!("{}-{}", self.name, self.version)
    }

    /// Replace `%(name)s` and `%(version)s` in a template
    pub fn substitute(&self, template: &str) -> String {
        template
            .replace("%(name)s", &self.name)
            .replace("%(version)s", &self.version)
    }

    /// Source URL with template variables expanded
    pub fn source_url(&self) -> String {
        self.substitute(&self.source.url)
    }

    /// Last path segment of the source URL
    pub fn archive_filename(&self) -> String {
        let url = self.source_url();
        let path = url.split(['?', '#']).next().unwrap_or_default();
        path.rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .unwrap_or("source.tar.gz")
            .to_string()
    }

    /// Tools the build directive needs
    pub fn build_dependencies(&self) -> &[String] {
        &self.build.dependencies
    }

    /// Build command with template variables expanded
    pub fn build_command(&self) -> Vec<String> {
        self.build.command.iter().map(|a| self.substitute(a)).collect()
    }
}
