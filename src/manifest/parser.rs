// src/manifest/parser.rs

//! Formula file parsing and release selection

use crate::error::ManifestError;
use crate::manifest::format::{Formula, Manifest, Source};
use crate::version::FormulaVersion;
use std::path::Path;
use tracing::debug;

/// Parse a formula from a TOML string
pub fn parse_formula(content: &str) -> Result<Formula, ManifestError> {
    let formula: Formula =
        toml::from_str(content).map_err(|e| ManifestError::Parse(e.to_string()))?;
    debug!(
        "Parsed formula {} with {} release(s)",
        formula.package.name,
        formula.releases.len()
    );
    Ok(formula)
}

/// Parse a formula from a file
pub fn parse_formula_file(path: &Path) -> Result<Formula, ManifestError> {
    let content = std::fs::read_to_string(path).map_err(|e| ManifestError::Read {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    parse_formula(&content)
}

impl Formula {
    /// Declared versions, highest first
    ///
    /// Releases with malformed versions are skipped here; they are reported
    /// by [`Manifest::validate`] once selected.
    pub fn versions(&self) -> Vec<FormulaVersion> {
        let mut versions: Vec<FormulaVersion> = self
            .releases
            .iter()
            .filter_map(|r| FormulaVersion::parse(&r.version).ok())
            .collect();
        versions.sort_by(|a, b| b.cmp(a));
        versions
    }

    /// Manifest for the highest declared version
    pub fn latest(&self) -> Result<Manifest, ManifestError> {
        let latest = self
            .versions()
            .into_iter()
            .next()
            .ok_or_else(|| ManifestError::NoReleases {
                name: self.package.name.clone(),
            })?;
        self.manifest(Some(latest.as_str()))
    }

    /// Manifest for one release, or the latest when `version` is `None`
    ///
    /// Versions are matched by ordering, so `1.2` selects a release
    /// declared as `1.2.0`.
    pub fn manifest(&self, version: Option<&str>) -> Result<Manifest, ManifestError> {
        let Some(requested) = version else {
            return self.latest();
        };

        if self.releases.is_empty() {
            return Err(ManifestError::NoReleases {
                name: self.package.name.clone(),
            });
        }

        let wanted = FormulaVersion::parse(requested).ok();
        let mut matches = self.releases.iter().filter(|release| {
            match (&wanted, FormulaVersion::parse(&release.version)) {
                (Some(wanted), Ok(declared)) => *wanted == declared,
                _ => release.version == requested,
            }
        });

        let release = matches.next().ok_or_else(|| ManifestError::UnknownRelease {
            name: self.package.name.clone(),
            version: requested.to_string(),
        })?;

        if matches.next().is_some() {
            return Err(ManifestError::DuplicateRelease {
                name: self.package.name.clone(),
                version: requested.to_string(),
            });
        }

        Ok(Manifest {
            name: self.package.name.clone(),
            version: release.version.clone(),
            description: self.package.description.clone(),
            homepage: self.package.homepage.clone(),
            runtime_dependencies: self.package.runtime_dependencies.clone(),
            source: Source {
                url: release.url.clone().unwrap_or_else(|| self.source.url.clone()),
                digest: release.digest.clone(),
            },
            build: self.build.clone(),
            install: self.install.clone(),
            test: self.test.clone(),
        })
    }
}
