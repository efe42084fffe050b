// src/manifest/validate.rs

//! Manifest validation
//!
//! Validation is pure: it never touches the network or the filesystem.
//! Accessors such as [`Manifest::digest`] and [`Manifest::install_plan`]
//! parse on demand and report the same errors, so stages can rely on
//! them even when the caller skipped [`Manifest::validate`].

use crate::error::ManifestError;
use crate::hash::Checksum;
use crate::manifest::category::Category;
use crate::manifest::format::{Formula, Manifest};
use crate::path::sanitize_path;
use crate::version::FormulaVersion;
use regex::{Regex, RegexBuilder};
use std::path::PathBuf;
use url::Url;

/// URL schemes a source may use
const SUPPORTED_SCHEMES: &[&str] = &["http", "https", "file"];

/// One resolved install directive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallItem {
    /// Path relative to the source tree
    pub from: PathBuf,
    pub category: Category,
}

impl Manifest {
    /// Check every field that later stages depend on
    pub fn validate(&self) -> Result<(), ManifestError> {
        validate_name(&self.name)?;
        self.parsed_version()?;
        self.digest()?;
        self.parsed_url()?;

        if self.build.command.is_empty() || self.build.command[0].trim().is_empty() {
            return Err(ManifestError::EmptyCommand("build"));
        }
        for tool in &self.build.dependencies {
            if tool.trim().is_empty() {
                return Err(ManifestError::InvalidName(tool.clone()));
            }
        }

        self.install_plan()?;

        if self.test.command.is_empty() || self.test.command[0].trim().is_empty() {
            return Err(ManifestError::EmptyCommand("test"));
        }
        self.test_pattern()?;

        Ok(())
    }

    pub fn parsed_version(&self) -> Result<FormulaVersion, ManifestError> {
        FormulaVersion::parse(&self.version).map_err(|e| ManifestError::InvalidVersion {
            version: e.version,
            reason: e.reason,
        })
    }

    /// The declared archive digest
    ///
    /// Non-cryptographic algorithms are only accepted for `file://` sources.
    pub fn digest(&self) -> Result<Checksum, ManifestError> {
        let checksum = Checksum::parse(&self.source.digest).map_err(|e| ManifestError::InvalidDigest {
            digest: self.source.digest.clone(),
            reason: e.to_string(),
        })?;

        let local = self.parsed_url().is_ok_and(|url| url.scheme() == "file");
        if !checksum.algorithm.is_cryptographic() && !local {
            return Err(ManifestError::InvalidDigest {
                digest: self.source.digest.clone(),
                reason: format!("{} is not a cryptographic hash; use sha256 or sha512", checksum.algorithm),
            });
        }

        Ok(checksum)
    }

    pub fn parsed_url(&self) -> Result<Url, ManifestError> {
        let raw = self.source_url();
        let url = Url::parse(&raw).map_err(|e| ManifestError::InvalidUrl {
            url: raw.clone(),
            reason: e.to_string(),
        })?;

        if !SUPPORTED_SCHEMES.contains(&url.scheme()) {
            return Err(ManifestError::InvalidUrl {
                url: raw,
                reason: format!("unsupported scheme '{}'", url.scheme()),
            });
        }

        Ok(url)
    }

    /// Install directives with paths expanded and categories parsed
    pub fn install_plan(&self) -> Result<Vec<InstallItem>, ManifestError> {
        self.install
            .iter()
            .map(|directive| {
                let category = directive.category.parse::<Category>().map_err(|_| {
                    ManifestError::UnknownCategory {
                        path: directive.from.clone(),
                        category: directive.category.clone(),
                    }
                })?;

                let expanded = self.substitute(&directive.from);
                let from = sanitize_path(&expanded).map_err(|e| {
                    ManifestError::InvalidInstallPath {
                        path: expanded.clone(),
                        reason: e.to_string(),
                    }
                })?;

                Ok(InstallItem { from, category })
            })
            .collect()
    }

    /// Compiled acceptance pattern
    ///
    /// `.` matches newlines and `^`/`$` match at line boundaries, so a
    /// pattern can span several lines of output.
    pub fn test_pattern(&self) -> Result<Regex, ManifestError> {
        compile_pattern(&self.test.expect).map_err(|reason| ManifestError::InvalidPattern {
            pattern: self.test.expect.clone(),
            reason,
        })
    }
}

/// Compile an acceptance pattern with the flags formulas expect
pub fn compile_pattern(pattern: &str) -> Result<Regex, String> {
    RegexBuilder::new(pattern)
        .dot_matches_new_line(true)
        .multi_line(true)
        .build()
        .map_err(|e| e.to_string())
}

/// Package names become file names (receipts, locks), so keep them plain
fn validate_name(name: &str) -> Result<(), ManifestError> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && !name.starts_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '+' | '@'));

    if valid {
        Ok(())
    } else {
        Err(ManifestError::InvalidName(name.to_string()))
    }
}

/// Validate every release of a formula
///
/// Returns advisory warnings for missing optional metadata.
pub fn validate_formula(formula: &Formula) -> Result<Vec<String>, ManifestError> {
    let mut warnings = Vec::new();

    if formula.releases.is_empty() {
        return Err(ManifestError::NoReleases {
            name: formula.package.name.clone(),
        });
    }

    for release in &formula.releases {
        formula.manifest(Some(&release.version))?.validate()?;
    }

    if formula.package.description.is_none() {
        warnings.push("Missing package description".to_string());
    }
    if formula.package.homepage.is_none() {
        warnings.push("Missing package homepage".to_string());
    }
    if formula.install.is_empty() {
        warnings.push("No install directives; nothing will be installed".to_string());
    }

    Ok(warnings)
}
