// src/config.rs

//! Pipeline configuration
//!
//! All settings have defaults, so an empty file (or no file) is a valid
//! configuration. Example `formulary.toml`:
//!
//! ```toml
//! work_dir = "/var/tmp/formulary"
//!
//! [fetch]
//! max_attempts = 3
//! retry_delay_ms = 1000
//! timeout_secs = 300
//!
//! [build]
//! timeout_secs = 3600
//! jobs = 8
//!
//! [verify]
//! timeout_secs = 300
//! fixtures_dir = "/usr/share/formulary/fixtures"
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Parent directory for per-run workspaces (system temp dir if unset)
    pub work_dir: Option<PathBuf>,
    pub fetch: FetchConfig,
    pub build: BuildConfig,
    pub verify: VerifyConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| Error::Config(format!("Invalid config: {}", e)))?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<()> {
        if self.fetch.max_attempts == 0 {
            return Err(Error::Config("fetch.max_attempts must be at least 1".to_string()));
        }
        if self.build.jobs == 0 {
            return Err(Error::Config("build.jobs must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Attempts for transient network failures, including the first
    pub max_attempts: u32,
    /// Base backoff; attempt `n` waits `n * retry_delay_ms`
    pub retry_delay_ms: u64,
    /// Per-attempt transfer timeout
    pub timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_ms: 1000,
            timeout_secs: 300,
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_delay_ms.saturating_mul(attempt as u64))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    pub timeout_secs: u64,
    /// Exported to the build as `MAKEFLAGS=-j<jobs>`
    pub jobs: u32,
}

impl Default for BuildConfig {
    fn default() -> Self {
        let jobs = std::thread::available_parallelism()
            .map(|p| p.get() as u32)
            .unwrap_or(4);

        Self {
            timeout_secs: 3600,
            jobs,
        }
    }
}

impl BuildConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    pub timeout_secs: u64,
    /// Directory holding acceptance test fixtures
    pub fixtures_dir: Option<PathBuf>,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            fixtures_dir: None,
        }
    }
}

impl VerifyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
