// src/error.rs

//! Error taxonomy for the formula pipeline
//!
//! Each pipeline stage has its own error enum so callers can match on the
//! stage-specific failure, and [`Error`] unifies them for the orchestrator.
//! Every variant carries the diagnostics needed to understand the failure
//! (captured command output, expected and actual digests, offending paths).

use crate::hash::HashAlgorithm;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error for any pipeline operation
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Install(#[from] InstallError),

    #[error(transparent)]
    Verify(#[from] VerifyError),

    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The run was cancelled through its cancellation token
    #[error("Pipeline cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Whether retrying the same operation could succeed
    ///
    /// Only transient network failures qualify. Integrity failures, build
    /// failures and install conflicts are deterministic.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Fetch(FetchError::Network { .. }))
    }
}

/// Malformed formula or manifest data. Never retried.
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Failed to read formula {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("Invalid formula: {0}")]
    Parse(String),

    #[error("Invalid package name '{0}'")]
    InvalidName(String),

    #[error("Invalid version '{version}': {reason}")]
    InvalidVersion { version: String, reason: String },

    #[error("Invalid source digest '{digest}': {reason}")]
    InvalidDigest { digest: String, reason: String },

    #[error("Invalid source URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Unknown install category '{category}' for '{path}'")]
    UnknownCategory { path: String, category: String },

    #[error("Invalid install path '{path}': {reason}")]
    InvalidInstallPath { path: String, reason: String },

    #[error("The {0} directive has no command")]
    EmptyCommand(&'static str),

    #[error("Invalid test pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Formula {name} declares no releases")]
    NoReleases { name: String },

    #[error("Formula {name} declares version {version} more than once")]
    DuplicateRelease { name: String, version: String },

    #[error("Formula {name} has no release {version}")]
    UnknownRelease { name: String, version: String },
}

/// Failure while obtaining the source archive
#[derive(Error, Debug)]
pub enum FetchError {
    /// Transport failure; retried up to the configured attempt count
    #[error("Failed to download {url} after {attempts} attempt(s): {reason}")]
    Network {
        url: String,
        attempts: u32,
        reason: String,
    },

    /// Downloaded bytes do not match the declared digest. Never retried.
    #[error("Integrity check failed for {url}: expected {algorithm}:{expected}, got {algorithm}:{actual}")]
    Integrity {
        url: String,
        algorithm: HashAlgorithm,
        expected: String,
        actual: String,
    },

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    InvalidManifest(#[from] ManifestError),

    #[error("Download cancelled")]
    Cancelled,

    #[error("I/O error while fetching: {0}")]
    Io(#[from] io::Error),
}

/// Failure while extracting a verified archive
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Unknown archive format: {0}")]
    UnknownFormat(String),

    /// An entry (or the target of a link entry) resolves outside the workspace
    #[error("Archive entry escapes the working directory: {entry}")]
    PathTraversal { entry: String },

    #[error("Unsupported archive entry type for {entry}")]
    UnsupportedEntry { entry: String },

    #[error("Archive contains no files")]
    Empty,

    #[error("Failed to extract archive: {0}")]
    Io(#[from] io::Error),
}

/// Failure running an external command
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("Failed to spawn '{program}': {reason}")]
    Spawn { program: String, reason: String },

    #[error("Command cancelled")]
    Cancelled,

    #[error("I/O error while running command: {0}")]
    Io(#[from] io::Error),
}

/// Failure in the build stage. Never retried.
#[derive(Error, Debug)]
pub enum BuildError {
    /// Every missing tool is listed, not just the first
    #[error("Missing build dependencies: {}", missing.join(", "))]
    MissingDependencies { missing: Vec<String> },

    #[error("Build directive `{command}` {}\n{output}", describe_exit(*exit_code, *timed_out))]
    BuildFailed {
        command: String,
        exit_code: Option<i32>,
        timed_out: bool,
        output: String,
    },

    #[error(transparent)]
    InvalidManifest(#[from] ManifestError),

    #[error(transparent)]
    Exec(#[from] ExecError),
}

/// Failure in the install stage. This run's writes are rolled back.
#[derive(Error, Debug)]
pub enum InstallError {
    #[error("Build artifact not found: {}", path.display())]
    MissingArtifact { path: PathBuf },

    /// The destination belongs to another package or to nobody we know of
    #[error("Refusing to overwrite {} (owned by {owner})", path.display())]
    Conflict { path: PathBuf, owner: String },

    #[error("Path escapes its root: {0}")]
    PathTraversal(String),

    #[error("Installation record {}: {reason}", path.display())]
    Record { path: PathBuf, reason: String },

    #[error("Package {0} is not installed")]
    NotInstalled(String),

    #[error("Failed to lock {}: {reason}", path.display())]
    Lock { path: PathBuf, reason: String },

    #[error(transparent)]
    InvalidManifest(#[from] ManifestError),

    #[error("I/O error while installing: {0}")]
    Io(#[from] io::Error),
}

/// Failure in the acceptance test. The installation is left in place.
#[derive(Error, Debug)]
pub enum VerifyError {
    #[error(
        "Acceptance test `{command}` {}; expected output matching /{pattern}/\n{output}",
        describe_exit(*exit_code, *timed_out)
    )]
    AcceptanceTestFailed {
        command: String,
        pattern: String,
        exit_code: Option<i32>,
        timed_out: bool,
        output: String,
    },

    #[error("Test fixture '{name}' unavailable: {reason}")]
    FixtureUnavailable { name: String, reason: String },

    #[error("Invalid test pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error(transparent)]
    InvalidManifest(#[from] ManifestError),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error("I/O error while verifying: {0}")]
    Io(#[from] io::Error),
}

fn describe_exit(exit_code: Option<i32>, timed_out: bool) -> String {
    match (timed_out, exit_code) {
        (true, _) => "timed out".to_string(),
        (false, Some(0)) => "exited successfully".to_string(),
        (false, Some(code)) => format!("failed with exit code {}", code),
        (false, None) => "was terminated by a signal".to_string(),
    }
}
