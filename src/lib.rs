// src/lib.rs

//! Formulary: declarative formula pipeline
//!
//! A formula describes one package across its releases: where the source
//! lives and its digest, which tools the build needs, how to build, which
//! build outputs to install where, and how to prove the installation
//! works. The pipeline turns one release of a formula into an installed,
//! tested package.
//!
//! # Architecture
//!
//! - Manifests are immutable; every stage reads the same one
//! - Fail-closed fetch: nothing runs until the archive matches its digest
//! - Each run owns a temporary workspace that never outlives it
//! - Installs are all-or-nothing and recorded in JSON receipts
//! - External effects sit behind traits (`Transport`, `CommandRunner`,
//!   `ToolProbe`, `FixtureStager`) so the pipeline runs against fakes

pub mod build;
pub mod config;
pub mod error;
pub mod exec;
pub mod fetch;
pub mod hash;
pub mod install;
pub mod manifest;
pub mod path;
pub mod pipeline;
pub mod verify;
pub mod version;

pub use build::{BuildOutput, Builder, HostToolProbe, ToolProbe};
pub use config::Config;
pub use error::{
    ArchiveError, BuildError, Error, ExecError, FetchError, InstallError, ManifestError, Result,
    VerifyError,
};
pub use exec::{CancellationToken, CommandOutput, CommandRunner, Invocation, ProcessRunner};
pub use fetch::{Fetcher, HttpTransport, SourceTree, Transport, TransportError};
pub use hash::{Checksum, HashAlgorithm, Hasher};
pub use install::{InstallationRecord, Installer, PackageLock, ReceiptStore};
pub use manifest::{Category, Formula, Manifest};
pub use pipeline::{Pipeline, PipelineError, PipelineReport, PipelineState};
pub use verify::{DirFixtureStager, FixtureStager, Verifier, VerifyOutput};
pub use version::FormulaVersion;
