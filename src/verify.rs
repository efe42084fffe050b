// src/verify.rs

//! Acceptance test stage
//!
//! Runs a manifest's test directive against the installed files from a
//! scratch directory holding its fixtures. A failing test leaves the
//! installation in place.

use crate::config::VerifyConfig;
use crate::error::{ManifestError, VerifyError};
use crate::exec::{CancellationToken, CommandOutput, CommandRunner, Invocation};
use crate::manifest::{Category, Manifest, compile_pattern};
use crate::path::sanitize_filename;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use strum::IntoEnumIterator;
use tempfile::TempDir;
use tracing::{debug, info};

/// Supplies named fixture files for acceptance tests
pub trait FixtureStager: Send + Sync {
    /// Place fixture `name` into `scratch` under the same name
    fn stage(&self, name: &str, scratch: &Path) -> Result<(), VerifyError>;
}

/// Copies fixtures from a directory
#[derive(Debug, Clone)]
pub struct DirFixtureStager {
    root: PathBuf,
}

impl DirFixtureStager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl FixtureStager for DirFixtureStager {
    fn stage(&self, name: &str, scratch: &Path) -> Result<(), VerifyError> {
        let unavailable = |reason: String| VerifyError::FixtureUnavailable {
            name: name.to_string(),
            reason,
        };

        let file = sanitize_filename(name).map_err(|e| unavailable(e.to_string()))?;
        let source = self.root.join(file);
        if !source.is_file() {
            return Err(unavailable(format!("not found in {}", self.root.display())));
        }

        fs::copy(&source, scratch.join(file)).map_err(|e| unavailable(e.to_string()))?;
        debug!("Staged fixture {}", name);
        Ok(())
    }
}

/// Output of a passing acceptance test
#[derive(Debug, Clone)]
pub struct VerifyOutput {
    pub command: String,
    pub output: CommandOutput,
}

/// Runs acceptance tests
pub struct Verifier {
    runner: Arc<dyn CommandRunner>,
    stager: Arc<dyn FixtureStager>,
    config: VerifyConfig,
    cancel: CancellationToken,
}

impl Verifier {
    pub fn new(runner: Arc<dyn CommandRunner>, stager: Arc<dyn FixtureStager>, config: VerifyConfig) -> Self {
        Self {
            runner,
            stager,
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn verify(&self, manifest: &Manifest, prefix: &Path) -> Result<VerifyOutput, VerifyError> {
        let pattern = compile_pattern(&manifest.test.expect).map_err(|reason| VerifyError::InvalidPattern {
            pattern: manifest.test.expect.clone(),
            reason,
        })?;

        let scratch = tempfile::Builder::new()
            .prefix(&format!("formulary-test-{}-", manifest.id()))
            .tempdir()?;
        for fixture in &manifest.test.fixtures {
            self.stager.stage(fixture, scratch.path())?;
        }

        let argv = test_command(manifest, prefix);
        let invocation = Invocation::from_argv(&argv, scratch.path())
            .ok_or(ManifestError::EmptyCommand("test"))?
            .env("HOME", scratch.path().to_string_lossy())
            .timeout(self.config.timeout());

        let command = invocation.command_line();
        info!("Testing {}: {}", manifest.id(), command);
        let output = self.runner.run(&invocation, &self.cancel)?;
        close_scratch(scratch);

        if !output.success() || !pattern.is_match(&output.output) {
            return Err(VerifyError::AcceptanceTestFailed {
                command,
                pattern: pattern.as_str().to_string(),
                exit_code: output.exit_code,
                timed_out: output.timed_out,
                output: output.output,
            });
        }

        info!("Acceptance test passed for {}", manifest.id());
        Ok(VerifyOutput { command, output })
    }
}

/// Test argv with `%(prefix)s`, `%(bin)s` and the other category
/// directories expanded on top of the manifest variables
pub fn test_command(manifest: &Manifest, prefix: &Path) -> Vec<String> {
    let mut vars: Vec<(String, String)> = vec![("prefix".to_string(), prefix.display().to_string())];
    for category in Category::iter() {
        let dir = prefix.join(category.subdir(&manifest.name));
        vars.push((category.to_string(), dir.display().to_string()));
    }

    manifest
        .test
        .command
        .iter()
        .map(|arg| {
            let mut arg = manifest.substitute(arg);
            for (key, value) in &vars {
                arg = arg.replace(&format!("%({key})s"), value);
            }
            arg
        })
        .collect()
}

fn close_scratch(scratch: TempDir) {
    let path = scratch.path().to_path_buf();
    if let Err(e) = scratch.close() {
        debug!("Failed to remove scratch dir {}: {}", path.display(), e);
    }
}
