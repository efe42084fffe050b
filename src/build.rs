// src/build.rs

//! Build stage
//!
//! Confirms every declared build tool is present, then runs the build
//! directive inside the extracted source tree. Tools are only checked,
//! never installed.

use crate::config::BuildConfig;
use crate::error::{BuildError, ManifestError};
use crate::exec::{CancellationToken, CommandOutput, CommandRunner, Invocation};
use crate::fetch::SourceTree;
use crate::manifest::Manifest;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Answers whether a named tool is available on the host
pub trait ToolProbe: Send + Sync {
    fn is_available(&self, tool: &str) -> bool;
}

/// Looks tools up on `PATH`
#[derive(Debug, Clone, Copy, Default)]
pub struct HostToolProbe;

impl ToolProbe for HostToolProbe {
    fn is_available(&self, tool: &str) -> bool {
        match which::which(tool) {
            Ok(path) => {
                debug!("Found {} at {}", tool, path.display());
                true
            }
            Err(_) => false,
        }
    }
}

/// Log of a successful build
#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub command: String,
    pub output: CommandOutput,
    pub duration: Duration,
}

/// Runs build directives
pub struct Builder {
    runner: Arc<dyn CommandRunner>,
    probe: Arc<dyn ToolProbe>,
    config: BuildConfig,
    cancel: CancellationToken,
}

impl Builder {
    pub fn new(runner: Arc<dyn CommandRunner>, probe: Arc<dyn ToolProbe>, config: BuildConfig) -> Self {
        Self {
            runner,
            probe,
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Fail with every missing build tool, not just the first
    pub fn check_dependencies(&self, manifest: &Manifest) -> Result<(), BuildError> {
        let missing: Vec<String> = manifest
            .build_dependencies()
            .iter()
            .filter(|tool| !self.probe.is_available(tool))
            .cloned()
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(BuildError::MissingDependencies { missing })
        }
    }

    /// Build the extracted source
    pub fn build(&self, manifest: &Manifest, tree: &SourceTree) -> Result<BuildOutput, BuildError> {
        self.build_in(manifest, tree.root())
    }

    /// Build in an arbitrary directory
    pub fn build_in(&self, manifest: &Manifest, source_dir: &Path) -> Result<BuildOutput, BuildError> {
        self.check_dependencies(manifest)?;

        let argv = manifest.build_command();
        let mut invocation = Invocation::from_argv(&argv, source_dir)
            .ok_or(ManifestError::EmptyCommand("build"))?
            .env("MAKEFLAGS", format!("-j{}", self.config.jobs))
            .timeout(self.config.timeout());
        for (key, value) in &manifest.build.environment {
            invocation = invocation.env(key.clone(), manifest.substitute(value));
        }

        let command = invocation.command_line();
        info!("Building {}: {}", manifest.id(), command);

        let started = Instant::now();
        let output = self.runner.run(&invocation, &self.cancel)?;
        let duration = started.elapsed();

        if !output.success() {
            return Err(BuildError::BuildFailed {
                command,
                exit_code: output.exit_code,
                timed_out: output.timed_out,
                output: output.output,
            });
        }

        info!("Built {} in {:.1}s", manifest.id(), duration.as_secs_f64());
        Ok(BuildOutput {
            command,
            output,
            duration,
        })
    }
}
