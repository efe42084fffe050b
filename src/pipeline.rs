// src/pipeline.rs

//! Pipeline orchestrator
//!
//! Drives one manifest through
//! `Pending → Fetching → Building → Installing → Verifying → Done`.
//! The first failure moves the run to `Failed` and skips every later stage.
//! The source workspace belongs to the run and is removed when the run
//! ends, however it ends. The package lock is held from `Installing`
//! through `Verifying` so concurrent runs for the same name serialize on
//! the prefix while independent packages proceed in parallel.

use crate::build::{BuildOutput, Builder, HostToolProbe, ToolProbe};
use crate::config::Config;
use crate::error::{BuildError, Error, ExecError, FetchError, VerifyError};
use crate::exec::{CancellationToken, CommandRunner, ProcessRunner};
use crate::fetch::{Fetcher, HttpTransport, Transport};
use crate::install::{InstallationRecord, Installer, PackageLock};
use crate::manifest::Manifest;
use crate::verify::{DirFixtureStager, FixtureStager, Verifier, VerifyOutput};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use strum_macros::{AsRefStr, Display};
use tracing::{debug, error, info};

/// Fixture directory used when the configuration names none
pub const DEFAULT_FIXTURES_DIR: &str = "fixtures";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum PipelineState {
    Pending,
    Fetching,
    Building,
    Installing,
    Verifying,
    Done,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Whether `next` may follow `self`
    ///
    /// Stages run strictly in order; `Failed` is reachable from any
    /// non-terminal state and terminal states lead nowhere.
    pub fn can_transition_to(&self, next: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, next),
            (Pending, Fetching)
                | (Fetching, Building)
                | (Building, Installing)
                | (Installing, Verifying)
                | (Verifying, Done)
        ) || (!self.is_terminal() && next == Failed)
    }
}

/// Outcome of a successful run
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub record: InstallationRecord,
    /// Every state visited, `Pending` first and `Done` last
    pub history: Vec<PipelineState>,
    pub build: BuildOutput,
    pub test: VerifyOutput,
}

/// A failed run: where it stopped and why
#[derive(Debug, thiserror::Error)]
#[error("{package} failed while {failed_at}: {error}")]
pub struct PipelineError {
    pub package: String,
    pub failed_at: PipelineState,
    /// Every state visited, ending in `Failed`
    pub history: Vec<PipelineState>,
    #[source]
    pub error: Error,
}

impl PipelineError {
    pub fn into_error(self) -> Error {
        self.error
    }
}

/// Tracks the current state and the path taken to it
#[derive(Debug)]
struct Run {
    package: String,
    state: PipelineState,
    history: Vec<PipelineState>,
}

impl Run {
    fn new(package: String) -> Self {
        Self {
            package,
            state: PipelineState::Pending,
            history: vec![PipelineState::Pending],
        }
    }

    fn advance(&mut self, next: PipelineState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid transition {} -> {}",
            self.state,
            next
        );
        info!("{}: {} -> {}", self.package, self.state, next);
        self.state = next;
        self.history.push(next);
    }

    fn fail(mut self, error: impl Into<Error>) -> PipelineError {
        let error = normalize(error.into());
        let failed_at = self.state;
        error!("{} failed while {}: {}", self.package, failed_at, error);
        self.advance(PipelineState::Failed);

        PipelineError {
            package: self.package,
            failed_at,
            history: self.history,
            error,
        }
    }
}

/// Stage-level cancellation errors surface as [`Error::Cancelled`]
fn normalize(error: Error) -> Error {
    match error {
        Error::Fetch(FetchError::Cancelled)
        | Error::Build(BuildError::Exec(ExecError::Cancelled))
        | Error::Verify(VerifyError::Exec(ExecError::Cancelled)) => Error::Cancelled,
        other => other,
    }
}

/// Runs manifests through every stage
pub struct Pipeline {
    config: Config,
    transport: Arc<dyn Transport>,
    runner: Arc<dyn CommandRunner>,
    probe: Arc<dyn ToolProbe>,
    stager: Arc<dyn FixtureStager>,
    cancel: CancellationToken,
}

impl Pipeline {
    /// Pipeline backed by the host: HTTP downloads, real processes, `PATH`
    /// lookups and fixtures from the configured directory
    pub fn new(config: Config) -> Result<Self, Error> {
        let transport = HttpTransport::new(config.fetch.timeout())
            .map_err(|e| Error::Config(e.to_string()))?;
        let fixtures = config
            .verify
            .fixtures_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_FIXTURES_DIR));

        Ok(Self {
            config,
            transport: Arc::new(transport),
            runner: Arc::new(ProcessRunner),
            probe: Arc::new(HostToolProbe),
            stager: Arc::new(DirFixtureStager::new(fixtures)),
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn ToolProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_stager(mut self, stager: Arc<dyn FixtureStager>) -> Self {
        self.stager = stager;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that cancels runs of this pipeline
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn fetcher(&self) -> Fetcher {
        let fetcher = Fetcher::new(self.transport.clone(), self.config.fetch.clone())
            .with_cancellation(self.cancel.clone());
        match &self.config.work_dir {
            Some(dir) => fetcher.with_work_dir(dir),
            None => fetcher,
        }
    }

    pub fn builder(&self) -> Builder {
        Builder::new(self.runner.clone(), self.probe.clone(), self.config.build.clone())
            .with_cancellation(self.cancel.clone())
    }

    pub fn verifier(&self) -> Verifier {
        Verifier::new(self.runner.clone(), self.stager.clone(), self.config.verify.clone())
            .with_cancellation(self.cancel.clone())
    }

    /// Run every stage for `manifest`, installing under `prefix`
    pub fn run(&self, manifest: &Manifest, prefix: &Path) -> Result<PipelineReport, PipelineError> {
        let mut run = Run::new(manifest.id());

        if let Err(e) = self.checkpoint().and_then(|()| manifest.validate().map_err(Error::from)) {
            return Err(run.fail(e));
        }

        run.advance(PipelineState::Fetching);
        let tree = match self.checkpoint().and_then(|()| Ok(self.fetcher().fetch(manifest)?)) {
            Ok(tree) => tree,
            Err(e) => return Err(run.fail(e)),
        };

        run.advance(PipelineState::Building);
        let build = match self.checkpoint().and_then(|()| Ok(self.builder().build(manifest, &tree)?)) {
            Ok(build) => build,
            Err(e) => return Err(run.fail(e)),
        };

        run.advance(PipelineState::Installing);
        if let Err(e) = self.checkpoint() {
            return Err(run.fail(e));
        }
        let lock = match PackageLock::acquire(prefix, &manifest.name) {
            Ok(lock) => lock,
            Err(e) => return Err(run.fail(e)),
        };
        let record = match Installer::new(prefix).install(manifest, &tree) {
            Ok(record) => record,
            Err(e) => return Err(run.fail(e)),
        };

        run.advance(PipelineState::Verifying);
        let test = match self.checkpoint().and_then(|()| Ok(self.verifier().verify(manifest, prefix)?)) {
            Ok(test) => test,
            Err(e) => return Err(run.fail(e)),
        };
        drop(lock);

        let workspace = tree.workspace().to_path_buf();
        if let Err(e) = tree.close() {
            debug!("Failed to remove workspace {}: {}", workspace.display(), e);
        }

        run.advance(PipelineState::Done);
        Ok(PipelineReport {
            record,
            history: run.history,
            build,
            test,
        })
    }

    fn checkpoint(&self) -> Result<(), Error> {
        if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}
