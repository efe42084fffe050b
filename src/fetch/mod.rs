// src/fetch/mod.rs

//! Source acquisition
//!
//! The fetch stage downloads a manifest's source archive into a fresh
//! workspace, checks it against the declared digest and extracts it. The
//! workspace is a [`tempfile::TempDir`] owned by the returned
//! [`SourceTree`], so it disappears on drop whether the run succeeds,
//! fails or is cancelled.

mod archive;
mod client;

pub use archive::{ArchiveFormat, extract};
pub use client::{HttpTransport, Transport, TransportError};

use crate::config::FetchConfig;
use crate::error::FetchError;
use crate::exec::CancellationToken;
use crate::hash::hash_file;
use crate::manifest::Manifest;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tracing::{debug, info, warn};
use url::Url;

/// Granularity of cancellation checks while backing off
const BACKOFF_SLICE: Duration = Duration::from_millis(50);

/// An extracted, digest-verified source tree
///
/// Dropping it removes the whole workspace, archive included.
#[derive(Debug)]
pub struct SourceTree {
    workspace: TempDir,
    archive: PathBuf,
    root: PathBuf,
}

impl SourceTree {
    /// Directory the build runs in
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The per-run workspace holding the archive and the extracted tree
    pub fn workspace(&self) -> &Path {
        self.workspace.path()
    }

    /// The verified archive
    pub fn archive(&self) -> &Path {
        &self.archive
    }

    /// Remove the workspace now, reporting any cleanup error
    pub fn close(self) -> std::io::Result<()> {
        self.workspace.close()
    }
}

/// Downloads and verifies source archives
pub struct Fetcher {
    transport: Arc<dyn Transport>,
    config: FetchConfig,
    work_dir: Option<PathBuf>,
    cancel: CancellationToken,
}

impl Fetcher {
    pub fn new(transport: Arc<dyn Transport>, config: FetchConfig) -> Self {
        Self {
            transport,
            config,
            work_dir: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Create workspaces under `dir` instead of the system temp directory
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Download, verify and extract the manifest's source
    pub fn fetch(&self, manifest: &Manifest) -> Result<SourceTree, FetchError> {
        let workspace = self.create_workspace(manifest)?;
        debug!("Workspace for {}: {}", manifest.id(), workspace.path().display());

        let archive = self.download_verified(manifest, workspace.path())?;

        if self.cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let root = extract(&archive, &workspace.path().join("source"))?;
        info!("Extracted {} into {}", manifest.id(), root.display());

        Ok(SourceTree {
            workspace,
            archive,
            root,
        })
    }

    /// Download and verify only, leaving the archive in `dest_dir`
    ///
    /// Returns the archive path. Nothing is left behind on failure.
    pub fn fetch_archive(&self, manifest: &Manifest, dest_dir: &Path) -> Result<PathBuf, FetchError> {
        fs::create_dir_all(dest_dir)?;
        self.download_verified(manifest, dest_dir)
    }

    fn create_workspace(&self, manifest: &Manifest) -> Result<TempDir, FetchError> {
        let mut builder = tempfile::Builder::new();
        let prefix = format!("formulary-{}-", manifest.id());
        builder.prefix(&prefix);

        let workspace = match &self.work_dir {
            Some(dir) => {
                fs::create_dir_all(dir)?;
                builder.tempdir_in(dir)?
            }
            None => builder.tempdir()?,
        };
        Ok(workspace)
    }

    fn download_verified(&self, manifest: &Manifest, dest_dir: &Path) -> Result<PathBuf, FetchError> {
        let expected = manifest.digest()?;
        let url = manifest.parsed_url()?;
        let dest = dest_dir.join(manifest.archive_filename());

        info!("Fetching {} from {}", manifest.id(), url);
        if let Err(e) = self.download_with_retry(&url, &dest) {
            let _ = fs::remove_file(&dest);
            return Err(e);
        }

        let actual = hash_file(expected.algorithm, &dest)?;
        if !expected.matches(&actual) {
            warn!(
                "Digest mismatch for {}: expected {}, got {}",
                url, expected, actual
            );
            fs::remove_file(&dest)?;
            return Err(FetchError::Integrity {
                url: url.to_string(),
                algorithm: expected.algorithm,
                expected: expected.as_str().to_string(),
                actual: actual.as_str().to_string(),
            });
        }

        info!("Verified {} ({})", dest.display(), expected);
        Ok(dest)
    }

    fn download_with_retry(&self, url: &Url, dest: &Path) -> Result<u64, FetchError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            attempt += 1;

            match self.download_once(url, dest) {
                Ok(bytes) => {
                    debug!("Downloaded {} bytes from {}", bytes, url);
                    return Ok(bytes);
                }
                Err(AttemptError::Io(e)) => return Err(FetchError::Io(e)),
                Err(AttemptError::Transport(e)) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.config.retry_delay(attempt);
                    warn!(
                        "Download attempt {}/{} for {} failed: {}. Retrying in {:?}",
                        attempt, max_attempts, url, e, delay
                    );
                    if !self.sleep_unless_cancelled(delay) {
                        return Err(FetchError::Cancelled);
                    }
                }
                Err(AttemptError::Transport(e)) => {
                    return Err(FetchError::Network {
                        url: url.to_string(),
                        attempts: attempt,
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    fn download_once(&self, url: &Url, dest: &Path) -> Result<u64, AttemptError> {
        let mut writer = BufWriter::new(File::create(dest).map_err(AttemptError::Io)?);
        let bytes = self
            .transport
            .download(url, &mut writer)
            .map_err(AttemptError::Transport)?;
        writer.flush().map_err(AttemptError::Io)?;
        Ok(bytes)
    }

    /// Returns false if cancelled while waiting
    fn sleep_unless_cancelled(&self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        while Instant::now() < deadline {
            if self.cancel.is_cancelled() {
                return false;
            }
            thread::sleep(BACKOFF_SLICE.min(deadline.saturating_duration_since(Instant::now())));
        }
        !self.cancel.is_cancelled()
    }
}

enum AttemptError {
    Transport(TransportError),
    Io(std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{HashAlgorithm, hash_bytes};
    use crate::manifest::sample_manifest;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Serves fixed bytes after a number of scripted failures
    struct ScriptedTransport {
        failures: Mutex<Vec<TransportError>>,
        body: Vec<u8>,
        calls: AtomicU32,
    }

    impl ScriptedTransport {
        fn new(body: &[u8], failures: Vec<TransportError>) -> Self {
            Self {
                failures: Mutex::new(failures),
                body: body.to_vec(),
                calls: AtomicU32::new(0),
            }
        }
    }

    impl Transport for ScriptedTransport {
        fn download(&self, _url: &Url, dest: &mut dyn Write) -> Result<u64, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut failures = self.failures.lock().unwrap();
            if !failures.is_empty() {
                return Err(failures.remove(0));
            }
            dest.write_all(&self.body).unwrap();
            Ok(self.body.len() as u64)
        }
    }

    fn fast_config() -> FetchConfig {
        FetchConfig {
            max_attempts: 3,
            retry_delay_ms: 1,
            timeout_secs: 5,
        }
    }

    fn manifest_for(body: &[u8]) -> Manifest {
        let mut manifest = sample_manifest();
        manifest.source.digest = hash_bytes(HashAlgorithm::Sha256, body).to_prefixed_string();
        manifest
    }

    #[test]
    fn test_transient_failures_are_retried() {
        let body = b"archive";
        let transport = Arc::new(ScriptedTransport::new(
            body,
            vec![
                TransportError::Transient("connection reset".into()),
                TransportError::Transient("timed out".into()),
            ],
        ));
        let fetcher = Fetcher::new(transport.clone(), fast_config());
        let dir = tempfile::tempdir().unwrap();

        let path = fetcher.fetch_archive(&manifest_for(body), dir.path()).unwrap();

        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
        assert_eq!(fs::read(path).unwrap(), body);
    }

    #[test]
    fn test_retries_are_bounded() {
        let transport = Arc::new(ScriptedTransport::new(
            b"",
            (0..5).map(|_| TransportError::Transient("HTTP 503".into())).collect(),
        ));
        let fetcher = Fetcher::new(transport.clone(), fast_config());
        let dir = tempfile::tempdir().unwrap();

        let err = fetcher.fetch_archive(&manifest_for(b""), dir.path()).unwrap_err();

        assert!(matches!(err, FetchError::Network { attempts: 3, .. }));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_permanent_failure_is_not_retried() {
        let transport = Arc::new(ScriptedTransport::new(
            b"",
            vec![TransportError::Permanent("HTTP 404 Not Found".into())],
        ));
        let fetcher = Fetcher::new(transport.clone(), fast_config());
        let dir = tempfile::tempdir().unwrap();

        let err = fetcher.fetch_archive(&manifest_for(b""), dir.path()).unwrap_err();

        assert!(matches!(err, FetchError::Network { attempts: 1, .. }));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_digest_mismatch_removes_archive() {
        let transport = Arc::new(ScriptedTransport::new(b"tampered", Vec::new()));
        let fetcher = Fetcher::new(transport, fast_config());
        let dir = tempfile::tempdir().unwrap();
        let manifest = manifest_for(b"original");

        let err = fetcher.fetch_archive(&manifest, dir.path()).unwrap_err();

        match err {
            FetchError::Integrity { expected, actual, .. } => {
                assert_eq!(expected, hash_bytes(HashAlgorithm::Sha256, b"original").as_str());
                assert_eq!(actual, hash_bytes(HashAlgorithm::Sha256, b"tampered").as_str());
            }
            other => panic!("expected integrity error, got {other:?}"),
        }
        assert!(!dir.path().join(manifest.archive_filename()).exists());
    }

    #[test]
    fn test_cancelled_before_download() {
        let transport = Arc::new(ScriptedTransport::new(b"archive", Vec::new()));
        let token = CancellationToken::new();
        token.cancel();
        let fetcher = Fetcher::new(transport.clone(), fast_config()).with_cancellation(token);
        let dir = tempfile::tempdir().unwrap();

        let err = fetcher.fetch_archive(&manifest_for(b"archive"), dir.path()).unwrap_err();

        assert!(matches!(err, FetchError::Cancelled));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_failed_fetch_leaves_no_workspace() {
        let transport = Arc::new(ScriptedTransport::new(b"not a tarball", Vec::new()));
        let work = tempfile::tempdir().unwrap();
        let fetcher = Fetcher::new(transport, fast_config()).with_work_dir(work.path());

        let err = fetcher.fetch(&manifest_for(b"not a tarball")).unwrap_err();

        assert!(matches!(err, FetchError::Archive(_)));
        assert_eq!(fs::read_dir(work.path()).unwrap().count(), 0);
    }
}
