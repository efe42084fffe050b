// tests/common/mod.rs

//! Shared fixtures for pipeline integration tests.
//!
//! The pipeline runs for real against the filesystem and `file://` URLs;
//! only the toolchain (`make` and the built program) is faked.

#![allow(dead_code)]

use flate2::Compression;
use flate2::write::GzEncoder;
use formulary::error::ExecError;
use formulary::hash::{HashAlgorithm, hash_file};
use formulary::manifest::{Manifest, parse_formula};
use formulary::{
    CancellationToken, CommandOutput, CommandRunner, Config, DirFixtureStager, Invocation,
    Pipeline, ToolProbe,
};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;
use url::Url;

pub const VERSION: &str = "0.1.9";

pub const METADATA_OUTPUT: &str = "Filename:               test.mp3\n\
    File size:              6301 bytes\n\
    Container format:       MP3\n\
    Duration:               00:00:01.04\n";

/// Everything one pipeline run needs on disk
pub struct Harness {
    pub root: TempDir,
    pub archive: PathBuf,
    pub prefix: PathBuf,
    pub work_dir: PathBuf,
    pub fixtures: PathBuf,
}

impl Harness {
    /// A harness whose archive is a well-formed `metadata` source release
    pub fn new() -> Self {
        Self::with_entries(source_entries())
    }

    pub fn with_entries(entries: Vec<(String, Vec<u8>)>) -> Self {
        let root = tempfile::tempdir().unwrap();
        let archive = root.path().join(format!("metadata-{VERSION}.tar.gz"));
        write_tar_gz(&archive, &entries);

        let fixtures = root.path().join("fixtures");
        fs::create_dir_all(&fixtures).unwrap();
        fs::write(fixtures.join("test.mp3"), b"ID3\x04\x00\x00\x00\x00\x00\x00").unwrap();

        Self {
            prefix: root.path().join("prefix"),
            work_dir: root.path().join("work"),
            fixtures,
            archive,
            root,
        }
    }

    pub fn archive_url(&self) -> String {
        Url::from_file_path(&self.archive).unwrap().to_string()
    }

    pub fn digest(&self) -> String {
        hash_file(HashAlgorithm::Sha256, &self.archive)
            .unwrap()
            .to_prefixed_string()
    }

    /// The `metadata` manifest pointing at this harness's archive
    pub fn manifest(&self) -> Manifest {
        let formula = parse_formula(&formula_toml(&self.archive_url(), &self.digest())).unwrap();
        formula.manifest(Some(VERSION)).unwrap()
    }

    pub fn config(&self) -> Config {
        let mut config = Config::default();
        config.work_dir = Some(self.work_dir.clone());
        config.fetch.retry_delay_ms = 1;
        config.verify.fixtures_dir = Some(self.fixtures.clone());
        config
    }

    pub fn pipeline(&self, runner: Arc<FakeToolchain>) -> Pipeline {
        Pipeline::new(self.config())
            .unwrap()
            .with_runner(runner)
            .with_probe(Arc::new(AllTools))
            .with_stager(Arc::new(DirFixtureStager::new(&self.fixtures)))
    }

    /// Leftover per-run workspaces
    pub fn workspaces(&self) -> Vec<PathBuf> {
        match fs::read_dir(&self.work_dir) {
            Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Files under the prefix, excluding formulary's own state
    ///
    /// Receipts and lock files live under `var/formulary`. Lock files are
    /// never removed once created; waiters may hold them open.
    pub fn installed_files(&self) -> Vec<PathBuf> {
        let state = self.prefix.join("var/formulary");
        list_files(&self.prefix)
            .into_iter()
            .filter(|p| !p.starts_with(&state))
            .collect()
    }
}

pub fn formula_toml(url: &str, digest: &str) -> String {
    format!(
        r#"
[package]
name = "metadata"
description = "Media file metadata for human consumption"
homepage = "https://github.com/zmwangx/metadata"
runtime_dependencies = ["ffmpeg"]

[source]
url = "{url}"

[[releases]]
version = "{VERSION}"
digest = "{digest}"

[build]
dependencies = ["pkg-config", "cargo", "make"]
command = ["make", "release"]

[[install]]
from = "dist/v%(version)s/metadata"
category = "bin"

[[install]]
from = "dist/v%(version)s/metadata.1"
category = "man1"

[test]
command = ["%(bin)s/metadata", "test.mp3"]
expect = 'Filename:\s+test.mp3.*Container format:\s+MP3'
fixtures = ["test.mp3"]
"#
    )
}

pub fn source_entries() -> Vec<(String, Vec<u8>)> {
    let top = format!("metadata-{VERSION}");
    vec![
        (format!("{top}/Makefile"), b"release:\n\tcargo build --release\n".to_vec()),
        (format!("{top}/Cargo.toml"), b"[package]\nname = \"metadata\"\n".to_vec()),
        (format!("{top}/src/main.rs"), b"fn main() {}\n".to_vec()),
        (format!("{top}/metadata.1"), b".TH METADATA 1\n".to_vec()),
    ]
}

/// Write a gzipped tarball; names are written raw so hostile paths survive
pub fn write_tar_gz(path: &Path, entries: &[(String, Vec<u8>)]) {
    let file = File::create(path).unwrap();
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    for (name, data) in entries {
        let mut header = tar::Header::new_gnu();
        header.as_old_mut().name[..name.len()].copy_from_slice(name.as_bytes());
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();
        builder.append(&header, data.as_slice()).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();
}

pub fn list_files(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = fs::read_dir(&dir) else { continue };
        for entry in entries {
            let path = entry.unwrap().path();
            if path.is_dir() {
                stack.push(path);
            } else {
                files.push(path);
            }
        }
    }
    files.sort();
    files
}

/// Every tool is present
pub struct AllTools;

impl ToolProbe for AllTools {
    fn is_available(&self, _tool: &str) -> bool {
        true
    }
}

/// Only the listed tools are present
pub struct SomeTools(pub Vec<&'static str>);

impl ToolProbe for SomeTools {
    fn is_available(&self, tool: &str) -> bool {
        self.0.iter().any(|t| *t == tool)
    }
}

/// Stands in for `make release` and for the built `metadata` binary
pub struct FakeToolchain {
    /// Files `make` writes, relative to the source root
    pub build_outputs: Vec<String>,
    pub build_exit: i32,
    pub test_output: String,
    /// How long the test command takes
    pub test_delay: Duration,
    /// Cancel this token when the build starts
    pub cancel_on_build: Option<CancellationToken>,
    pub calls: Mutex<Vec<String>>,
    active_tests: AtomicUsize,
    pub max_concurrent_tests: AtomicUsize,
}

impl FakeToolchain {
    pub fn new() -> Self {
        Self {
            build_outputs: vec![
                format!("dist/v{VERSION}/metadata"),
                format!("dist/v{VERSION}/metadata.1"),
            ],
            build_exit: 0,
            test_output: METADATA_OUTPUT.to_string(),
            test_delay: Duration::ZERO,
            cancel_on_build: None,
            calls: Mutex::new(Vec::new()),
            active_tests: AtomicUsize::new(0),
            max_concurrent_tests: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn make(&self, invocation: &Invocation, cancel: &CancellationToken) -> Result<CommandOutput, ExecError> {
        if let Some(token) = &self.cancel_on_build {
            token.cancel();
        }
        if cancel.is_cancelled() {
            return Err(ExecError::Cancelled);
        }
        assert!(invocation.current_dir.join("Makefile").is_file(), "make ran outside the source tree");

        for output in &self.build_outputs {
            let path = invocation.current_dir.join(output);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, format!("built {output}\n")).unwrap();
        }

        Ok(CommandOutput {
            exit_code: Some(self.build_exit),
            timed_out: false,
            output: "   Compiling metadata v0.1.9\n    Finished release [optimized]\n".to_string(),
        })
    }

    fn run_metadata(&self, invocation: &Invocation) -> Result<CommandOutput, ExecError> {
        let active = self.active_tests.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent_tests.fetch_max(active, Ordering::SeqCst);
        thread::sleep(self.test_delay);
        self.active_tests.fetch_sub(1, Ordering::SeqCst);

        if !Path::new(&invocation.program).is_file() {
            return Err(ExecError::Spawn {
                program: invocation.program.clone(),
                reason: "No such file or directory".to_string(),
            });
        }
        let input = invocation.current_dir.join(&invocation.args[0]);
        if !input.is_file() {
            return Ok(CommandOutput {
                exit_code: Some(1),
                timed_out: false,
                output: format!("{}: No such file or directory\n", invocation.args[0]),
            });
        }

        Ok(CommandOutput {
            exit_code: Some(0),
            timed_out: false,
            output: self.test_output.clone(),
        })
    }
}

impl CommandRunner for FakeToolchain {
    fn run(&self, invocation: &Invocation, cancel: &CancellationToken) -> Result<CommandOutput, ExecError> {
        self.calls.lock().unwrap().push(invocation.command_line());
        if invocation.program == "make" {
            self.make(invocation, cancel)
        } else {
            self.run_metadata(invocation)
        }
    }
}
