// tests/pipeline.rs

//! End-to-end pipeline runs against local archives.

mod common;

use common::{FakeToolchain, Harness, SomeTools, VERSION};
use formulary::manifest::InstallDirective;
use formulary::{
    ArchiveError, BuildError, CancellationToken, Error, FetchError, InstallError, PackageLock,
    ReceiptStore, VerifyError,
};
use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use formulary::PipelineState::{Building, Done, Failed, Fetching, Installing, Pending, Verifying};

#[test]
fn test_metadata_install_succeeds() {
    let harness = Harness::new();
    let runner = Arc::new(FakeToolchain::new());

    let report = harness
        .pipeline(runner.clone())
        .run(&harness.manifest(), &harness.prefix)
        .unwrap();

    assert_eq!(
        report.history,
        vec![Pending, Fetching, Building, Installing, Verifying, Done]
    );

    let bin = harness.prefix.join("bin/metadata");
    let man = harness.prefix.join("share/man/man1/metadata.1");
    assert_eq!(report.record.paths, vec![bin.clone(), man.clone()]);
    assert_eq!(report.record.version, VERSION);
    assert!(bin.is_file());
    assert!(man.is_file());

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        assert_eq!(fs::metadata(&bin).unwrap().permissions().mode() & 0o777, 0o755);
        assert_eq!(fs::metadata(&man).unwrap().permissions().mode() & 0o777, 0o644);
    }

    assert!(report.build.output.output.contains("Finished release"));
    assert!(report.test.output.output.contains("Container format:       MP3"));
    assert_eq!(
        runner.calls(),
        vec![
            "make release".to_string(),
            format!("{} test.mp3", bin.display()),
        ]
    );

    let receipt = ReceiptStore::new(&harness.prefix).load("metadata").unwrap().unwrap();
    assert_eq!(receipt, report.record);
    assert!(harness.workspaces().is_empty());
}

#[test]
fn test_altered_digest_fails_closed() {
    let harness = Harness::new();
    let mut manifest = harness.manifest();

    // Flip the last hex character
    let mut digest = manifest.source.digest.clone();
    let last = digest.pop().unwrap();
    digest.push(if last == '0' { '1' } else { '0' });
    manifest.source.digest = digest;

    let runner = Arc::new(FakeToolchain::new());
    let err = harness
        .pipeline(runner.clone())
        .run(&manifest, &harness.prefix)
        .unwrap_err();

    assert_eq!(err.failed_at, Fetching);
    assert_eq!(err.history, vec![Pending, Fetching, Failed]);
    assert!(matches!(err.error, Error::Fetch(FetchError::Integrity { .. })));
    assert!(!err.error.is_retryable());

    assert!(runner.calls().is_empty(), "nothing may run before the digest matches");
    assert!(harness.workspaces().is_empty());
    assert!(harness.installed_files().is_empty());
}

#[test]
fn test_any_corrupted_byte_is_detected() {
    let harness = Harness::new();
    let manifest = harness.manifest();
    let original = fs::read(&harness.archive).unwrap();

    for offset in [0, 1, original.len() / 2, original.len() - 1] {
        let mut corrupted = original.clone();
        corrupted[offset] ^= 0x01;
        fs::write(&harness.archive, &corrupted).unwrap();

        let err = harness
            .pipeline(Arc::new(FakeToolchain::new()))
            .run(&manifest, &harness.prefix)
            .unwrap_err();

        assert!(
            matches!(err.error, Error::Fetch(FetchError::Integrity { .. })),
            "byte {offset}: {}",
            err.error
        );
    }

    assert!(harness.workspaces().is_empty());
}

#[test]
fn test_archive_escaping_workspace_is_rejected() {
    let mut entries = common::source_entries();
    entries.push((format!("metadata-{VERSION}/../../../escaped.txt"), b"owned".to_vec()));
    let harness = Harness::with_entries(entries);

    let runner = Arc::new(FakeToolchain::new());
    let err = harness
        .pipeline(runner.clone())
        .run(&harness.manifest(), &harness.prefix)
        .unwrap_err();

    assert_eq!(err.failed_at, Fetching);
    assert!(matches!(
        err.error,
        Error::Fetch(FetchError::Archive(ArchiveError::PathTraversal { .. }))
    ));
    assert!(runner.calls().is_empty());
    assert!(harness.workspaces().is_empty());
    assert!(!harness.root.path().join("escaped.txt").exists());
}

#[test]
fn test_missing_source_file_is_permanent_network_error() {
    let harness = Harness::new();
    let manifest = harness.manifest();
    fs::remove_file(&harness.archive).unwrap();

    let err = harness
        .pipeline(Arc::new(FakeToolchain::new()))
        .run(&manifest, &harness.prefix)
        .unwrap_err();

    assert_eq!(err.failed_at, Fetching);
    assert!(matches!(
        err.error,
        Error::Fetch(FetchError::Network { attempts: 1, .. })
    ));
}

#[test]
fn test_missing_build_tools_are_all_reported() {
    let harness = Harness::new();
    let runner = Arc::new(FakeToolchain::new());

    let err = harness
        .pipeline(runner.clone())
        .with_probe(Arc::new(SomeTools(vec!["make"])))
        .run(&harness.manifest(), &harness.prefix)
        .unwrap_err();

    assert_eq!(err.failed_at, Building);
    match err.error {
        Error::Build(BuildError::MissingDependencies { missing }) => {
            assert_eq!(missing, vec!["pkg-config".to_string(), "cargo".to_string()]);
        }
        other => panic!("expected missing dependencies, got {other}"),
    }
    assert!(runner.calls().is_empty());
    assert!(harness.workspaces().is_empty());
}

#[test]
fn test_failed_build_installs_nothing() {
    let harness = Harness::new();
    let mut toolchain = FakeToolchain::new();
    toolchain.build_exit = 2;

    let err = harness
        .pipeline(Arc::new(toolchain))
        .run(&harness.manifest(), &harness.prefix)
        .unwrap_err();

    assert_eq!(err.failed_at, Building);
    assert!(matches!(
        err.error,
        Error::Build(BuildError::BuildFailed { exit_code: Some(2), .. })
    ));
    assert!(harness.installed_files().is_empty());
    assert!(harness.workspaces().is_empty());
}

#[test]
fn test_missing_third_of_four_artifacts_rolls_back() {
    let harness = Harness::new();
    let mut manifest = harness.manifest();
    manifest.install = vec![
        InstallDirective { from: "dist/v%(version)s/metadata".into(), category: "bin".into() },
        InstallDirective { from: "dist/v%(version)s/metadata.1".into(), category: "man1".into() },
        InstallDirective { from: "dist/v%(version)s/completions/_metadata".into(), category: "share".into() },
        InstallDirective { from: "Cargo.toml".into(), category: "doc".into() },
    ];

    let err = harness
        .pipeline(Arc::new(FakeToolchain::new()))
        .run(&manifest, &harness.prefix)
        .unwrap_err();

    assert_eq!(err.failed_at, Installing);
    match &err.error {
        Error::Install(InstallError::MissingArtifact { path }) => {
            assert!(path.ends_with("completions/_metadata"));
        }
        other => panic!("expected missing artifact, got {other}"),
    }
    assert!(harness.installed_files().is_empty());
    assert!(!harness.prefix.join("bin").exists());
    assert!(!harness.prefix.join("share").exists());
    assert!(ReceiptStore::new(&harness.prefix).load("metadata").unwrap().is_none());
    // The reusable lock file is the only thing left behind
    assert_eq!(
        common::list_files(&harness.prefix),
        vec![PackageLock::lock_path(&harness.prefix, "metadata").unwrap()]
    );
    assert!(harness.workspaces().is_empty());
}

#[test]
fn test_failed_acceptance_test_keeps_installation() {
    let harness = Harness::new();
    let mut toolchain = FakeToolchain::new();
    toolchain.test_output = "Filename: test.mp3\nContainer format: Ogg\n".to_string();

    let err = harness
        .pipeline(Arc::new(toolchain))
        .run(&harness.manifest(), &harness.prefix)
        .unwrap_err();

    assert_eq!(err.failed_at, Verifying);
    assert_eq!(
        err.history,
        vec![Pending, Fetching, Building, Installing, Verifying, Failed]
    );
    match &err.error {
        Error::Verify(VerifyError::AcceptanceTestFailed { output, .. }) => {
            assert!(output.contains("Ogg"));
        }
        other => panic!("expected acceptance failure, got {other}"),
    }

    assert!(harness.prefix.join("bin/metadata").is_file());
    assert!(harness.prefix.join("share/man/man1/metadata.1").is_file());
    assert!(ReceiptStore::new(&harness.prefix).load("metadata").unwrap().is_some());
    assert!(harness.workspaces().is_empty());
}

#[test]
fn test_missing_fixture_fails_verification() {
    let harness = Harness::new();
    fs::remove_file(harness.fixtures.join("test.mp3")).unwrap();

    let err = harness
        .pipeline(Arc::new(FakeToolchain::new()))
        .run(&harness.manifest(), &harness.prefix)
        .unwrap_err();

    assert_eq!(err.failed_at, Verifying);
    assert!(matches!(
        err.error,
        Error::Verify(VerifyError::FixtureUnavailable { .. })
    ));
}

#[test]
fn test_cancellation_during_build_cleans_up() {
    let harness = Harness::new();
    let token = CancellationToken::new();
    let mut toolchain = FakeToolchain::new();
    toolchain.cancel_on_build = Some(token.clone());

    let err = harness
        .pipeline(Arc::new(toolchain))
        .with_cancellation(token)
        .run(&harness.manifest(), &harness.prefix)
        .unwrap_err();

    assert_eq!(err.failed_at, Building);
    assert!(matches!(err.error, Error::Cancelled));
    assert!(harness.workspaces().is_empty());
    assert!(harness.installed_files().is_empty());
}

#[test]
fn test_concurrent_installs_of_same_package_serialize() {
    let harness = Arc::new(Harness::new());
    let mut toolchain = FakeToolchain::new();
    toolchain.test_delay = Duration::from_millis(300);
    let toolchain = Arc::new(toolchain);

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let harness = harness.clone();
            let toolchain = toolchain.clone();
            thread::spawn(move || {
                harness
                    .pipeline(toolchain)
                    .run(&harness.manifest(), &harness.prefix)
            })
        })
        .collect();

    for handle in handles {
        let report = handle.join().unwrap().unwrap();
        assert_eq!(report.record.paths.len(), 2);
    }

    // Install + verify sections never overlapped
    assert_eq!(
        toolchain.max_concurrent_tests.load(std::sync::atomic::Ordering::SeqCst),
        1
    );
    assert!(harness.workspaces().is_empty());
}

#[test]
fn test_concurrent_installs_of_different_versions_conflict_cleanly() {
    let harness = Arc::new(Harness::new());
    let versions = [VERSION.to_string(), "0.1.10".to_string()];

    let handles: Vec<_> = versions
        .iter()
        .map(|version| {
            let harness = harness.clone();
            let version = version.clone();
            thread::spawn(move || {
                let mut toolchain = FakeToolchain::new();
                toolchain.build_outputs = vec![
                    format!("dist/v{version}/metadata"),
                    format!("dist/v{version}/metadata.1"),
                ];
                toolchain.test_delay = Duration::from_millis(200);
                let mut manifest = harness.manifest();
                manifest.version = version;
                harness.pipeline(Arc::new(toolchain)).run(&manifest, &harness.prefix)
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    let losers: Vec<_> = results.iter().filter_map(|r| r.as_ref().err()).collect();
    assert_eq!(winners.len(), 1);
    assert_eq!(losers.len(), 1);

    let record = &winners[0].record;
    let loser = losers[0];
    assert_eq!(loser.failed_at, Installing);
    match &loser.error {
        Error::Install(InstallError::Conflict { owner, .. }) => assert_eq!(*owner, record.id()),
        other => panic!("expected conflict, got {other}"),
    }

    // Every installed file comes from the winning version
    let mut expected = record.paths.clone();
    expected.sort();
    assert_eq!(harness.installed_files(), expected);
    assert_eq!(
        fs::read_to_string(harness.prefix.join("bin/metadata")).unwrap(),
        format!("built dist/v{}/metadata\n", record.version)
    );
    assert_eq!(
        ReceiptStore::new(&harness.prefix).load("metadata").unwrap().as_ref(),
        Some(record)
    );
    assert!(harness.workspaces().is_empty());
}
