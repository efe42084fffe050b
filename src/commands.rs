// src/commands.rs
//! Command handlers for the formulary CLI

use anyhow::{Context, Result, bail};
use formulary::manifest::{Formula, parse_formula_file, validate_formula};
use formulary::{Config, Pipeline, install};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Subdirectory of a formula's directory searched for test fixtures
const FORMULA_FIXTURES_DIR: &str = "fixtures";

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Ok(Config::load(path)?),
        None => Ok(Config::default()),
    }
}

fn load_formula(path: &Path) -> Result<Formula> {
    parse_formula_file(path).with_context(|| format!("Failed to load formula {}", path.display()))
}

pub fn cmd_install(
    mut config: Config,
    formula_path: &Path,
    version: Option<&str>,
    prefix: &Path,
    fixtures: Option<PathBuf>,
    work_dir: Option<PathBuf>,
) -> Result<()> {
    let formula = load_formula(formula_path)?;
    let manifest = formula.manifest(version)?;

    if let Some(dir) = work_dir {
        config.work_dir = Some(dir);
    }
    if let Some(dir) = fixtures {
        config.verify.fixtures_dir = Some(dir);
    } else if config.verify.fixtures_dir.is_none() {
        let beside_formula = formula_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(FORMULA_FIXTURES_DIR);
        config.verify.fixtures_dir = Some(beside_formula);
    }

    info!("Installing {} into {}", manifest.id(), prefix.display());
    let report = Pipeline::new(config)?
        .run(&manifest, prefix)
        .inspect_err(|e| {
            let history: Vec<String> = e.history.iter().map(ToString::to_string).collect();
            warn!("State history: {}", history.join(" -> "));
        })?;

    println!("Installed {} ({} files):", report.record.id(), report.record.paths.len());
    for path in &report.record.paths {
        println!("  {}", path.display());
    }
    println!(
        "Build took {:.1}s; acceptance test passed",
        report.build.duration.as_secs_f64()
    );
    Ok(())
}

pub fn cmd_fetch(config: Config, formula_path: &Path, version: Option<&str>, dest: &Path) -> Result<()> {
    let formula = load_formula(formula_path)?;
    let manifest = formula.manifest(version)?;
    manifest.validate()?;

    let archive = Pipeline::new(config)?.fetcher().fetch_archive(&manifest, dest)?;
    println!("{} verified ({})", archive.display(), manifest.source.digest);
    Ok(())
}

pub fn cmd_validate(formula_path: &Path) -> Result<()> {
    let formula = load_formula(formula_path)?;
    let warnings = validate_formula(&formula)?;

    for warning in &warnings {
        println!("warning: {}", warning);
    }
    println!(
        "{}: {} release(s) OK",
        formula.package.name,
        formula.releases.len()
    );
    Ok(())
}

pub fn cmd_uninstall(name: &str, prefix: &Path) -> Result<()> {
    let record = install::uninstall(prefix, name)?;
    println!("Removed {} ({} files)", record.id(), record.paths.len());
    Ok(())
}

pub fn cmd_list(prefix: &Path) -> Result<()> {
    let records = install::installed(prefix)?;
    if records.is_empty() {
        println!("No packages installed under {}", prefix.display());
        return Ok(());
    }

    for record in records {
        println!(
            "{:<24} {:<12} {}",
            record.name,
            record.version,
            record.installed_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    Ok(())
}

pub fn cmd_versions(formula_path: &Path) -> Result<()> {
    let formula = load_formula(formula_path)?;
    let versions = formula.versions();
    if versions.is_empty() {
        bail!("{} declares no releases", formula.package.name);
    }

    for (i, version) in versions.iter().enumerate() {
        if i == 0 {
            println!("{} (latest)", version);
        } else {
            println!("{}", version);
        }
    }
    Ok(())
}
