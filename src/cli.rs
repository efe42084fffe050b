// src/cli.rs
//! CLI definitions for formulary
//!
//! Command implementations live in the `commands` module.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Default installation prefix
pub const DEFAULT_PREFIX: &str = "/usr/local";

#[derive(Parser)]
#[command(name = "formulary")]
#[command(author = "Formulary Contributors")]
#[command(version)]
#[command(about = "Fetch, build, install and test packages from declarative formulas", long_about = None)]
pub struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full pipeline for a formula: fetch, build, install, test
    Install {
        /// Path to the formula file
        formula: PathBuf,

        /// Release to install (latest if omitted)
        #[arg(short, long)]
        version: Option<String>,

        /// Installation prefix
        #[arg(short, long, default_value = DEFAULT_PREFIX)]
        prefix: PathBuf,

        /// Directory holding acceptance test fixtures
        #[arg(long)]
        fixtures: Option<PathBuf>,

        /// Parent directory for build workspaces
        #[arg(long)]
        work_dir: Option<PathBuf>,
    },

    /// Download and verify a release's source archive without building
    Fetch {
        /// Path to the formula file
        formula: PathBuf,

        /// Release to fetch (latest if omitted)
        #[arg(short, long)]
        version: Option<String>,

        /// Directory to store the archive in
        #[arg(short, long, default_value = ".")]
        dest: PathBuf,
    },

    /// Check a formula and every release it declares
    Validate {
        /// Path to the formula file
        formula: PathBuf,
    },

    /// Remove an installed package
    Uninstall {
        /// Package name
        name: String,

        /// Installation prefix
        #[arg(short, long, default_value = DEFAULT_PREFIX)]
        prefix: PathBuf,
    },

    /// List packages installed under a prefix
    List {
        /// Installation prefix
        #[arg(short, long, default_value = DEFAULT_PREFIX)]
        prefix: PathBuf,
    },

    /// List the releases a formula declares, newest first
    Versions {
        /// Path to the formula file
        formula: PathBuf,
    },
}
