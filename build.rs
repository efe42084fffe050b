// build.rs

use clap::{Arg, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Common argument: formula file
fn formula_arg() -> Arg {
    Arg::new("formula")
        .required(true)
        .value_name("FORMULA")
        .help("Path to the formula file")
}

/// Common argument: installation prefix
fn prefix_arg() -> Arg {
    Arg::new("prefix")
        .short('p')
        .long("prefix")
        .value_name("DIR")
        .default_value("/usr/local")
        .help("Installation prefix")
}

/// Common argument: release selection
fn version_arg() -> Arg {
    Arg::new("version")
        .short('v')
        .long("version")
        .value_name("VERSION")
        .help("Release to use (latest if omitted)")
}

fn build_cli() -> Command {
    Command::new("formulary")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Formulary Contributors")
        .about("Fetch, build, install and test packages from declarative formulas")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("PATH")
                .global(true)
                .help("Configuration file (TOML)"),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("install")
                .about("Run the full pipeline for a formula: fetch, build, install, test")
                .arg(formula_arg())
                .arg(version_arg())
                .arg(prefix_arg())
                .arg(
                    Arg::new("fixtures")
                        .long("fixtures")
                        .value_name("DIR")
                        .help("Directory holding acceptance test fixtures"),
                )
                .arg(
                    Arg::new("work_dir")
                        .long("work-dir")
                        .value_name("DIR")
                        .help("Parent directory for build workspaces"),
                ),
        )
        .subcommand(
            Command::new("fetch")
                .about("Download and verify a release's source archive without building")
                .arg(formula_arg())
                .arg(version_arg())
                .arg(
                    Arg::new("dest")
                        .short('d')
                        .long("dest")
                        .value_name("DIR")
                        .default_value(".")
                        .help("Directory to store the archive in"),
                ),
        )
        .subcommand(
            Command::new("validate")
                .about("Check a formula and every release it declares")
                .arg(formula_arg()),
        )
        .subcommand(
            Command::new("uninstall")
                .about("Remove an installed package")
                .arg(Arg::new("name").required(true).help("Package name"))
                .arg(prefix_arg()),
        )
        .subcommand(
            Command::new("list")
                .about("List packages installed under a prefix")
                .arg(prefix_arg()),
        )
        .subcommand(
            Command::new("versions")
                .about("List the releases a formula declares, newest first")
                .arg(formula_arg()),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let out_dir = match env::var("OUT_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=OUT_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = out_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();

    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("formulary.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
