// src/main.rs

use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;

use cli::{Cli, Commands};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Install {
            formula,
            version,
            prefix,
            fixtures,
            work_dir,
        } => {
            let config = commands::load_config(cli.config.as_deref())?;
            commands::cmd_install(config, &formula, version.as_deref(), &prefix, fixtures, work_dir)
        }
        Commands::Fetch {
            formula,
            version,
            dest,
        } => {
            let config = commands::load_config(cli.config.as_deref())?;
            commands::cmd_fetch(config, &formula, version.as_deref(), &dest)
        }
        Commands::Validate { formula } => commands::cmd_validate(&formula),
        Commands::Uninstall { name, prefix } => commands::cmd_uninstall(&name, &prefix),
        Commands::List { prefix } => commands::cmd_list(&prefix),
        Commands::Versions { formula } => commands::cmd_versions(&formula),
    }
}
