#![forbid(unsafe_code)]

use std::path::PathBuf;

use anyhow::Result;
use bioimageio_spec::Resolver;
use clap::{Parser, Subcommand};

pub mod config;
pub mod package;
pub mod update;
pub mod validate;

use crate::runtime;

#[derive(Debug, Parser)]
#[command(name = "bioimageio", about = "Validate, migrate and package bioimage.io resources", version)]
pub struct Cli {
    /// Logging filter (overrides BIOIMAGEIO_LOG)
    #[arg(long = "log", default_value = "info", global = true)]
    pub verbosity: String,

    /// Skip checks that read files or reach the network
    #[arg(long, global = true)]
    pub offline: bool,

    /// Configuration file (defaults to ./bioimageio.toml when present)
    #[arg(long = "config", value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Emit machine-readable JSON output
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Validate a resource description
    Validate(self::validate::ValidateArgs),
    /// Convert a resource description to a newer format version
    UpdateFormat(self::update::UpdateFormatArgs),
    /// Bundle a resource description with the files it references
    Package(self::package::PackageArgs),
    /// Inspect resolved configuration (layers and warnings)
    Config(self::config::ConfigArgs),
}

pub fn run() -> Result<()> {
    run_with_cli(Cli::parse())
}

/// Resolve the logging filter to use for telemetry initialisation.
pub fn resolve_env_filter(cli: &Cli) -> String {
    std::env::var("BIOIMAGEIO_LOG").unwrap_or_else(|_| cli.verbosity.clone())
}

/// Execute the CLI using a pre-parsed argument set.
pub fn run_with_cli(cli: Cli) -> Result<()> {
    let runtime = runtime::resolve_runtime(
        Some(std::env::current_dir()?.as_path()),
        cli.offline,
        cli.config.as_deref(),
    )?;
    for warning in runtime.warnings() {
        tracing::warn!("{warning}");
    }

    match cli.command {
        Command::Validate(args) => self::validate::handle(args, cli.json, &resolver()?, &runtime)?,
        Command::UpdateFormat(args) => self::update::handle(args, cli.json, &resolver()?, &runtime)?,
        Command::Package(args) => self::package::handle(args, cli.json, &resolver()?, &runtime)?,
        Command::Config(args) => self::config::handle(args, cli.json, &runtime)?,
    }

    Ok(())
}

fn resolver() -> Result<Resolver> {
    Ok(Resolver::new()?)
}
