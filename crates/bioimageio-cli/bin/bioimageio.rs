use bioimageio_cli::cli::{self, Cli};
use clap::Parser;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    bioimageio_cli::telemetry::install(&cli::resolve_env_filter(&cli))?;
    cli::run_with_cli(cli)
}
