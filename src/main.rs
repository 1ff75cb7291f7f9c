//! PubliCast CLI
//!
//! Command-line interface for driving the editor and running the compressor.

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use publicast::cli::{commands, Cli, Commands};
use publicast::config::SessionConfig;

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "publicast=debug" } else { "publicast=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    info!("PubliCast v{}", env!("CARGO_PKG_VERSION"));

    let config = match &cli.config {
        Some(path) => SessionConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?
            .with_env_overrides(),
        None => SessionConfig::from_env(),
    };

    let ok = match cli.command {
        Commands::Discover => commands::discover(&config)?,
        Commands::Send { commands: lines } => commands::send(&config, &lines)?,
        Commands::Compress {
            input,
            output,
            settings,
        } => commands::compress(&input, &output, settings.to_config())?,
        Commands::Process {
            presets,
            skip_compressor,
            channels,
            work_dir,
            settings,
        } => commands::process(
            &config,
            presets.as_deref(),
            skip_compressor,
            channels,
            work_dir.as_deref(),
            settings.to_config(),
        )?,
        Commands::Diagnose => commands::diagnose(&config)?,
    };

    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
