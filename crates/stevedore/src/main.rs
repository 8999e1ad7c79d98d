//! Stevedore CLI entry point.

use clap::Parser;
use color_eyre::eyre::Result;
use stevedore_common::LogFormat;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use stevedore::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    let config = cli.load_config()?;

    let level = if cli.debug { "debug" } else { config.log_level.as_str() };
    let filter = EnvFilter::from_default_env().add_directive(format!("stevedore={level}").parse()?);

    match config.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(true).with_writer(std::io::stderr))
            .with(filter)
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .with(filter)
            .init(),
    }

    cli.execute(config).await
}
