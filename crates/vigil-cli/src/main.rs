//! vigil CLI - command-line interface for the operation tracker.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vigil_cli::{Cli, Commands};

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.config();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        match cli.command {
            Commands::Register(args) => vigil_cli::commands::register::execute(args, &config).await,
            Commands::Get(args) => vigil_cli::commands::get::execute(args, &config).await,
            Commands::Query(args) => vigil_cli::commands::query::execute(args, &config).await,
            Commands::Complete(args) => vigil_cli::commands::complete::execute(args, &config).await,
            Commands::Watch(args) => vigil_cli::commands::watch::execute(args, &config).await,
            Commands::Exec(args) => vigil_cli::commands::exec::execute(args, &config).await,
        }
    })
}
