//! Query command - list operations matching a filter.

use anyhow::Result;
use clap::Args;

use crate::client::ApiClient;
use crate::commands::print_snapshot;
use crate::{Config, OutputFormat};

/// Arguments for the query command.
#[derive(Debug, Args)]
pub struct QueryArgs {
    /// Match on the creator identity.
    #[arg(long, short = 'C')]
    pub creator: Option<String>,

    /// Match on the owner identity.
    #[arg(long, short = 'o')]
    pub owner: Option<String>,

    /// Match on the lifecycle state (pending, running, complete, lost).
    #[arg(long, short = 's')]
    pub state: Option<String>,

    /// Match on the caller-defined kind.
    #[arg(long, short = 'k')]
    pub kind: Option<String>,
}

/// Execute the query command.
///
/// # Errors
///
/// Returns an error if the API request fails.
pub async fn execute(args: QueryArgs, config: &Config) -> Result<()> {
    let client = ApiClient::new(config)?;
    let response = client
        .query(
            args.creator.as_deref(),
            args.owner.as_deref(),
            args.state.as_deref(),
            args.kind.as_deref(),
        )
        .await?;

    match config.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&response.operations)?);
        }
        OutputFormat::Text => {
            if response.operations.is_empty() {
                println!("No operations found");
                return Ok(());
            }

            for snapshot in &response.operations {
                print_snapshot(snapshot, config)?;
            }
            println!("total: {}", response.total_count);
        }
    }

    Ok(())
}
