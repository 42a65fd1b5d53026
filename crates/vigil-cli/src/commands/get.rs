//! Get command - fetch a single operation.

use anyhow::Result;
use clap::Args;

use crate::client::ApiClient;
use crate::commands::print_snapshot;
use crate::Config;

/// Arguments for the get command.
#[derive(Debug, Args)]
pub struct GetArgs {
    /// Operation id.
    #[arg()]
    pub id: String,
}

/// Execute the get command.
///
/// # Errors
///
/// Returns an error if the API request fails.
pub async fn execute(args: GetArgs, config: &Config) -> Result<()> {
    let client = ApiClient::new(config)?;
    let snapshot = client.get(&args.id).await?;
    print_snapshot(&snapshot, config)
}
