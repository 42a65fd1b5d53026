//! Watch command - stream state changes until the operation ends.

use anyhow::Result;
use clap::Args;

use crate::client::ApiClient;
use crate::commands::print_snapshot;
use crate::Config;

/// Arguments for the watch command.
#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Operation id.
    #[arg()]
    pub id: String,
}

/// Execute the watch command.
///
/// Prints one snapshot per state change; returns when the operation
/// reaches a terminal state and the server closes the stream.
///
/// # Errors
///
/// Returns an error if the API request fails.
pub async fn execute(args: WatchArgs, config: &Config) -> Result<()> {
    let client = ApiClient::new(config)?;

    client
        .watch(&args.id, |snapshot| {
            if let Err(err) = print_snapshot(&snapshot, config) {
                eprintln!("failed to print snapshot: {err}");
            }
        })
        .await
}
