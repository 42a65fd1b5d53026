//! Complete command - finish an operation with a result.

use anyhow::Result;
use clap::Args;

use vigil_ops::operation::{ErrorOutcome, SuccessOutcome};

use crate::client::ApiClient;
use crate::commands::print_snapshot;
use crate::Config;

/// Arguments for the complete command.
#[derive(Debug, Args)]
pub struct CompleteArgs {
    /// Operation id.
    #[arg()]
    pub id: String,

    /// Auth token returned at registration.
    #[arg(long, env = "VIGIL_AUTH_TOKEN")]
    pub auth_token: String,

    /// Complete with an error result instead of success.
    #[arg(long)]
    pub error: bool,

    /// Result message.
    #[arg(long, short = 'm', default_value = "")]
    pub message: String,
}

/// Execute the complete command.
///
/// # Errors
///
/// Returns an error if the API request fails.
pub async fn execute(args: CompleteArgs, config: &Config) -> Result<()> {
    let client = ApiClient::new(config)?;

    let snapshot = if args.error {
        client
            .complete_error(
                &args.id,
                &args.auth_token,
                ErrorOutcome {
                    message: args.message,
                    details: None,
                },
            )
            .await?
    } else {
        client
            .complete_success(
                &args.id,
                &args.auth_token,
                SuccessOutcome {
                    message: args.message,
                    result: None,
                },
            )
            .await?
    };

    print_snapshot(&snapshot, config)
}
