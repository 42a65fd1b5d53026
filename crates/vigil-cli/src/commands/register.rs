//! Register command - create a new operation.

use std::collections::HashMap;

use anyhow::{Context, Result};
use clap::Args;

use crate::client::{ApiClient, RegisterRequest};
use crate::commands::print_snapshot;
use crate::Config;

/// Arguments for the register command.
#[derive(Debug, Args)]
pub struct RegisterArgs {
    /// Owner of the operation.
    #[arg(long, short = 'o')]
    pub owner: String,

    /// Creator of the operation.
    #[arg(long, short = 'C', default_value = "")]
    pub creator: String,

    /// Kind of the operation.
    #[arg(long, short = 'k', default_value = "")]
    pub kind: String,

    /// Optional description.
    #[arg(long, short = 'd', default_value = "")]
    pub description: String,

    /// Start in RUNNING instead of PENDING.
    #[arg(long)]
    pub running: bool,

    /// TTL in seconds (server default when omitted).
    #[arg(long)]
    pub ttl: Option<u64>,

    /// Grace period in seconds (server default when omitted).
    #[arg(long)]
    pub grace_period: Option<u64>,

    /// Parameters as key=value pairs.
    #[arg(long = "param", short = 'p')]
    pub parameters: Vec<String>,
}

/// Execute the register command.
///
/// # Errors
///
/// Returns an error if the arguments are invalid or the API request
/// fails.
pub async fn execute(args: RegisterArgs, config: &Config) -> Result<()> {
    let mut parameters = HashMap::new();
    for pair in &args.parameters {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("invalid parameter '{pair}', expected key=value"))?;
        parameters.insert(key.to_string(), serde_json::Value::String(value.to_string()));
    }

    let client = ApiClient::new(config)?;
    let response = client
        .register(RegisterRequest {
            owner: args.owner,
            creator: args.creator,
            initial_state: args.running.then(|| "running".to_string()),
            ttl: args.ttl.map(|s| s * 1000),
            grace_period: args.grace_period.map(|s| s * 1000),
            description: args.description,
            kind: args.kind,
            parameters,
            annotations: HashMap::new(),
        })
        .await?;

    print_snapshot(&response.operation, config)?;
    println!("auth token: {}", response.auth_token);

    Ok(())
}
