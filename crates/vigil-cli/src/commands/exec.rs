//! Exec command - run a shell command and relay its lifecycle.
//!
//! Registers an operation in RUNNING, pings it once per TTL while the
//! child runs, and completes it from the child's exit status: success
//! carries the captured stdout, error carries the captured stderr.

use std::collections::HashMap;
use std::process::Stdio;

use anyhow::{Context, Result};
use clap::Args;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use vigil_ops::operation::{ErrorOutcome, SuccessOutcome};

use crate::client::{ApiClient, RegisterRequest};
use crate::Config;

/// Arguments for the exec command.
#[derive(Debug, Args)]
pub struct ExecArgs {
    /// The command to execute.
    #[arg(trailing_var_arg = true, required = true)]
    pub command: Vec<String>,

    /// The shell to use when executing the command.
    #[arg(long, default_value = "/bin/bash")]
    pub shell: String,

    /// The argument that makes the shell execute its operand.
    #[arg(long, default_value = "-c")]
    pub shell_arg: String,

    /// Kind of the operation.
    #[arg(long, short = 'k', default_value = "")]
    pub kind: String,

    /// Owner of the operation.
    #[arg(long, short = 'o', default_value = "")]
    pub owner: String,

    /// Creator of the operation.
    #[arg(long, short = 'C', default_value = "")]
    pub creator: String,

    /// Optional description.
    #[arg(long, short = 'd', default_value = "")]
    pub description: String,

    /// TTL in seconds (server default when omitted).
    #[arg(long)]
    pub ttl: Option<u64>,

    /// Grace period in seconds (server default when omitted).
    #[arg(long)]
    pub grace_period: Option<u64>,
}

/// Forwards child output lines to the local stream while buffering
/// them for the completion result.
async fn relay_output<R: AsyncRead + Unpin>(reader: R, to_stderr: bool) -> String {
    let mut lines = BufReader::new(reader).lines();
    let mut buffer = String::new();

    while let Ok(Some(line)) = lines.next_line().await {
        if to_stderr {
            eprintln!("{line}");
        } else {
            println!("{line}");
        }
        buffer.push_str(&line);
        buffer.push('\n');
    }

    buffer
}

/// Execute the exec command.
///
/// # Errors
///
/// Returns an error if registration fails, the child cannot be
/// spawned, or the completion call fails.
pub async fn execute(args: ExecArgs, config: &Config) -> Result<()> {
    let command_line = args.command.join(" ");

    let client = ApiClient::new(config)?;
    let registered = client
        .register(RegisterRequest {
            owner: args.owner,
            creator: args.creator,
            initial_state: Some("running".to_string()),
            ttl: args.ttl.map(|s| s * 1000),
            grace_period: args.grace_period.map(|s| s * 1000),
            description: args.description,
            kind: args.kind,
            parameters: HashMap::from([
                (
                    "command".to_string(),
                    serde_json::Value::String(command_line.clone()),
                ),
                (
                    "shell".to_string(),
                    serde_json::Value::String(args.shell.clone()),
                ),
                (
                    "shellArgs".to_string(),
                    serde_json::Value::String(args.shell_arg.clone()),
                ),
            ]),
            annotations: HashMap::new(),
        })
        .await?;

    let id = registered.operation.id.to_hex();
    let auth_token = registered.auth_token;
    let ttl = registered.operation.ttl;
    info!(id = %id, "operation registered");

    let mut child = Command::new(&args.shell)
        .arg(&args.shell_arg)
        .arg(&command_line)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to spawn {}", args.shell))?;

    let stdout = child.stdout.take().context("child stdout missing")?;
    let stderr = child.stderr.take().context("child stderr missing")?;
    let stdout_task = tokio::spawn(relay_output(stdout, false));
    let stderr_task = tokio::spawn(relay_output(stderr, true));

    // Ping once per TTL until the child exits.
    let cancel = CancellationToken::new();
    let ping_task = {
        let cancel = cancel.clone();
        let client = client.clone();
        let id = id.clone();
        let auth_token = auth_token.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    () = tokio::time::sleep(ttl) => {}
                }

                if let Err(err) = client.ping(&id, &auth_token).await {
                    error!(id = %id, error = %err, "failed to ping operation");
                }
            }
        })
    };

    let status = child.wait().await.context("failed to wait for child")?;

    cancel.cancel();
    let _ = ping_task.await;
    let stdout_buffer = stdout_task.await.unwrap_or_default();
    let stderr_buffer = stderr_task.await.unwrap_or_default();

    if status.success() {
        client
            .complete_success(
                &id,
                &auth_token,
                SuccessOutcome {
                    message: stdout_buffer,
                    result: None,
                },
            )
            .await
            .context("failed to mark operation as complete")?;
        Ok(())
    } else {
        client
            .complete_error(
                &id,
                &auth_token,
                ErrorOutcome {
                    message: stderr_buffer,
                    details: Some(serde_json::json!({
                        "exitCode": status.code(),
                    })),
                },
            )
            .await
            .context("failed to mark operation as complete")?;

        anyhow::bail!("command exited with {status}")
    }
}
