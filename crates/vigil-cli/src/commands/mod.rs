//! CLI command implementations.

pub mod complete;
pub mod exec;
pub mod get;
pub mod query;
pub mod register;
pub mod watch;

use vigil_ops::operation::OperationSnapshot;

use crate::{Config, OutputFormat};

/// Prints a snapshot in the configured output format.
pub(crate) fn print_snapshot(snapshot: &OperationSnapshot, config: &Config) -> anyhow::Result<()> {
    match config.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(snapshot)?);
        }
        OutputFormat::Text => {
            println!("{} {} ({})", snapshot.id, snapshot.state, snapshot.kind);
            if !snapshot.description.is_empty() {
                println!("  description: {}", snapshot.description);
            }
            println!("  owner: {}  creator: {}", snapshot.owner, snapshot.creator);
            println!(
                "  created: {}  last update: {}",
                snapshot.create_time, snapshot.last_update
            );
            if let Some(outcome) = &snapshot.outcome {
                println!("  outcome: {}", serde_json::to_string(outcome)?);
            }
        }
    }
    Ok(())
}
