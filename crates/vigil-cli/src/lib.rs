//! # vigil-cli
//!
//! Command-line client for the vigil operation tracker.
//!
//! ## Commands
//!
//! - `vigil register` - Register a new operation
//! - `vigil get` - Fetch a single operation
//! - `vigil query` - List operations matching a filter
//! - `vigil complete` - Complete an operation
//! - `vigil watch` - Stream state changes of an operation
//! - `vigil exec` - Run a shell command and relay its lifecycle
//!
//! ## Configuration
//!
//! - `VIGIL_API_URL` - API endpoint (default: `http://localhost:8081`)

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
// CLI uses print! macros intentionally
#![allow(clippy::print_stdout)]
#![allow(clippy::print_stderr)]

pub mod client;
pub mod commands;
pub mod track;

use clap::{Parser, Subcommand};

/// vigil CLI - operation tracker command-line interface.
#[derive(Debug, Parser)]
#[command(name = "vigil")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// API server URL.
    #[arg(long, env = "VIGIL_API_URL", default_value = "http://localhost:8081")]
    pub api_url: String,

    /// Output format.
    #[arg(long, default_value = "text")]
    pub format: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Get the effective configuration.
    #[must_use]
    pub fn config(&self) -> Config {
        Config {
            api_url: self.api_url.clone(),
            format: self.format.clone(),
        }
    }
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Register a new operation.
    Register(commands::register::RegisterArgs),
    /// Fetch a single operation.
    Get(commands::get::GetArgs),
    /// List operations matching a filter.
    Query(commands::query::QueryArgs),
    /// Complete an operation with a success or error result.
    Complete(commands::complete::CompleteArgs),
    /// Stream state changes of an operation until it ends.
    Watch(commands::watch::WatchArgs),
    /// Run a shell command and relay its lifecycle as an operation.
    Exec(commands::exec::ExecArgs),
}

/// Output format.
#[derive(Debug, Clone, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output.
    Json,
}

/// CLI configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// API server URL.
    pub api_url: String,
    /// Output format.
    pub format: OutputFormat,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_config_from_flags() {
        let cli = Cli::parse_from([
            "vigil",
            "--api-url",
            "https://tracker.example.com",
            "--format",
            "json",
            "get",
            "65f000000000000000000001",
        ]);

        let config = cli.config();
        assert_eq!(config.api_url, "https://tracker.example.com");
        assert!(matches!(config.format, OutputFormat::Json));
    }
}
