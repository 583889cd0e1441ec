//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Probe, call and watch a backend through the resilient network layer.
#[derive(Parser, Debug)]
#[command(name = "firmament-net")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to a TOML config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Backend base URL (overrides the config file)
    #[arg(short = 'u', long, global = true, value_name = "URL")]
    pub base_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Check whether the backend answers its health endpoint
    Probe {
        /// Print the health record as JSON
        #[arg(long)]
        json: bool,
    },

    /// Send a request with retries and print the response body
    Request {
        /// Endpoint path relative to the base URL
        endpoint: String,

        /// HTTP method
        #[arg(short = 'X', long, default_value = "GET")]
        method: String,

        /// Extra header as `Name: value` (repeatable)
        #[arg(short = 'H', long = "header", value_name = "HEADER")]
        headers: Vec<String>,

        /// JSON request body
        #[arg(short = 'd', long, value_name = "JSON")]
        data: Option<String>,

        /// Maximum retry attempts for transient failures (0-10)
        #[arg(short = 'r', long, value_parser = clap::value_parser!(u32).range(0..=10))]
        max_retries: Option<u32>,
    },

    /// Stream progress events for a job until it ends
    Watch {
        /// Job identifier
        job_id: String,

        /// Close the stream after this many seconds (1-3600)
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..=3600))]
        lifetime_secs: Option<u64>,
    },
}

/// Splits a `Name: value` header argument.
pub fn split_header(raw: &str) -> Option<(&str, &str)> {
    let (name, value) = raw.split_once(':')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name, value.trim()))
}
