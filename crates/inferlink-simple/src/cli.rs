use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "inferlink-simple",
    version,
    about = "Runs one add/sub inference against an in-process server"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Wait for readiness, run the add/sub model and check its outputs
    Run {
        #[command(flatten)]
        server: ServerArgs,

        /// Model to run
        #[arg(long, default_value = "simple")]
        model: String,

        /// Model version (highest available when omitted)
        #[arg(long)]
        model_version: Option<i64>,

        /// Seconds to wait for the completion before giving up
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,
    },
    /// Wait for readiness and print the server status
    Status {
        #[command(flatten)]
        server: ServerArgs,
    },
}

#[derive(Args, Debug)]
pub struct ServerArgs {
    /// Path to the model repository
    #[arg(short = 'r', long, env = "INFERLINK_MODEL_REPOSITORY")]
    pub model_repository: PathBuf,

    /// Log level (RUST_LOG)
    #[arg(long, default_value = "info")]
    pub log: String,

    /// Readiness polls before giving up
    #[arg(long, default_value_t = 10)]
    pub health_attempts: usize,

    /// Delay between readiness polls
    #[arg(long, default_value_t = 500)]
    pub poll_interval_ms: u64,

    /// Execution workers inside the server
    #[arg(long, default_value_t = 2)]
    pub workers: usize,
}
