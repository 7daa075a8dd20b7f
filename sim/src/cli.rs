//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

/// LLMSim - LLM API simulation observability core
#[derive(Parser)]
#[command(
    name = "llmsim",
    about = "Drive synthetic LLM API traffic through the observability pipeline",
    version,
    after_help = after_help()
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run synthetic requests and print the resulting metrics
    Simulate {
        /// Number of requests (overrides config)
        #[arg(short = 'n', long)]
        requests: Option<usize>,

        /// Requests in flight at once (overrides config)
        #[arg(short = 'j', long)]
        concurrency: Option<usize>,

        /// Failure probability between 0 and 1 (overrides config)
        #[arg(short, long)]
        error_rate: Option<f64>,

        /// Seed for a reproducible run
        #[arg(short, long)]
        seed: Option<u64>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Print the effective configuration as YAML
    Config,
}

/// Output format for simulation results
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "OutputFormat::from_str: called");
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => {
                debug!(%s, "OutputFormat::from_str: unknown format");
                Err(format!("Unknown format: {}. Use: text or json", s))
            }
        }
    }
}

/// Directory the binary writes its log file to
pub fn get_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("llmsim")
        .join("logs")
}

/// Path of the log file
pub fn get_log_path() -> PathBuf {
    get_log_dir().join("llmsim.log")
}

fn after_help() -> String {
    format!("Logs are written to: {}", get_log_path().display())
}
