//! Command-line interface for servstack.
use std::str::FromStr;

use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;

/// Wrapper around `LevelFilter` so clap can parse log level names
/// ("info", "debug", etc.).
#[derive(Clone, Copy, Debug)]
pub struct LogLevelArg(LevelFilter);

impl LogLevelArg {
    /// String representation suitable for `RUST_LOG`.
    pub fn as_str(&self) -> &'static str {
        if self.0 == LevelFilter::OFF {
            "off"
        } else if self.0 == LevelFilter::ERROR {
            "error"
        } else if self.0 == LevelFilter::WARN {
            "warn"
        } else if self.0 == LevelFilter::DEBUG {
            "debug"
        } else if self.0 == LevelFilter::TRACE {
            "trace"
        } else {
            "info"
        }
    }
}

impl FromStr for LogLevelArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let level = match value.trim().to_ascii_lowercase().as_str() {
            "off" => LevelFilter::OFF,
            "error" | "err" => LevelFilter::ERROR,
            "warn" | "warning" => LevelFilter::WARN,
            "info" => LevelFilter::INFO,
            "debug" => LevelFilter::DEBUG,
            "trace" => LevelFilter::TRACE,
            other => return Err(format!("invalid log level '{other}'")),
        };
        Ok(LogLevelArg(level))
    }
}

/// Command-line interface for servstack.
#[derive(Parser)]
#[command(name = "servstack", version, author)]
#[command(about = "A local development stack manager for web, proxy and database servers", long_about = None)]
pub struct Cli {
    /// Override the logging verbosity for this invocation only.
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevelArg>,

    /// The command to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for servstack.
#[derive(Subcommand)]
pub enum Commands {
    /// Load the configuration document, start every service and run until
    /// interrupted.
    Run {
        /// Path to the configuration document (defaults to `config.json`).
        #[arg(short, long, default_value = "config.json")]
        config: String,

        /// Application root holding the shared config includes and
        /// phpMyAdmin (defaults to the current directory).
        #[arg(long, value_name = "DIR")]
        app_root: Option<String>,

        /// Seconds to wait for services to stop on shutdown.
        #[arg(long, default_value = "15")]
        stop_timeout: u64,
    },

    /// Validate the configuration document and report its contents.
    Check {
        /// Path to the configuration document (defaults to `config.json`).
        #[arg(short, long, default_value = "config.json")]
        config: String,
    },
}

/// Parses command-line arguments and returns a `Cli` struct.
pub fn parse_args() -> Cli {
    Cli::parse()
}
