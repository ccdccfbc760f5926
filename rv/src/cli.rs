//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Rendezvous - concurrency coordination patterns
#[derive(Parser, Debug)]
#[command(
    name = "rv",
    about = "Drive the coordination primitives from the command line",
    version
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
    /// Submit print jobs to the FIFO print queue
    Print {
        /// Jobs to print, in submission order
        #[arg(required = true)]
        jobs: Vec<String>,
    },

    /// Run one barrier round
    Barrier {
        /// Number of parties to start (defaults to the barrier size)
        #[arg(short, long)]
        parties: Option<usize>,
    },

    /// Launch a batch of futures and print the combined result
    Futures {
        /// Number of futures
        #[arg(short = 'n', long, default_value = "5")]
        count: usize,
    },

    /// Produce orders and consume them
    Orders {
        /// Orders to produce
        #[arg(required = true)]
        orders: Vec<String>,
    },

    /// Read the shared record
    Read,

    /// Write the shared record
    Write {
        /// New value
        value: String,
    },

    /// Run a task on the active object and wait for its result
    Task {
        /// Task name
        name: String,
    },

    /// Submit tasks to the worker pool
    Pool {
        /// Number of tasks
        #[arg(short = 'n', long, default_value = "10")]
        count: u64,
    },

    /// Exercise every component once
    Demo,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_print() {
        let cli = Cli::try_parse_from(["rv", "print", "a", "b"]).unwrap();
        match cli.command {
            Command::Print { jobs } => assert_eq!(jobs, vec!["a", "b"]),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["rv", "read", "-l", "debug", "--config", "x.yml"]).unwrap();
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert_eq!(cli.config, Some(PathBuf::from("x.yml")));
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["rv", "pool"]).unwrap();
        assert!(matches!(cli.command, Command::Pool { count: 10 }));

        let cli = Cli::try_parse_from(["rv", "futures"]).unwrap();
        assert!(matches!(cli.command, Command::Futures { count: 5 }));
    }

    #[test]
    fn test_print_requires_a_job() {
        assert!(Cli::try_parse_from(["rv", "print"]).is_err());
    }
}
