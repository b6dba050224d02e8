//! Command-line interface definitions.
//!
//! Uses clap derive API for argument parsing.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{
    DEFAULT_DATABASE, DEFAULT_HOST, DEFAULT_MAX_DATAGRAM_SIZE, DEFAULT_PORT, DEFAULT_WORKERS,
    parse_delimiter,
};
use crate::queue;

/// Ingest alarm-panel security events over UDP.
#[derive(Parser, Debug)]
#[command(name = "panelwatch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Command to run
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose debug logging
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(long, global = true)]
    pub quiet: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Receive panel datagrams and store them as events
    Listen(ListenArgs),

    /// Parse one message and print the resulting event (nothing is stored)
    Parse(ParseArgs),

    /// Send one message to a listener, as a panel would
    Send(SendArgs),
}

/// Arguments for the `listen` command.
#[derive(Parser, Debug)]
pub struct ListenArgs {
    /// Host to bind to
    #[arg(long, default_value = DEFAULT_HOST)]
    pub host: String,

    /// UDP port to listen on
    #[arg(long, short = 'p', default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// SQLite event database
    #[arg(long, default_value = DEFAULT_DATABASE)]
    pub database: PathBuf,

    /// Number of worker tasks
    #[arg(long, default_value_t = DEFAULT_WORKERS)]
    pub workers: usize,

    /// Datagrams buffered between listener and workers
    #[arg(long, default_value_t = queue::DEFAULT_CAPACITY)]
    pub queue_capacity: usize,

    /// Protocol field delimiter
    #[arg(long, default_value = ";", value_parser = parse_delimiter)]
    pub delimiter: char,

    /// Socket read buffer in bytes; longer datagrams are truncated
    #[arg(long, default_value_t = DEFAULT_MAX_DATAGRAM_SIZE)]
    pub max_datagram_size: usize,

    /// Bound on a single store write, in milliseconds
    #[arg(long, default_value = "5000")]
    pub write_timeout_ms: u64,

    /// Retries for transient store failures
    #[arg(long, default_value = "3")]
    pub max_retries: u32,

    /// Time allowed to finish queued datagrams on shutdown, in seconds
    #[arg(long, default_value = "10")]
    pub drain_timeout_secs: u64,
}

/// Arguments for the `parse` command.
#[derive(Parser, Debug)]
pub struct ParseArgs {
    /// Message as a panel would send it
    pub message: String,

    /// Source IP to attribute the message to
    #[arg(long, default_value = "127.0.0.1")]
    pub source_ip: String,

    /// Protocol field delimiter
    #[arg(long, default_value = ";", value_parser = parse_delimiter)]
    pub delimiter: char,
}

/// Arguments for the `send` command.
#[derive(Parser, Debug)]
pub struct SendArgs {
    /// Message to send
    pub message: String,

    /// Listener address
    #[arg(long, default_value = "localhost:49152")]
    pub target: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listen_defaults() {
        let cli = Cli::try_parse_from(["panelwatch", "listen"]).unwrap();
        let Command::Listen(args) = cli.command else {
            panic!("expected listen");
        };
        assert_eq!(args.host, "localhost");
        assert_eq!(args.port, 49152);
        assert_eq!(args.workers, 32);
        assert_eq!(args.queue_capacity, 10_000);
        assert_eq!(args.delimiter, ';');
        assert_eq!(args.max_datagram_size, 2048);
    }

    #[test]
    fn test_rejects_multi_char_delimiter() {
        let result = Cli::try_parse_from(["panelwatch", "listen", "--delimiter", ";;"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_args() {
        let cli = Cli::try_parse_from([
            "panelwatch",
            "--quiet",
            "parse",
            "2024;05;01",
            "--source-ip",
            "10.0.0.9",
        ])
        .unwrap();
        assert!(cli.quiet);
        let Command::Parse(args) = cli.command else {
            panic!("expected parse");
        };
        assert_eq!(args.message, "2024;05;01");
        assert_eq!(args.source_ip, "10.0.0.9");
    }
}
