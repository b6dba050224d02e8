//! panelwatch - alarm-panel event ingestion.
//!
//! Receives security events from alarm panels over UDP, parses the
//! positional wire format, fingerprints each event and stores it once in a
//! SQLite event table.

use std::io;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod cli;
mod config;
mod dedup;
mod errors;
mod listener;
mod models;
mod parser;
mod pipeline;
mod queue;
mod stats;
mod store;
mod worker;
mod writer;

use cli::{Cli, Command};
use config::PipelineConfig;
use models::{Fingerprint, ParsedEvent};
use pipeline::Pipeline;
use store::SqliteEventStore;
use writer::WriterPolicy;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing based on verbosity
    init_tracing(cli.verbose, cli.quiet);

    match cli.command {
        Command::Listen(args) => cmd_listen(args),
        Command::Parse(args) => cmd_parse(&args),
        Command::Send(args) => cmd_send(&args),
    }
}

/// Initialize tracing subscriber.
fn init_tracing(verbose: bool, quiet: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

/// Execute the `listen` command - run the ingestion pipeline until interrupted.
fn cmd_listen(args: cli::ListenArgs) -> Result<()> {
    let config = PipelineConfig {
        host: args.host,
        port: args.port,
        database: args.database,
        workers: args.workers,
        queue_capacity: args.queue_capacity,
        delimiter: args.delimiter,
        max_datagram_size: args.max_datagram_size,
        writer: WriterPolicy {
            write_timeout: Duration::from_millis(args.write_timeout_ms),
            max_retries: args.max_retries,
            max_in_flight: args.workers,
        },
        drain_timeout: Duration::from_secs(args.drain_timeout_secs),
    };
    config.validate().context("invalid listener configuration")?;

    let store = SqliteEventStore::open(&config.database).context("failed to open event store")?;
    match store.count_live_events() {
        Ok(n) => info!("event store holds {} live events", n),
        Err(e) => warn!("could not count stored events: {}", e),
    }
    let store = Arc::new(store);

    tokio::runtime::Runtime::new()
        .context("failed to create tokio runtime")?
        .block_on(async move {
            let cancel_token = CancellationToken::new();
            let pipeline = Pipeline::start(&config, store, cancel_token.clone())
                .await
                .context("failed to start ingestion pipeline")?;

            tokio::spawn(async move {
                shutdown_signal().await;
                info!("shutdown requested, no longer accepting datagrams");
                cancel_token.cancel();
            });

            pipeline.wait().await;
            Ok::<(), anyhow::Error>(())
        })
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

/// Output of the `parse` command.
#[derive(Serialize)]
struct ParseReport<'a> {
    event: &'a ParsedEvent,
    date: String,
    time: String,
    capture_stamp: String,
    fingerprint: Fingerprint,
}

/// Execute the `parse` command - show how a message would be ingested.
fn cmd_parse(args: &cli::ParseArgs) -> Result<()> {
    let event = parser::parse_event(&args.message, &args.source_ip, Local::now(), args.delimiter)
        .context("message rejected")?;
    let capture_stamp = event.capture_stamp();
    let fingerprint =
        dedup::build_fingerprint(&event.body, &event.source_ip, &capture_stamp, args.delimiter);

    let report = ParseReport {
        event: &event,
        date: event.date(),
        time: event.time(),
        capture_stamp,
        fingerprint,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Execute the `send` command - emit one datagram like a panel.
fn cmd_send(args: &cli::SendArgs) -> Result<()> {
    use std::net::ToSocketAddrs;

    let target = args
        .target
        .to_socket_addrs()
        .with_context(|| format!("failed to resolve {}", args.target))?
        .next()
        .with_context(|| format!("no address for {}", args.target))?;
    let local = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };

    let socket = std::net::UdpSocket::bind(local).context("failed to bind local socket")?;
    let sent = socket
        .send_to(args.message.as_bytes(), target)
        .with_context(|| format!("failed to send to {}", args.target))?;
    info!("sent {} bytes to {}", sent, args.target);
    Ok(())
}
