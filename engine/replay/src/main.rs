//! Stream Replay - run a recorded event stream through the engine
//!
//! Feeds a captured response body (a file, or stdin) to the aggregation
//! engine in fixed-size chunks and prints the resulting snapshot.
//!
//! # Usage
//!
//! ```bash
//! # Replay a capture, print the final view
//! stream-replay capture.sse
//!
//! # Simulate a slow network: 7-byte chunks, print every intermediate snapshot
//! stream-replay capture.sse --chunk-size 7 --follow
//!
//! # Machine-readable output from stdin
//! curl -sN "$URL" | stream-replay --format json
//!
//! # Verbose logging
//! RUST_LOG=debug stream-replay capture.sse
//! ```
//!
//! # Exit Codes
//!
//! - `0`: session completed
//! - `1`: session errored (or the replay itself failed)
//! - `130`: cancelled with Ctrl-C

mod render;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

use stream_engine_core::{
    load_config, load_config_from_path, AsyncReadReader, ConfigOverrides, EngineConfig,
    SessionSnapshot, StreamEngine, TransportReader,
};

use render::{exit_code, render, OutputFormat};

/// Stream Replay - run a recorded analysis event stream through the engine
#[derive(Parser, Debug)]
#[command(name = "stream-replay")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Recorded event stream (reads stdin when omitted or `-`)
    #[arg(value_name = "FILE")]
    input: Option<PathBuf>,

    /// Bytes per read, to simulate network chunking
    #[arg(short = 'n', long, default_value_t = 64, value_name = "BYTES")]
    chunk_size: usize,

    /// Output format
    #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Print every intermediate snapshot, not just the final one
    #[arg(long)]
    follow: bool,

    /// Fail when no data arrives for this many milliseconds (0 disables)
    #[arg(long, value_name = "MS")]
    idle_timeout_ms: Option<u64>,

    /// Longest accepted line in bytes
    #[arg(long, value_name = "BYTES")]
    max_line_bytes: Option<usize>,

    /// Configuration file path
    #[arg(short = 'c', long, env = "STREAM_ENGINE_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "STREAM_ENGINE_LOG_LEVEL", default_value = "warn")]
    log_level: String,
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "stream_replay={level},stream_engine_core={level}"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Resolve configuration: CLI > environment > file > defaults
fn resolve_config(args: &Args) -> Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            load_config_from_path(Some(path.clone()))
        }
        None => load_config(),
    }
    .context("Failed to load configuration")?;

    let mut overrides = ConfigOverrides::new();
    if let Some(ms) = args.idle_timeout_ms {
        overrides = overrides.with_idle_timeout_ms(ms);
    }
    if let Some(bytes) = args.max_line_bytes {
        overrides = overrides.with_max_line_bytes(bytes);
    }
    overrides.apply(&mut config);
    if args.follow {
        config.snapshot_channel = true;
    }
    config.validate().context("Invalid configuration")?;

    info!(source = %config.source(), "Configuration resolved");
    Ok(config)
}

/// Open the input as a chunked transport reader
async fn open_input(
    input: Option<&PathBuf>,
    chunk_size: usize,
) -> Result<Box<dyn TransportReader>> {
    let chunk_size = chunk_size.max(1);
    match input {
        Some(path) if path.as_os_str() != "-" => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open {}", path.display()))?;
            Ok(Box::new(AsyncReadReader::with_read_size(file, chunk_size)))
        }
        _ => Ok(Box::new(AsyncReadReader::with_read_size(
            tokio::io::stdin(),
            chunk_size,
        ))),
    }
}

/// Print snapshots as they are published
async fn follow(mut updates: watch::Receiver<SessionSnapshot>, format: OutputFormat) {
    while updates.changed().await.is_ok() {
        let snapshot = updates.borrow_and_update().clone();
        match render(&snapshot, format) {
            Ok(text) => println!("{text}"),
            Err(e) => warn!(error = %e, "Failed to render snapshot"),
        }
    }
}

async fn replay(args: Args) -> Result<u8> {
    let config = resolve_config(&args)?;
    let engine = StreamEngine::with_config(config);
    info!(session = %engine.session_id(), "Replaying stream");

    let cancel = engine.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, cancelling session");
            cancel.cancel();
        }
    });

    let follower = if args.follow {
        engine
            .subscribe()
            .map(|updates| tokio::spawn(follow(updates, args.format)))
    } else {
        None
    };

    let mut reader = open_input(args.input.as_ref(), args.chunk_size).await?;
    let snapshot = engine.run(reader.as_mut()).await;

    match follower {
        Some(handle) => {
            if let Err(e) = handle.await {
                warn!(error = %e, "Snapshot follower stopped unexpectedly");
            }
        }
        None => println!("{}", render(&snapshot, args.format)?),
    }

    Ok(exit_code(snapshot.status))
}

/// Drive `future` to completion on a fresh runtime
///
/// The runtime is shut down without waiting for blocking tasks, so a stdin
/// read parked on a terminal does not keep the process alive.
fn run_detached<F: std::future::Future>(future: F) -> std::io::Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let output = runtime.block_on(future);
    runtime.shutdown_background();
    Ok(output)
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.log_level);

    match run_detached(replay(args)) {
        Ok(Ok(code)) => ExitCode::from(code),
        Ok(Err(e)) => {
            eprintln!("stream-replay: {e:#}");
            ExitCode::from(1)
        }
        Err(e) => {
            eprintln!("stream-replay: failed to start runtime: {e}");
            ExitCode::from(1)
        }
    }
}
