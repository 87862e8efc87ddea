//! cliprelay Daemon
//!
//! Loads the config, primes the clip catalog and serves the operator console
//! on stdin until `quit`, Ctrl+C or SIGTERM.

use std::path::PathBuf;

use clap::Parser;
use tokio::io::BufReader;
use tracing::{error, info};

use cliprelay_core::config::{DEFAULT_CONFIG_FILE, load_config};
use cliprelay_daemon::RelayEngine;
use cliprelay_daemon::console::{self, ConsoleExit};

#[derive(Parser, Debug)]
#[command(name = "cliprelay-daemon")]
#[command(version, about = "cliprelay daemon - relays pre-recorded clips as a live stream")]
struct Args {
    /// Path to the TOML config file
    #[arg(long, default_value = DEFAULT_CONFIG_FILE, env = "CLIPRELAY_CONFIG")]
    config: PathBuf,

    /// Log level filter (e.g. "info", "debug", "warn").
    #[arg(long, default_value = "info", env = "CLIPRELAY_LOG_LEVEL")]
    log_level: String,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "CLIPRELAY_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    cliprelay_core::tracing_init::init_tracing(&args.log_level, args.log_json);

    let config = load_config(&args.config)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        ffmpeg = %config.ffmpeg_path.display(),
        source = ?config.catalog.source,
        destinations = config.destinations.len(),
        "Starting cliprelay-daemon"
    );

    let engine = RelayEngine::from_config(&config)?;
    engine.prime_catalog().await?;
    engine.launch().await;

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    // `true` unsets $NOTIFY_SOCKET so muxer processes don't inherit it.
    #[cfg(unix)]
    sd_notify::notify(true, &[sd_notify::NotifyState::Ready])?;

    #[cfg(unix)]
    let sigterm_future = sigterm.recv();
    #[cfg(not(unix))]
    let sigterm_future = std::future::pending::<Option<()>>();

    info!("Console ready, type 'help' for commands");

    let console = async {
        let result = console::run(
            &engine,
            BufReader::new(tokio::io::stdin()),
            tokio::io::stdout(),
        )
        .await;
        match result {
            Ok(ConsoleExit::Quit) => return,
            Ok(ConsoleExit::InputClosed) => info!("Console input closed, running until signalled"),
            Err(e) => error!(error = %e, "Console failed, running until signalled"),
        }
        std::future::pending::<()>().await;
    };
    tokio::select! {
        () = console => {
            info!("Shutdown requested from console");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C shutdown signal");
        }
        _ = sigterm_future => {
            info!("Received SIGTERM shutdown signal");
        }
    }

    engine.shutdown().await;
    info!("Daemon stopped");
    Ok(())
}
