//! wkbridge entry point.
//!
//! Parses the command line, sets up logging and signal handling, and runs
//! the [`Driver`] until a stop signal arrives.
//!
//! # What happens at startup
//!
//! 1. CLI arguments are parsed with `clap` into a [`Cli`] struct; usage
//!    errors exit with status 2, `--help` with 0.
//! 2. `tracing_subscriber` is initialised.  `RUST_LOG` wins if set;
//!    otherwise `--debug` selects the `debug` level, `info` by default.
//! 3. A signal task is spawned that cancels the shutdown token on SIGINT
//!    (Ctrl-C) or, on unix, SIGTERM.  The poll loop observes the token
//!    between rounds, so shutdown latency is bounded by one poll timeout.
//! 4. The driver subscribes to discovery, opens the configured listeners,
//!    and loops until cancelled.

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use wkbridge::domain::config::{DEFAULT_CONFIG, DEFAULT_FRONTEND_URL, DEFAULT_RELAY_ADDR};
use wkbridge::{Driver, ProxyConfig};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// DevTools bridge for mobile-device web inspectors.
///
/// Listens on one TCP port per attached device and bridges each inbound
/// DevTools frontend connection to the device's inspector service.
#[derive(Debug, Parser)]
#[command(name = "wkbridge", about = "Bridges DevTools frontends to device web inspectors", version)]
struct Cli {
    /// Device-to-port assignment: an inline `[device]:port[-port]` CSV, or
    /// the path to a file in that format (re-read on every lookup).
    #[arg(short, long, default_value = DEFAULT_CONFIG)]
    config: String,

    /// DevTools frontend path or URL, announced in the device roster.
    #[arg(
        short,
        long,
        value_parser = parse_frontend,
        default_value = DEFAULT_FRONTEND_URL,
        overrides_with = "no_frontend"
    )]
    frontend: String,

    /// Disable the DevTools frontend announcement.  The last of
    /// `--frontend`/`--no-frontend` on the command line wins.
    #[arg(short = 'F', long, overrides_with = "frontend")]
    no_frontend: bool,

    /// Address of the device-relay daemon.
    #[arg(long, default_value = DEFAULT_RELAY_ADDR)]
    relay: String,

    /// Enable verbose diagnostic output.
    #[arg(short, long)]
    debug: bool,
}

/// Validates `--frontend` at parse time so a bad value is a usage error.
fn parse_frontend(s: &str) -> Result<String, String> {
    if s.ends_with(".html") {
        Ok(s.to_string())
    } else {
        Err(format!("frontend must be a .html path or URL, got '{s}'"))
    }
}

impl Cli {
    fn into_proxy_config(self) -> ProxyConfig {
        ProxyConfig {
            config: self.config,
            frontend: if self.no_frontend {
                None
            } else {
                Some(self.frontend)
            },
            relay_addr: self.relay,
            debug: self.debug,
        }
    }
}

// ── Signals ───────────────────────────────────────────────────────────────────

/// Resolves on the first stop signal: SIGINT always, SIGTERM on unix.
async fn stop_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::error!("could not install SIGTERM handler: {e}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = cli.into_proxy_config();
    info!(
        "wkbridge starting (config '{}', frontend {})",
        config.config,
        config.frontend.as_deref().unwrap_or("disabled")
    );

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        stop_signal().await;
        info!("shutdown signal received");
        signal_token.cancel();
    });

    let driver = Driver::new(&config).context("could not set up the bridge")?;
    driver.run(shutdown).await?;
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
