//! Scriptlink CLI
//! Watches live script events from a run-script-service server

mod event;

use anyhow::{Context, Result};
use clap::Parser;
use scriptlink_core::client::DEFAULT_HOST;
use scriptlink_core::transport::reconnect::DEFAULT_MAX_ATTEMPTS;
use scriptlink_core::{Client, ClientConfig, ConnectionState, ReconnectConfig, Status, WILDCARD};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Scriptlink - live script event watcher
#[derive(Parser, Debug)]
#[command(name = "scriptlink")]
#[command(author = "Scriptlink Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Watch live script events from a run-script-service server", long_about = None)]
struct Args {
    /// Full WebSocket URL (overrides --host and --secure)
    #[arg(short, long)]
    url: Option<String>,

    /// Server host and port
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,

    /// Connect with wss instead of ws
    #[arg(long, default_value = "false")]
    secure: bool,

    /// Message types to print, comma separated (all when omitted)
    #[arg(short, long, value_delimiter = ',')]
    types: Vec<String>,

    /// Automatic reconnect attempts after an unexpected drop (0 = unlimited)
    #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS)]
    max_attempts: u32,

    /// Print messages as received JSON
    #[arg(long, default_value = "false")]
    raw: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // wss needs a process-wide CryptoProvider with rustls 0.23+
    let _ = rustls::crypto::ring::default_provider().install_default();

    let args = Args::parse();
    setup_logging(&args.log_level)?;

    info!("Starting Scriptlink CLI v{}", env!("CARGO_PKG_VERSION"));

    let client = Client::new(build_config(&args)).context("Failed to create client")?;

    let kinds = if args.types.is_empty() {
        vec![WILDCARD.to_string()]
    } else {
        args.types.clone()
    };
    for kind in kinds {
        let raw = args.raw;
        client.on(kind, move |message| println!("{}", event::render(message, raw)));
    }

    client.connect(None);

    let outcome = tokio::select! {
        closed = watch_connection(client.watch_status()) => closed,
        shutdown = wait_for_shutdown() => {
            shutdown?;
            info!("Shutting down");
            Ok(())
        }
    };

    client.dispose();
    outcome
}

fn build_config(args: &Args) -> ClientConfig {
    let reconnect = ReconnectConfig {
        max_attempts: (args.max_attempts > 0).then_some(args.max_attempts),
        ..ReconnectConfig::default()
    };

    let config = match &args.url {
        Some(url) => ClientConfig::with_url(url.clone()),
        None => ClientConfig::default()
            .with_host(args.host.clone())
            .with_secure(args.secure),
    };
    config.with_reconnect(reconnect)
}

/// Log state transitions until the connection closes for good
async fn watch_connection(mut status: watch::Receiver<Status>) -> Result<()> {
    let mut previous = ConnectionState::Idle;

    loop {
        let current = status.borrow_and_update().clone();
        if current.state != previous {
            previous = current.state;
            match current.state {
                ConnectionState::Connecting => info!("Connecting..."),
                ConnectionState::Open => info!("Connected"),
                ConnectionState::ReconnectPending => warn!(
                    "Connection lost, retrying in {:?}",
                    current.next_reconnect.unwrap_or_default()
                ),
                ConnectionState::Closed => {
                    return match current.last_error {
                        Some(reason) => {
                            error!("Connection closed: {}", reason);
                            Err(anyhow::anyhow!(reason))
                        }
                        None => {
                            info!("Connection closed by server");
                            Ok(())
                        }
                    };
                }
                ConnectionState::Idle => {}
            }
        }

        if status.changed().await.is_err() {
            return Ok(());
        }
    }
}

async fn wait_for_shutdown() -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("Failed to listen for Ctrl+C")?,
        _ = sigterm.recv() => {}
    }
    Ok(())
}

fn setup_logging(level: &str) -> Result<()> {
    let log_level = level.parse::<Level>().unwrap_or(Level::INFO);

    let filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::parse_from(std::iter::once("scriptlink").chain(argv.iter().copied()))
    }

    #[test]
    fn test_defaults_derive_local_url() {
        let args = parse(&[]);
        let config = build_config(&args);
        assert_eq!(config.resolve_url(None), "ws://localhost:8080/ws");
        assert_eq!(config.reconnect, ReconnectConfig::default());
        assert!(args.types.is_empty());
    }

    #[test]
    fn test_host_and_secure() {
        let config = build_config(&parse(&["--host", "scripts.example.com", "--secure"]));
        assert_eq!(config.resolve_url(None), "wss://scripts.example.com/ws");
    }

    #[test]
    fn test_explicit_url_wins() {
        let config = build_config(&parse(&["--url", "ws://10.0.0.5:9000/ws", "--host", "ignored"]));
        assert_eq!(config.resolve_url(None), "ws://10.0.0.5:9000/ws");
    }

    #[test]
    fn test_types_are_comma_separated() {
        let args = parse(&["--types", "script_status,log"]);
        assert_eq!(args.types, vec!["script_status", "log"]);
    }

    #[test]
    fn test_zero_max_attempts_is_unlimited() {
        let config = build_config(&parse(&["--max-attempts", "0"]));
        assert_eq!(config.reconnect.max_attempts, None);
        let config = build_config(&parse(&["--max-attempts", "2"]));
        assert_eq!(config.reconnect.max_attempts, Some(2));
    }
}
