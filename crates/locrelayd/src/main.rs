//! locrelayd - Live Location Relay Daemon
//!
//! Serves `GET /api/location/live/sse` and relays the upstream location
//! provider's stream with the service credential attached server-side.
//!
//! Usage:
//!   locrelayd [OPTIONS] [config.toml]
//!
//! Options:
//!   -p, --port <port>  Listen port (overrides config and PORT)
//!
//! Without a config file, settings come from the environment
//! (`LOC_API_BASEURL`, `LOC_API_TOKEN`, `CORS_ORIGINS`, `DEBUG_MODE`, `PORT`).

use std::net::SocketAddr;

use anyhow::Context;
use locrelay_api::config::RelayConfig;
use locrelay_api::{create_router, AppState, LIVE_ROUTE};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Parsed command-line arguments
#[derive(Debug, Default, PartialEq)]
struct Args {
    /// Relay config file (TOML)
    config_path: Option<String>,
    /// Listen port override
    port: Option<u16>,
    /// Print usage and exit
    help: bool,
}

fn parse_args() -> Args {
    parse_args_from(std::env::args().skip(1))
}

fn parse_args_from<I>(args: I) -> Args
where
    I: IntoIterator<Item = String>,
{
    let args: Vec<String> = args.into_iter().collect();
    let mut result = Args::default();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                match args.get(i + 1).map(|p| p.parse::<u16>()) {
                    Some(Ok(port)) => result.port = Some(port),
                    Some(Err(_)) => tracing::error!("Invalid port: {}", args[i + 1]),
                    None => tracing::error!("Missing argument for --port"),
                }
                i += 2;
            }
            "--help" | "-h" => {
                result.help = true;
                i += 1;
            }
            arg if !arg.starts_with('-') => {
                // Positional argument = config file
                result.config_path = Some(arg.to_string());
                i += 1;
            }
            _ => {
                tracing::warn!("Unknown argument: {}", args[i]);
                i += 1;
            }
        }
    }

    result
}

fn print_help() {
    eprintln!(
        r#"locrelayd - Live Location Relay Daemon

Usage: locrelayd [OPTIONS] [config.toml]

Options:
  -p, --port <port>  Listen port (default 8001)
  -h, --help         Print this help message

Environment:
  LOC_API_BASEURL    Base URL of the location provider API
  LOC_API_TOKEN      Service credential sent upstream as X-API-Token
  CORS_ORIGINS       Comma-separated allowed origins
  DEBUG_MODE         "true" to log upstream URLs and response bodies
  PORT               Listen port
  RUST_LOG           Log filter (default: locrelayd=info,locrelay_api=info)

Examples:
  # Run from environment only
  LOC_API_BASEURL=https://loc.example.com/api LOC_API_TOKEN=... locrelayd

  # Run with config file on another port
  locrelayd --port 9001 relay.toml
"#
    );
}

/// Load the config file (if any), then apply environment and CLI overrides
fn load_config(args: &Args) -> anyhow::Result<RelayConfig> {
    let mut config = match &args.config_path {
        Some(path) => {
            tracing::info!("Loading config from: {}", path);
            RelayConfig::load(path).with_context(|| format!("loading {}", path))?
        }
        None => {
            tracing::info!("No config file provided, using environment");
            RelayConfig::default()
        }
    };

    config.apply_env().context("reading environment")?;

    if let Some(port) = args.port {
        config.port = port;
    }

    Ok(config)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "locrelayd=info,locrelay_api=info,tower_http=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = parse_args();
    if args.help {
        print_help();
        return Ok(());
    }

    tracing::info!("Starting locrelayd (Live Location Relay)");

    let config = load_config(&args)?;
    let state = AppState::from_config(&config);
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Listening on http://{}{}", addr, LIVE_ROUTE);

    // Run the server
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("locrelayd stopped");
    Ok(())
}
