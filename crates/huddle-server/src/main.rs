//! # Huddle Server
//!
//! Chat rooms over WebSocket.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! huddle
//!
//! # Run with environment overrides
//! HUDDLE__PORT=9000 HUDDLE__ROOMS__HEARTBEAT_INTERVAL_MS=10000 huddle
//! ```
//!
//! A `huddle.toml` in the working directory, `/etc/huddle/` or
//! `~/.config/huddle/` is picked up automatically.

use anyhow::Result;
use huddle_server::{config::Config, handlers, metrics};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "huddle=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;

    tracing::info!(
        "Starting Huddle server on {}:{} (heartbeat {}ms)",
        config.host,
        config.port,
        config.rooms.heartbeat_interval_ms
    );

    metrics::init_metrics();

    handlers::run_server(config).await?;

    Ok(())
}
