//! tandem-relay: WebSocket signaling server for one-to-one video chat.
//!
//! Clients connect to `/ws/signaling`, are paired first come first served,
//! and exchange WebRTC offers, answers and ICE candidates through the
//! relay. Payloads are forwarded untouched apart from a `from` field.

mod app;
mod connection;

#[cfg(test)]
mod tests;

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use tandem_common::TandemError;
use tandem_config::{config_to_json, load_config, validation, RelayConfig};
use tandem_signal::{ChannelRegistry, PairingEngine};

use crate::app::{router, AppState};

#[derive(Parser)]
#[command(name = "tandem-relay", about = "Signaling relay for one-to-one WebRTC chat")]
struct Args {
    /// TOML config file. Flags and environment override its values.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Interface to bind.
    #[arg(long, env = "SIGNALING_HOST")]
    host: Option<IpAddr>,

    /// Port to listen on.
    #[arg(short, long, env = "SIGNALING_PORT")]
    port: Option<u16>,

    /// Origins allowed to open the signaling socket, comma separated.
    #[arg(long, env = "ALLOWED_ORIGINS", value_delimiter = ',')]
    allowed_origins: Option<Vec<String>>,

    /// Verbose logging.
    #[arg(long, env = "DEBUG", value_parser = clap::builder::BoolishValueParser::new())]
    debug: bool,

    /// Outbound queue length per connection.
    #[arg(long)]
    channel_capacity: Option<usize>,

    /// Close connections silent for this many seconds (0 disables).
    #[arg(long)]
    idle_timeout: Option<u64>,

    /// Largest inbound WebSocket message in bytes.
    #[arg(long)]
    max_message_bytes: Option<usize>,
}

impl Args {
    fn apply(self, config: &mut RelayConfig) {
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(origins) = self.allowed_origins {
            config.allowed_origins = origins;
        }
        if self.debug {
            config.debug = true;
        }
        if let Some(capacity) = self.channel_capacity {
            config.channel_capacity = capacity;
        }
        if let Some(secs) = self.idle_timeout {
            config.idle_timeout_secs = secs;
        }
        if let Some(bytes) = self.max_message_bytes {
            config.max_message_bytes = bytes;
        }
    }
}

fn init_tracing(debug: bool) {
    let default = if debug {
        "tandem_relay=debug,tandem_signal=debug"
    } else {
        "tandem_relay=info,tandem_signal=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

#[tokio::main]
async fn main() -> Result<(), TandemError> {
    let mut args = Args::parse();
    let mut config = load_config(args.config.take().as_deref())?;
    args.apply(&mut config);

    init_tracing(config.debug);
    validation::validate(&config)?;
    tracing::debug!(config = %config_to_json(&config), "Effective configuration");

    let engine = PairingEngine::new(ChannelRegistry::new());
    let addr = config.bind_addr();
    let state = AppState::new(engine, config);

    let listener = TcpListener::bind(addr).await?;
    info!("tandem-relay listening on {}", addr);

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}
