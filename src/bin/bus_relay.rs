//! Websocket pub/sub relay for running the arbiter and shooters as
//! separate processes.
//! Run with: RELAY_ADDR=127.0.0.1:6380 cargo run --bin bus_relay

use anyhow::{Context, Result};
use tokio::net::TcpListener;

use shootout::bus::relay;
use shootout::config::RelayConfig;
use shootout::shutdown::Shutdown;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = RelayConfig::from_env();
    let listener = TcpListener::bind(&cfg.addr)
        .await
        .with_context(|| format!("bind relay address {}", cfg.addr))?;

    let shutdown = Shutdown::new();
    shutdown.trigger_on_ctrl_c();
    relay::serve(listener, shutdown).await
}
