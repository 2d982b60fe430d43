//! Referee process.
//! Run with: COMPETITORS=2 cargo run --bin arbiter

use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::json;
use tokio::net::TcpListener;

use shootout::arbiter;
use shootout::bus;
use shootout::config::ArbiterConfig;
use shootout::logging::{info, obj, v_str, Domain};
use shootout::retry::{retry_async, RetryPolicy};
use shootout::shutdown::Shutdown;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = ArbiterConfig::from_env();
    cfg.validate()?;

    let bus_addr = cfg.bus_addr.as_str();
    let bus = retry_async(&RetryPolicy::from_env(), "bus_connect", || bus::connect(bus_addr)).await?;
    let listener = TcpListener::bind(("0.0.0.0", cfg.port))
        .await
        .with_context(|| format!("bind registration port {}", cfg.port))?;

    let shutdown = Shutdown::new();
    shutdown.trigger_on_ctrl_c();

    let report = arbiter::run(cfg, Arc::new(bus), listener, shutdown).await?;
    info(
        Domain::Contest,
        "arbiter_exit",
        obj(&[
            ("rounds", json!(report.rounds)),
            ("finished", json!(report.finished)),
            ("winner", v_str(report.winner.as_ref().map(|w| w.name.as_str()).unwrap_or(""))),
        ]),
    );
    Ok(())
}
