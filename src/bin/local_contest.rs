//! A whole contest in one process over the in-memory bus.
//! Run with: SHOOTERS="Alice:3:1,Bob:1:1" HEARTBEAT_MS=200 cargo run --bin local_contest

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinSet;

use shootout::arbiter;
use shootout::bus::{Bus, MemoryBus};
use shootout::config::LocalContestConfig;
use shootout::logging::{error, info, obj, v_str, Domain};
use shootout::shooter;
use shootout::shutdown::Shutdown;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = LocalContestConfig::from_env()?;
    let bus: Arc<dyn Bus> = Arc::new(MemoryBus::new());
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .context("bind registration listener")?;
    let arbiter_addr = format!("http://{}", listener.local_addr()?);

    // The arbiter trips its own signal when the contest ends; shooters must
    // still be allowed to read the final round.
    let referee_stop = Shutdown::new();
    let shooters_stop = Shutdown::new();
    referee_stop.trigger_on_ctrl_c();
    shooters_stop.trigger_on_ctrl_c();

    let referee = tokio::spawn(arbiter::run(cfg.arbiter(), bus.clone(), listener, referee_stop.clone()));

    let mut shooters = JoinSet::new();
    for index in 0..cfg.shooters.len() {
        let Some(shooter_cfg) = cfg.shooter(index, &arbiter_addr) else {
            continue;
        };
        let bus = bus.clone();
        let stop = shooters_stop.clone();
        shooters.spawn(async move {
            let name = shooter_cfg.name.clone();
            (name, shooter::run(shooter_cfg, bus, stop).await)
        });
    }

    let mut failed = 0;
    while let Some(joined) = shooters.join_next().await {
        let (name, result) = joined.context("shooter task panicked")?;
        match result {
            Ok(outcome) => info(
                Domain::Contest,
                "shooter_finished",
                obj(&[("name", v_str(&name)), ("outcome", v_str(outcome.as_str()))]),
            ),
            Err(err) => {
                failed += 1;
                error(
                    Domain::Contest,
                    "shooter_failed",
                    obj(&[("name", v_str(&name)), ("error", v_str(&format!("{:#}", err)))]),
                );
                referee_stop.trigger();
            }
        }
    }

    let report = referee.await.context("arbiter task panicked")??;
    info(
        Domain::Contest,
        "local_contest_done",
        obj(&[
            ("rounds", json!(report.rounds)),
            ("winner", v_str(report.winner.as_ref().map(|w| w.name.as_str()).unwrap_or(""))),
            ("failed_shooters", json!(failed)),
        ]),
    );
    if failed > 0 || !report.finished {
        bail!("contest did not finish cleanly");
    }
    Ok(())
}
