//! The referee process.
//!
//! Three sources feed the roster owner: a fixed-interval ticker that asks for
//! the next broadcast, the registration listener, and the action channel on
//! the bus. Any fatal condition trips the shared [`Shutdown`] so every task
//! unwinds together.

pub mod actor;
pub mod http;

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::bus::{Bus, Subscription, ARBITER_CHANNEL, COMPETITOR_CHANNEL};
use crate::config::ArbiterConfig;
use crate::event::{Competitor, Event, EventKind};
use crate::logging::{error, info, log_contest_summary, log_round, obj, v_err, v_str, warn, Domain};
use crate::roster::{ContestError, Roster};
use crate::shutdown::Shutdown;

pub use actor::RosterHandle;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContestReport {
    /// Number of the last round broadcast.
    pub rounds: u64,
    pub winner: Option<Competitor>,
    /// False when the arbiter stopped before the contest ended.
    pub finished: bool,
}

/// Run the referee until the contest finishes or `shutdown` fires.
pub async fn run(
    cfg: ArbiterConfig,
    bus: Arc<dyn Bus>,
    listener: TcpListener,
    shutdown: Shutdown,
) -> Result<ContestReport> {
    cfg.validate()?;
    info(
        Domain::System,
        "arbiter_start",
        obj(&[
            ("competitors", json!(cfg.competitors)),
            ("heartbeat_ms", json!(cfg.heartbeat.as_millis() as u64)),
        ]),
    );

    let roster = RosterHandle::spawn(Roster::new(cfg.competitors));
    let actions = bus
        .subscribe(COMPETITOR_CHANNEL)
        .await
        .context("subscribe to competitor events")?;

    let consumer = tokio::spawn(consume_actions(actions, roster.clone(), shutdown.clone()));
    let listener_task = tokio::spawn(http::serve(
        listener,
        roster.clone(),
        shutdown.clone(),
        cfg.shutdown_grace,
    ));

    let broadcast = broadcast_rounds(&cfg, bus.as_ref(), &roster, &shutdown).await;
    if let Err(err) = &broadcast {
        error(Domain::Referee, "broadcast_failed", obj(&[("error", v_str(&format!("{:#}", err)))]));
    }
    shutdown.trigger();

    let consumed = consumer.await.context("action consumer panicked")?;
    let served = listener_task.await.context("registration listener panicked")?;

    let report = broadcast?;
    log_contest_summary(
        report.rounds,
        report.winner.as_ref().map(|w| (w.id.as_str(), w.name.as_str())),
        report.finished,
    );
    consumed?;
    served?;
    Ok(report)
}

async fn broadcast_rounds(
    cfg: &ArbiterConfig,
    bus: &dyn Bus,
    roster: &RosterHandle,
    shutdown: &Shutdown,
) -> Result<ContestReport> {
    let mut report = ContestReport::default();
    let mut ticker = interval_at(Instant::now() + cfg.heartbeat, cfg.heartbeat);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(report),
            _ = ticker.tick() => {}
        }

        let event = match roster.emit().await {
            Ok(event) => event,
            Err(ContestError::Finished) => {
                report.finished = true;
                info(Domain::Referee, "contest_finished", obj(&[("round", json!(report.rounds))]));
                return Ok(report);
            }
            Err(err) => return Err(anyhow::Error::new(err).context("emit broadcast")),
        };

        if let Event::Round(round) = &event {
            report.rounds = round.id;
            report.winner = round.survivor().cloned();
            log_round(round.id, round.competitors.len());
        }

        let payload = event.to_bytes().context("encode broadcast")?;
        bus.publish(ARBITER_CHANNEL, payload)
            .await
            .context("publish broadcast")?;
    }
}

/// Feed shots from the action channel into the roster. Malformed data or a
/// lost subscription is fatal; rule violations are only logged.
async fn consume_actions(mut actions: Subscription, roster: RosterHandle, shutdown: Shutdown) -> Result<()> {
    let result = loop {
        let payload = tokio::select! {
            _ = shutdown.cancelled() => break Ok(()),
            payload = actions.recv() => payload,
        };
        let Some(payload) = payload else {
            break Err(anyhow!("competitor event subscription closed"));
        };

        let event = match Event::from_bytes(&payload) {
            Ok(event) => event,
            Err(err) => {
                error(
                    Domain::Referee,
                    "malformed_competitor_event",
                    obj(&[
                        ("error", v_err(&err)),
                        ("payload", v_str(&String::from_utf8_lossy(&payload))),
                    ]),
                );
                break Err(anyhow::Error::new(err).context("decode competitor event"));
            }
        };

        let kind = event.kind();
        if kind != EventKind::Shot {
            warn(Domain::Referee, "unexpected_competitor_event", obj(&[("kind", v_str(kind.as_str()))]));
            continue;
        }

        match roster.submit(event).await {
            Ok(()) => {}
            Err(ContestError::Unavailable) => break Err(anyhow!(ContestError::Unavailable)),
            Err(err) => warn(Domain::Referee, "shot_rejected", obj(&[("error", v_err(&err))])),
        }
    };

    actions.close();
    if result.is_err() {
        shutdown.trigger();
    }
    result
}
