//! The participant process.
//!
//! A shooter listens to the arbiter's broadcasts, registers on the first
//! heartbeat it sees, and answers every round with one shot. Silence longer
//! than the configured window means the arbiter is gone.

pub mod registration;

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use serde_json::json;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::bus::{Bus, ARBITER_CHANNEL, COMPETITOR_CHANNEL};
use crate::config::ShooterConfig;
use crate::event::{Competitor, Event, EventKind, RegistrationRequest, RoundSnapshot, Shot};
use crate::logging::{debug, error, info, log_outcome, obj, v_str, warn, Domain};
use crate::shutdown::Shutdown;

pub use registration::RegistrationClient;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShooterError {
    #[error("round received before registration")]
    NotRegistered,
    #[error("no target found")]
    NoTarget,
    #[error("unexpected {0} event received")]
    UnexpectedEvent(EventKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Won,
    Eliminated,
    CommunicationLost,
    Cancelled,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Won => "won",
            Outcome::Eliminated => "eliminated",
            Outcome::CommunicationLost => "communication_lost",
            Outcome::Cancelled => "cancelled",
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Won => 0,
            Outcome::Eliminated => 1,
            Outcome::CommunicationLost => 2,
            Outcome::Cancelled => 130,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Won,
    Eliminated,
    Shoot(Shot),
}

/// What to do about a round, given who we are.
///
/// The target is the lexicographically smallest identity other than our own,
/// so every shooter facing the same snapshot makes a reproducible choice.
pub fn decide(own_id: &str, round: &RoundSnapshot) -> Result<Decision, ShooterError> {
    if !round.contains(own_id) {
        return Ok(Decision::Eliminated);
    }
    if round.competitors.len() == 1 {
        return Ok(Decision::Won);
    }
    round
        .competitors
        .keys()
        .find(|id| id.as_str() != own_id)
        .map(|target| {
            Decision::Shoot(Shot {
                from: own_id.to_string(),
                to: target.clone(),
            })
        })
        .ok_or(ShooterError::NoTarget)
}

struct Participant {
    client: RegistrationClient,
    request: RegistrationRequest,
    me: Option<Competitor>,
    shots: mpsc::UnboundedSender<Shot>,
}

impl Participant {
    /// Handle one broadcast; `Some` ends the run.
    async fn on_broadcast(&mut self, payload: &[u8]) -> Result<Option<Outcome>> {
        let event = Event::from_bytes(payload).context("decode arbiter event")?;
        debug(Domain::Shooter, "event_received", obj(&[("kind", v_str(event.kind().as_str()))]));

        match event {
            Event::Heartbeat => {
                if self.me.is_none() {
                    let me = self.client.register(&self.request).await?;
                    info(
                        Domain::Shooter,
                        "registered",
                        obj(&[("competitor_id", v_str(&me.id)), ("name", v_str(&me.name))]),
                    );
                    self.me = Some(me);
                }
                Ok(None)
            }
            Event::Round(round) => {
                let me = self.me.as_ref().ok_or(ShooterError::NotRegistered)?;
                match decide(&me.id, &round)? {
                    Decision::Won => Ok(Some(Outcome::Won)),
                    Decision::Eliminated => Ok(Some(Outcome::Eliminated)),
                    Decision::Shoot(shot) => {
                        debug(
                            Domain::Shooter,
                            "shoot",
                            obj(&[("round", json!(round.id)), ("target", v_str(&shot.to))]),
                        );
                        self.shots
                            .send(shot)
                            .map_err(|_| anyhow!("shot queue closed"))?;
                        Ok(None)
                    }
                }
            }
            other => Err(ShooterError::UnexpectedEvent(other.kind()).into()),
        }
    }
}

/// Run one shooter until it wins, is eliminated, loses the arbiter, or is
/// cancelled. Fatal errors trip `shutdown` and are returned.
pub async fn run(cfg: ShooterConfig, bus: Arc<dyn Bus>, shutdown: Shutdown) -> Result<Outcome> {
    cfg.validate()?;
    let client = RegistrationClient::new(&cfg.arbiter_addr, cfg.registration_timeout)?;
    let mut broadcasts = bus
        .subscribe(ARBITER_CHANNEL)
        .await
        .context("subscribe to arbiter events")?;

    let (shots, queue) = mpsc::unbounded_channel();
    let dispatcher = tokio::spawn(dispatch_shots(queue, bus.clone(), shutdown.clone()));
    let mut participant = Participant {
        client,
        request: cfg.registration(),
        me: None,
        shots,
    };
    info(Domain::Shooter, "shooter_start", obj(&[("name", v_str(&cfg.name))]));

    let result = loop {
        let received = tokio::select! {
            _ = shutdown.cancelled() => break Ok(Outcome::Cancelled),
            received = timeout(cfg.silence_window, broadcasts.recv()) => received,
        };
        let payload = match received {
            Err(_) => {
                warn(
                    Domain::Shooter,
                    "no_heartbeat",
                    obj(&[("silence_ms", json!(cfg.silence_window.as_millis() as u64))]),
                );
                break Ok(Outcome::CommunicationLost);
            }
            Ok(None) => break Err(anyhow!("arbiter event subscription closed")),
            Ok(Some(payload)) => payload,
        };
        match participant.on_broadcast(&payload).await {
            Ok(Some(outcome)) => break Ok(outcome),
            Ok(None) => {}
            Err(err) => break Err(err),
        }
    };

    broadcasts.close();
    let own_id = participant.me.as_ref().map(|me| me.id.clone()).unwrap_or_default();
    // Closing the queue lets the dispatcher drain and stop.
    drop(participant);
    if let Err(err) = &result {
        error(Domain::Shooter, "fatal", obj(&[("error", v_str(&format!("{:#}", err)))]));
        shutdown.trigger();
    }

    let dispatched = dispatcher.await.context("shot dispatcher panicked")?;
    let outcome = result?;
    dispatched?;
    log_outcome(&own_id, outcome.as_str());
    Ok(outcome)
}

async fn dispatch_shots(
    mut queue: mpsc::UnboundedReceiver<Shot>,
    bus: Arc<dyn Bus>,
    shutdown: Shutdown,
) -> Result<()> {
    let result = loop {
        let shot = tokio::select! {
            _ = shutdown.cancelled() => break Ok(()),
            shot = queue.recv() => shot,
        };
        let Some(shot) = shot else {
            break Ok(());
        };
        let payload = match Event::Shot(shot).to_bytes() {
            Ok(payload) => payload,
            Err(err) => break Err(anyhow::Error::new(err).context("encode shot")),
        };
        if let Err(err) = bus.publish(COMPETITOR_CHANNEL, payload).await {
            break Err(err.context("publish shot"));
        }
    };

    queue.close();
    if result.is_err() {
        shutdown.trigger();
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn round(ids: &[&str]) -> RoundSnapshot {
        let mut competitors = BTreeMap::new();
        for id in ids {
            competitors.insert(
                id.to_string(),
                Competitor {
                    id: id.to_string(),
                    name: id.to_uppercase(),
                    health: 1,
                    damage: 1,
                },
            );
        }
        RoundSnapshot { id: 1, competitors }
    }

    fn shot(from: &str, to: &str) -> Decision {
        Decision::Shoot(Shot {
            from: from.to_string(),
            to: to.to_string(),
        })
    }

    #[test]
    fn test_decide_outcomes() {
        assert_eq!(decide("a", &round(&["a"])), Ok(Decision::Won));
        assert_eq!(decide("a", &round(&["b", "c"])), Ok(Decision::Eliminated));
        assert_eq!(decide("a", &round(&[])), Ok(Decision::Eliminated));
        assert_eq!(decide("a", &round(&["a", "b"])), Ok(shot("a", "b")));
    }

    #[test]
    fn test_decide_picks_smallest_other_identity() {
        assert_eq!(decide("m", &round(&["z", "m", "c", "q"])), Ok(shot("m", "c")));
        assert_eq!(decide("c", &round(&["z", "m", "c", "q"])), Ok(shot("c", "m")));
    }

    fn participant() -> (Participant, mpsc::UnboundedReceiver<Shot>) {
        let (shots, queue) = mpsc::unbounded_channel();
        let participant = Participant {
            client: RegistrationClient::new("http://127.0.0.1:9", Duration::from_millis(200)).unwrap(),
            request: RegistrationRequest {
                name: "A".to_string(),
                health: 1,
                damage: 1,
            },
            me: None,
            shots,
        };
        (participant, queue)
    }

    #[tokio::test]
    async fn test_round_before_registration_is_fatal() {
        let (mut p, _queue) = participant();
        let payload = Event::Round(round(&["a", "b"])).to_bytes().unwrap();
        let err = p.on_broadcast(&payload).await.unwrap_err();
        assert_eq!(err.downcast_ref::<ShooterError>(), Some(&ShooterError::NotRegistered));
    }

    #[tokio::test]
    async fn test_foreign_kinds_on_broadcast_are_fatal() {
        let (mut p, _queue) = participant();
        let payload = Event::Shot(Shot {
            from: "a".to_string(),
            to: "b".to_string(),
        })
        .to_bytes()
        .unwrap();
        let err = p.on_broadcast(&payload).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<ShooterError>(),
            Some(&ShooterError::UnexpectedEvent(EventKind::Shot))
        );
        assert!(p.on_broadcast(b"][").await.is_err());
    }

    #[tokio::test]
    async fn test_registered_participant_queues_shot() {
        let (mut p, mut queue) = participant();
        p.me = Some(Competitor {
            id: "b".to_string(),
            name: "B".to_string(),
            health: 1,
            damage: 1,
        });
        let payload = Event::Round(round(&["a", "b", "c"])).to_bytes().unwrap();
        assert_eq!(p.on_broadcast(&payload).await.unwrap(), None);
        assert_eq!(
            queue.try_recv().unwrap(),
            Shot {
                from: "b".to_string(),
                to: "a".to_string()
            }
        );

        let payload = Event::Round(round(&["b"])).to_bytes().unwrap();
        assert_eq!(p.on_broadcast(&payload).await.unwrap(), Some(Outcome::Won));
        let payload = Event::Round(round(&["a"])).to_bytes().unwrap();
        assert_eq!(p.on_broadcast(&payload).await.unwrap(), Some(Outcome::Eliminated));
    }

    #[tokio::test]
    async fn test_registration_failure_is_fatal() {
        let (mut p, _queue) = participant();
        let payload = Event::Heartbeat.to_bytes().unwrap();
        assert!(p.on_broadcast(&payload).await.is_err());
        assert!(p.me.is_none());
    }

    #[tokio::test]
    async fn test_silence_means_communication_lost() {
        let bus = Arc::new(MemoryBus::new());
        let cfg = ShooterConfig {
            name: "Alice".to_string(),
            health: 3,
            damage: 1,
            silence_window: Duration::from_millis(50),
            ..ShooterConfig::from_lookup(|_| None)
        };
        let outcome = tokio::time::timeout(Duration::from_secs(2), run(cfg, bus, Shutdown::new()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, Outcome::CommunicationLost);
    }

    #[tokio::test]
    async fn test_cancel_stops_shooter() {
        let bus = Arc::new(MemoryBus::new());
        let shutdown = Shutdown::new();
        let cfg = ShooterConfig {
            name: "Alice".to_string(),
            health: 3,
            damage: 1,
            silence_window: Duration::from_secs(30),
            ..ShooterConfig::from_lookup(|_| None)
        };
        let handle = tokio::spawn(run(cfg, bus, shutdown.clone()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.trigger();
        let outcome = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(outcome, Outcome::Cancelled);
    }

    #[tokio::test]
    async fn test_dispatcher_publishes_queued_shots() {
        let bus = Arc::new(MemoryBus::new());
        let mut actions = bus.subscribe(COMPETITOR_CHANNEL).await.unwrap();
        let (shots, queue) = mpsc::unbounded_channel();
        let dispatcher = tokio::spawn(dispatch_shots(queue, bus.clone(), Shutdown::new()));

        for to in ["b", "c"] {
            shots
                .send(Shot {
                    from: "a".to_string(),
                    to: to.to_string(),
                })
                .unwrap();
        }
        drop(shots);
        dispatcher.await.unwrap().unwrap();

        for to in ["b", "c"] {
            let event = Event::from_bytes(&actions.recv().await.unwrap()).unwrap();
            assert_eq!(
                event,
                Event::Shot(Shot {
                    from: "a".to_string(),
                    to: to.to_string()
                })
            );
        }
    }
}
