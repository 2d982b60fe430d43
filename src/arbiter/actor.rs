use tokio::sync::{mpsc, oneshot};

use crate::event::Event;
use crate::roster::{ContestError, ContestPhase, Roster};

enum Command {
    Submit {
        event: Event,
        reply: oneshot::Sender<Result<(), ContestError>>,
    },
    Emit {
        reply: oneshot::Sender<Result<Event, ContestError>>,
    },
    Phase {
        reply: oneshot::Sender<ContestPhase>,
    },
}

/// Cloneable handle to the task that owns the [`Roster`].
///
/// Commands are applied one at a time in arrival order, so no caller ever
/// observes a half-applied mutation. The owner task exits once every handle
/// is dropped; calls made after that fail with [`ContestError::Unavailable`].
#[derive(Debug, Clone)]
pub struct RosterHandle {
    tx: mpsc::Sender<Command>,
}

impl RosterHandle {
    pub fn spawn(roster: Roster) -> Self {
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(own(roster, rx));
        Self { tx }
    }

    pub async fn submit(&self, event: Event) -> Result<(), ContestError> {
        let (reply, rx) = oneshot::channel();
        self.call(Command::Submit { event, reply }, rx).await?
    }

    pub async fn emit(&self) -> Result<Event, ContestError> {
        let (reply, rx) = oneshot::channel();
        self.call(Command::Emit { reply }, rx).await?
    }

    pub async fn phase(&self) -> Result<ContestPhase, ContestError> {
        let (reply, rx) = oneshot::channel();
        self.call(Command::Phase { reply }, rx).await
    }

    async fn call<T>(&self, cmd: Command, rx: oneshot::Receiver<T>) -> Result<T, ContestError> {
        self.tx.send(cmd).await.map_err(|_| ContestError::Unavailable)?;
        rx.await.map_err(|_| ContestError::Unavailable)
    }
}

async fn own(mut roster: Roster, mut rx: mpsc::Receiver<Command>) {
    while let Some(cmd) = rx.recv().await {
        // A caller that gave up waiting is not our problem.
        match cmd {
            Command::Submit { event, reply } => {
                let _ = reply.send(roster.submit(event));
            }
            Command::Emit { reply } => {
                let _ = reply.send(roster.emit());
            }
            Command::Phase { reply } => {
                let _ = reply.send(roster.phase());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Competitor, Shot};

    fn registration(id: &str, health: i64) -> Event {
        Event::Registration(Competitor {
            id: id.to_string(),
            name: id.to_uppercase(),
            health,
            damage: 1,
        })
    }

    #[tokio::test]
    async fn test_handle_drives_roster() {
        let roster = RosterHandle::spawn(Roster::new(2));
        assert_eq!(roster.emit().await.unwrap(), Event::Heartbeat);
        roster.submit(registration("a", 3)).await.unwrap();
        roster.submit(registration("b", 1)).await.unwrap();
        assert_eq!(roster.phase().await.unwrap(), ContestPhase::Active);

        roster
            .submit(Event::Shot(Shot {
                from: "a".to_string(),
                to: "b".to_string(),
            }))
            .await
            .unwrap();
        match roster.emit().await.unwrap() {
            Event::Round(round) => assert_eq!(round.competitors.len(), 1),
            other => panic!("unexpected {:?}", other.kind()),
        }
        assert_eq!(roster.emit().await, Err(ContestError::Finished));
    }

    #[tokio::test]
    async fn test_concurrent_shots_all_apply() {
        let roster = RosterHandle::spawn(Roster::new(2));
        roster.submit(registration("a", 100)).await.unwrap();
        roster.submit(registration("b", 100)).await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..40 {
            let roster = roster.clone();
            tasks.push(tokio::spawn(async move {
                roster
                    .submit(Event::Shot(Shot {
                        from: "a".to_string(),
                        to: "b".to_string(),
                    }))
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        match roster.emit().await.unwrap() {
            Event::Round(round) => assert_eq!(round.competitors["b"].health, 60),
            other => panic!("unexpected {:?}", other.kind()),
        }
    }
}
