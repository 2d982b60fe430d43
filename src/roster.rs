//! The arbiter's authoritative contest state.
//!
//! [`Roster`] is a plain synchronous state machine; exclusive ownership (and
//! therefore "one mutation at a time") is provided by the actor in
//! [`crate::arbiter::actor`].

use std::collections::BTreeMap;

use thiserror::Error;

use crate::event::{Competitor, Event, RoundSnapshot, Shot};
use crate::logging::{log_elimination, log_phase_change, log_registration, log_shot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContestError {
    #[error("shootout not started yet")]
    NotStarted,
    #[error("shootout already started")]
    AlreadyStarted,
    #[error("shootout is finished")]
    Finished,
    #[error("unacceptable payload")]
    UnacceptablePayload,
    #[error("invalid registration event")]
    InvalidRegistration,
    #[error("roster is unavailable")]
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContestPhase {
    AwaitingRegistrations,
    Active,
    Finished,
}

impl ContestPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContestPhase::AwaitingRegistrations => "awaiting_registrations",
            ContestPhase::Active => "active",
            ContestPhase::Finished => "finished",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Roster {
    target: usize,
    phase: ContestPhase,
    round: u64,
    competitors: BTreeMap<String, Competitor>,
}

impl Roster {
    pub fn new(target: usize) -> Self {
        // A contest for nobody has nothing to wait for.
        let phase = if target == 0 {
            ContestPhase::Active
        } else {
            ContestPhase::AwaitingRegistrations
        };
        Self {
            target,
            phase,
            round: 0,
            competitors: BTreeMap::new(),
        }
    }

    pub fn phase(&self) -> ContestPhase {
        self.phase
    }

    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn target(&self) -> usize {
        self.target
    }

    pub fn len(&self) -> usize {
        self.competitors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.competitors.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Competitor> {
        self.competitors.get(id)
    }

    /// Apply one inbound event. Kinds the roster does not consume are ignored.
    pub fn submit(&mut self, event: Event) -> Result<(), ContestError> {
        match event {
            Event::Registration(competitor) => self.register(competitor),
            Event::Shot(shot) => self.shoot(shot),
            Event::Heartbeat | Event::Round(_) => Ok(()),
        }
    }

    /// Produce the next broadcast.
    pub fn emit(&mut self) -> Result<Event, ContestError> {
        match self.phase {
            ContestPhase::Finished => Err(ContestError::Finished),
            ContestPhase::AwaitingRegistrations => Ok(Event::Heartbeat),
            ContestPhase::Active => {
                self.round += 1;
                if self.competitors.len() <= 1 {
                    self.transition(ContestPhase::Finished);
                }
                Ok(Event::Round(self.snapshot()))
            }
        }
    }

    pub fn snapshot(&self) -> RoundSnapshot {
        RoundSnapshot {
            id: self.round,
            competitors: self.competitors.clone(),
        }
    }

    fn register(&mut self, competitor: Competitor) -> Result<(), ContestError> {
        match self.phase {
            ContestPhase::Finished => return Err(ContestError::Finished),
            ContestPhase::Active => return Err(ContestError::AlreadyStarted),
            ContestPhase::AwaitingRegistrations => {}
        }
        if competitor.is_invalid() {
            return Err(ContestError::InvalidRegistration);
        }

        log_registration(
            &competitor.id,
            &competitor.name,
            competitor.health,
            competitor.damage,
            self.competitors.len() + 1,
        );
        self.competitors.insert(competitor.id.clone(), competitor);

        if self.competitors.len() == self.target {
            self.transition(ContestPhase::Active);
        }
        Ok(())
    }

    fn shoot(&mut self, shot: Shot) -> Result<(), ContestError> {
        if self.phase == ContestPhase::AwaitingRegistrations {
            return Err(ContestError::NotStarted);
        }
        if shot.from.is_empty() || shot.to.is_empty() {
            return Err(ContestError::UnacceptablePayload);
        }

        // Either side may already be out; the shot simply arrives too late.
        let (shooter, damage) = match self.competitors.get(&shot.from) {
            Some(c) => (c.name.clone(), c.damage),
            None => return Ok(()),
        };
        let Some(target) = self.competitors.get_mut(&shot.to) else {
            return Ok(());
        };

        target.health -= damage;
        log_shot(&shooter, damage, &target.name, target.health);

        if target.health < 1 {
            if let Some(gone) = self.competitors.remove(&shot.to) {
                log_elimination(&gone.id, &gone.name, self.competitors.len());
            }
        }
        Ok(())
    }

    fn transition(&mut self, next: ContestPhase) {
        log_phase_change(self.phase.as_str(), next.as_str());
        self.phase = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn competitor(id: &str, name: &str, health: i64, damage: i64) -> Competitor {
        Competitor {
            id: id.to_string(),
            name: name.to_string(),
            health,
            damage,
        }
    }

    fn register(roster: &mut Roster, id: &str, name: &str, health: i64, damage: i64) -> Result<(), ContestError> {
        roster.submit(Event::Registration(competitor(id, name, health, damage)))
    }

    fn shot(from: &str, to: &str) -> Event {
        Event::Shot(Shot {
            from: from.to_string(),
            to: to.to_string(),
        })
    }

    fn expect_round(event: Event) -> RoundSnapshot {
        match event {
            Event::Round(round) => round,
            other => panic!("expected round, got {:?}", other.kind()),
        }
    }

    fn duel() -> Roster {
        let mut roster = Roster::new(2);
        register(&mut roster, "test_1", "Alice", 3, 1).unwrap();
        register(&mut roster, "test_2", "Bob", 1, 1).unwrap();
        roster
    }

    #[test]
    fn test_heartbeat_while_awaiting() {
        let mut roster = Roster::new(2);
        assert_eq!(roster.emit().unwrap(), Event::Heartbeat);
        assert_eq!(roster.emit().unwrap(), Event::Heartbeat);
        assert_eq!(roster.round(), 0);
    }

    #[test]
    fn test_activates_exactly_at_target() {
        let mut roster = Roster::new(3);
        register(&mut roster, "a", "A", 1, 1).unwrap();
        assert_eq!(roster.phase(), ContestPhase::AwaitingRegistrations);
        register(&mut roster, "b", "B", 1, 1).unwrap();
        assert_eq!(roster.phase(), ContestPhase::AwaitingRegistrations);
        register(&mut roster, "c", "C", 1, 1).unwrap();
        assert_eq!(roster.phase(), ContestPhase::Active);
    }

    #[test]
    fn test_duel_scenario() {
        let mut roster = duel();
        assert_eq!(roster.phase(), ContestPhase::Active);

        let first = expect_round(roster.emit().unwrap());
        assert_eq!(first.id, 1);
        assert_eq!(first.competitors.len(), 2);

        roster.submit(shot("test_1", "test_2")).unwrap();
        roster.submit(shot("test_2", "test_1")).unwrap();

        let last = expect_round(roster.emit().unwrap());
        assert_eq!(last.id, 2);
        assert_eq!(last.competitors.len(), 1);
        let survivor = last.survivor().unwrap();
        assert_eq!(survivor.name, "Alice");
        // Bob was already gone when his shot landed.
        assert_eq!(survivor.health, 3);
        assert_eq!(roster.phase(), ContestPhase::Finished);

        assert_eq!(roster.emit(), Err(ContestError::Finished));
        assert_eq!(roster.emit(), Err(ContestError::Finished));
    }

    #[test]
    fn test_duel_scenario_reverse_order() {
        let mut roster = duel();
        roster.emit().unwrap();
        roster.submit(shot("test_2", "test_1")).unwrap();
        roster.submit(shot("test_1", "test_2")).unwrap();

        let last = expect_round(roster.emit().unwrap());
        assert_eq!(last.competitors.len(), 1);
        assert_eq!(last.competitors["test_1"].health, 2);
        assert_eq!(roster.emit(), Err(ContestError::Finished));
    }

    #[test]
    fn test_single_competitor_finishes_on_first_round() {
        let mut roster = Roster::new(1);
        assert_eq!(roster.emit().unwrap(), Event::Heartbeat);
        register(&mut roster, "test_1", "Alice", 3, 1).unwrap();

        let round = expect_round(roster.emit().unwrap());
        assert_eq!(round.competitors.len(), 1);
        assert!(round.contains("test_1"));
        assert_eq!(roster.phase(), ContestPhase::Finished);
    }

    #[test]
    fn test_zero_target_finishes_immediately() {
        let mut roster = Roster::new(0);
        assert_eq!(roster.target(), 0);
        assert_eq!(roster.phase(), ContestPhase::Active);
        let round = expect_round(roster.emit().unwrap());
        assert!(round.competitors.is_empty());
        assert_eq!(roster.phase(), ContestPhase::Finished);
        assert_eq!(roster.emit(), Err(ContestError::Finished));
    }

    #[test]
    fn test_registration_after_start_rejected() {
        let mut roster = Roster::new(1);
        register(&mut roster, "test_1", "Alice", 3, 1).unwrap();
        assert_eq!(
            register(&mut roster, "test_2", "Bob", 1, 1),
            Err(ContestError::AlreadyStarted)
        );
        assert_eq!(roster.len(), 1);

        roster.emit().unwrap();
        assert_eq!(
            register(&mut roster, "test_3", "Carol", 1, 1),
            Err(ContestError::Finished)
        );
        assert_eq!(roster.len(), 1);
    }

    #[test]
    fn test_invalid_registration() {
        let mut roster = Roster::new(2);
        assert_eq!(
            register(&mut roster, "", "", 0, 0),
            Err(ContestError::InvalidRegistration)
        );
        assert_eq!(
            register(&mut roster, "z", "Zed", 0, 1),
            Err(ContestError::InvalidRegistration)
        );
        assert_eq!(
            register(&mut roster, "z", "Zed", 1, -4),
            Err(ContestError::InvalidRegistration)
        );
        assert!(roster.is_empty());
        assert_eq!(roster.phase(), ContestPhase::AwaitingRegistrations);
    }

    #[test]
    fn test_shot_before_start() {
        let mut roster = Roster::new(2);
        assert_eq!(roster.submit(shot("", "")), Err(ContestError::NotStarted));
    }

    #[test]
    fn test_shot_with_empty_identity() {
        let mut roster = duel();
        assert_eq!(roster.submit(shot("", "")), Err(ContestError::UnacceptablePayload));
        assert_eq!(roster.submit(shot("test_1", "")), Err(ContestError::UnacceptablePayload));
        assert_eq!(roster.submit(shot("", "test_1")), Err(ContestError::UnacceptablePayload));
        assert_eq!(roster.get("test_1").unwrap().health, 3);
        assert_eq!(roster.get("test_2").unwrap().health, 1);
    }

    #[test]
    fn test_shot_from_or_to_unknown_is_noop() {
        let mut roster = duel();
        roster.submit(shot("unexisting", "test_1")).unwrap();
        roster.submit(shot("test_2", "nonexisting")).unwrap();
        let round = expect_round(roster.emit().unwrap());
        assert_eq!(round.competitors["test_1"].health, 3);
        assert_eq!(round.competitors["test_2"].health, 1);
    }

    #[test]
    fn test_shot_subtracts_damage() {
        let mut roster = Roster::new(2);
        register(&mut roster, "a", "A", 10, 3).unwrap();
        register(&mut roster, "b", "B", 10, 4).unwrap();
        roster.submit(shot("a", "b")).unwrap();
        roster.submit(shot("a", "b")).unwrap();
        roster.submit(shot("b", "a")).unwrap();
        assert_eq!(roster.get("b").unwrap().health, 4);
        assert_eq!(roster.get("a").unwrap().health, 6);
    }

    #[test]
    fn test_eliminated_absent_from_later_rounds() {
        let mut roster = Roster::new(3);
        register(&mut roster, "a", "A", 5, 5).unwrap();
        register(&mut roster, "b", "B", 5, 1).unwrap();
        register(&mut roster, "c", "C", 5, 1).unwrap();
        roster.emit().unwrap();
        roster.submit(shot("a", "b")).unwrap();
        for _ in 0..3 {
            let round = expect_round(roster.emit().unwrap());
            assert!(!round.contains("b"));
            assert_eq!(round.competitors.len(), 2);
        }
        // A dead shooter's late shot lands nowhere.
        roster.submit(shot("b", "c")).unwrap();
        assert_eq!(roster.get("c").unwrap().health, 5);
    }

    #[test]
    fn test_round_numbers_strictly_increase() {
        let mut roster = duel();
        let ids: Vec<u64> = (0..5).map(|_| expect_round(roster.emit().unwrap()).id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_other_kinds_ignored() {
        let mut roster = Roster::new(2);
        roster.submit(Event::Heartbeat).unwrap();
        roster.submit(Event::Round(roster.snapshot())).unwrap();
        assert!(roster.is_empty());
        assert_eq!(roster.phase(), ContestPhase::AwaitingRegistrations);
    }
}
