//! Wire types shared by the arbiter and the shooters.
//!
//! Every bus message is an [`Event`] envelope: a `type` discriminator plus an
//! optional `data` payload whose shape depends on the discriminator.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Competitor {
    pub id: String,
    pub name: String,
    pub health: i64,
    pub damage: i64,
}

impl Competitor {
    /// A descriptor nobody could have meant to register.
    pub fn is_invalid(&self) -> bool {
        self.name.trim().is_empty() || self.health <= 0 || self.damage <= 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shot {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundSnapshot {
    pub id: u64,
    pub competitors: BTreeMap<String, Competitor>,
}

impl RoundSnapshot {
    pub fn contains(&self, id: &str) -> bool {
        self.competitors.contains_key(id)
    }

    /// The sole survivor, if the round has exactly one competitor left.
    pub fn survivor(&self) -> Option<&Competitor> {
        if self.competitors.len() == 1 {
            self.competitors.values().next()
        } else {
            None
        }
    }
}

/// Body of `POST /register`. Missing fields decode as zero values so the
/// listener can answer them with 400 rather than a decode failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub health: i64,
    #[serde(default)]
    pub damage: i64,
}

impl RegistrationRequest {
    pub fn is_complete(&self) -> bool {
        !self.name.trim().is_empty() && self.health > 0 && self.damage > 0
    }

    pub fn into_competitor(self, id: String) -> Competitor {
        Competitor {
            id,
            name: self.name,
            health: self.health,
            damage: self.damage,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum Event {
    Heartbeat,
    Registration(Competitor),
    Round(RoundSnapshot),
    Shot(Shot),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Heartbeat,
    Registration,
    Round,
    Shot,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Heartbeat => "heartbeat",
            EventKind::Registration => "registration",
            EventKind::Round => "round",
            EventKind::Shot => "shot",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Heartbeat => EventKind::Heartbeat,
            Event::Registration(_) => EventKind::Registration,
            Event::Round(_) => EventKind::Round,
            Event::Shot(_) => EventKind::Shot,
        }
    }

    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn alice() -> Competitor {
        Competitor {
            id: "a1".to_string(),
            name: "Alice".to_string(),
            health: 3,
            damage: 1,
        }
    }

    #[test]
    fn test_heartbeat_omits_data() {
        let bytes = Event::Heartbeat.to_bytes().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value, json!({"type": "heartbeat"}));
        assert_eq!(Event::from_bytes(br#"{"type":"heartbeat"}"#).unwrap(), Event::Heartbeat);
    }

    #[test]
    fn test_round_wire_shape() {
        let mut competitors = BTreeMap::new();
        competitors.insert("a1".to_string(), alice());
        let event = Event::Round(RoundSnapshot { id: 7, competitors });

        let value: serde_json::Value = serde_json::from_slice(&event.to_bytes().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "round",
                "data": {
                    "id": 7,
                    "competitors": {
                        "a1": {"id": "a1", "name": "Alice", "health": 3, "damage": 1}
                    }
                }
            })
        );
    }

    #[test]
    fn test_shot_decodes_from_foreign_publisher() {
        let raw = br#"{"type":"shot","data":{"from":"a1","to":"b2"}}"#;
        let event = Event::from_bytes(raw).unwrap();
        assert_eq!(
            event,
            Event::Shot(Shot {
                from: "a1".to_string(),
                to: "b2".to_string()
            })
        );
        assert_eq!(event.kind(), EventKind::Shot);
    }

    #[test]
    fn test_malformed_envelopes_rejected() {
        assert!(Event::from_bytes(b"not json").is_err());
        assert!(Event::from_bytes(br#"{"type":"volley","data":{}}"#).is_err());
        assert!(Event::from_bytes(br#"{"type":"shot","data":{"from":"a1"}}"#).is_err());
        assert!(Event::from_bytes(br#"{"type":"shot","data":{"from":1,"to":2}}"#).is_err());
        assert!(Event::from_bytes(br#"{"data":{"from":"a","to":"b"}}"#).is_err());
    }

    #[test]
    fn test_registration_request_defaults_missing_fields() {
        let req: RegistrationRequest = serde_json::from_str(r#"{"name":"Bob"}"#).unwrap();
        assert_eq!(req.health, 0);
        assert!(!req.is_complete());

        let req: RegistrationRequest =
            serde_json::from_str(r#"{"name":"Bob","health":2,"damage":1}"#).unwrap();
        assert!(req.is_complete());
        let competitor = req.into_competitor("b2".to_string());
        assert_eq!(competitor.name, "Bob");
        assert!(!competitor.is_invalid());
    }

    #[test]
    fn test_survivor() {
        let mut competitors = BTreeMap::new();
        competitors.insert("a1".to_string(), alice());
        let round = RoundSnapshot { id: 1, competitors };
        assert_eq!(round.survivor().map(|c| c.name.as_str()), Some("Alice"));
        assert!(round.contains("a1"));
        assert!(!round.contains("b2"));
    }
}
