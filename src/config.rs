//! Environment configuration for the arbiter, the shooters, the relay and the
//! single-process local contest.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};

use crate::event::RegistrationRequest;

fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key).and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

#[derive(Debug, Clone)]
pub struct ArbiterConfig {
    pub port: u16,
    pub bus_addr: String,
    pub competitors: usize,
    pub heartbeat: Duration,
    pub shutdown_grace: Duration,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl ArbiterConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            // ":8080" is accepted as well as "8080"
            port: lookup("PORT")
                .and_then(|v| v.trim().trim_start_matches(':').parse().ok())
                .unwrap_or(8080),
            bus_addr: lookup("BUS_ADDR").unwrap_or_else(|| "ws://127.0.0.1:6380".to_string()),
            competitors: parsed(&lookup, "COMPETITORS", 2),
            heartbeat: Duration::from_millis(parsed(&lookup, "HEARTBEAT_MS", 1000)),
            shutdown_grace: Duration::from_secs(parsed(&lookup, "SHUTDOWN_GRACE_SECS", 60)),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.heartbeat.is_zero() {
            bail!("HEARTBEAT_MS must be positive");
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ShooterConfig {
    pub bus_addr: String,
    pub arbiter_addr: String,
    pub name: String,
    pub health: i64,
    pub damage: i64,
    pub silence_window: Duration,
    pub registration_timeout: Duration,
}

impl ShooterConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            bus_addr: lookup("BUS_ADDR").unwrap_or_else(|| "ws://127.0.0.1:6380".to_string()),
            arbiter_addr: lookup("ARBITER_ADDR").unwrap_or_else(|| "http://127.0.0.1:8080".to_string()),
            name: lookup("SHOOTER_NAME").unwrap_or_default(),
            health: parsed(&lookup, "SHOOTER_HEALTH", 0),
            damage: parsed(&lookup, "SHOOTER_DAMAGE", 0),
            silence_window: Duration::from_millis(parsed(&lookup, "SILENCE_MS", 2000)),
            registration_timeout: Duration::from_millis(parsed(&lookup, "REGISTRATION_TIMEOUT_MS", 5000)),
        }
    }

    pub fn registration(&self) -> RegistrationRequest {
        RegistrationRequest {
            name: self.name.clone(),
            health: self.health,
            damage: self.damage,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            bail!("SHOOTER_NAME must be set");
        }
        if self.health <= 0 {
            bail!("SHOOTER_HEALTH must be positive, got {}", self.health);
        }
        if self.damage <= 0 {
            bail!("SHOOTER_DAMAGE must be positive, got {}", self.damage);
        }
        if self.silence_window.is_zero() {
            bail!("SILENCE_MS must be positive");
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub addr: String,
}

impl RelayConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            addr: lookup("RELAY_ADDR").unwrap_or_else(|| "127.0.0.1:6380".to_string()),
        }
    }
}

/// A whole contest declared in one place: `SHOOTERS="Alice:3:1,Bob:1:1"`.
#[derive(Debug, Clone)]
pub struct LocalContestConfig {
    pub shooters: Vec<RegistrationRequest>,
    pub heartbeat: Duration,
}

impl LocalContestConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let raw = lookup("SHOOTERS").unwrap_or_else(|| "Alice:3:1,Bob:1:1".to_string());
        Ok(Self {
            shooters: parse_shooters(&raw)?,
            heartbeat: Duration::from_millis(parsed(&lookup, "HEARTBEAT_MS", 1000)),
        })
    }

    pub fn arbiter(&self) -> ArbiterConfig {
        ArbiterConfig {
            competitors: self.shooters.len(),
            heartbeat: self.heartbeat,
            ..ArbiterConfig::default()
        }
    }

    pub fn shooter(&self, index: usize, arbiter_addr: &str) -> Option<ShooterConfig> {
        let declared = self.shooters.get(index)?;
        Some(ShooterConfig {
            arbiter_addr: arbiter_addr.to_string(),
            name: declared.name.clone(),
            health: declared.health,
            damage: declared.damage,
            silence_window: self.heartbeat * 2,
            ..ShooterConfig::from_lookup(|_| None)
        })
    }
}

/// Parse `name:health:damage` entries separated by commas.
pub fn parse_shooters(raw: &str) -> Result<Vec<RegistrationRequest>> {
    let mut out = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let mut parts = entry.split(':');
        let (Some(name), Some(health), Some(damage), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(anyhow!("shooter entry {:?} is not name:health:damage", entry));
        };
        let req = RegistrationRequest {
            name: name.trim().to_string(),
            health: health.trim().parse().with_context(|| format!("health in {:?}", entry))?,
            damage: damage.trim().parse().with_context(|| format!("damage in {:?}", entry))?,
        };
        if !req.is_complete() {
            bail!("shooter entry {:?} needs a name and positive health and damage", entry);
        }
        out.push(req);
    }
    if out.is_empty() {
        bail!("no shooters declared");
    }
    Ok(out)
}
