//! Structured JSON-lines logging.
//!
//! Every record carries a run id, a sequence number, a level and a domain so
//! a contest can be reconstructed from the combined output of the arbiter and
//! its shooters. Records go to stdout; when `LOG_DIR` is set they are also
//! written under `LOG_DIR/<run_id>/`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

// =============================================================================
// Log Levels
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Fatal = 5,
}

impl Level {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "trace" => Some(Level::Trace),
            "debug" => Some(Level::Debug),
            "info" => Some(Level::Info),
            "warn" => Some(Level::Warn),
            "error" => Some(Level::Error),
            "fatal" => Some(Level::Fatal),
            _ => None,
        }
    }

    pub fn from_env() -> Self {
        std::env::var("LOG_LEVEL")
            .ok()
            .and_then(|v| Level::parse(&v))
            .unwrap_or(Level::Info)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Fatal => "fatal",
        }
    }
}

// =============================================================================
// Log Domains (categories for filtering)
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Contest, // Outcomes and summaries
    Roster,  // Registrations, shots, eliminations
    Referee, // Arbiter loop: ticks, inbound actions
    Shooter, // Participant loop decisions
    Bus,     // Publish/subscribe transport
    Http,    // Registration listener and client
    System,  // Startup, shutdown, config
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Contest => "contest",
            Domain::Roster => "roster",
            Domain::Referee => "referee",
            Domain::Shooter => "shooter",
            Domain::Bus => "bus",
            Domain::Http => "http",
            Domain::System => "system",
        }
    }

    fn enabled_in(&self, filter: Option<&str>) -> bool {
        // LOG_DOMAINS is a comma-separated list or "all"
        match filter {
            None | Some("all") => true,
            Some(domains) => domains.split(',').any(|d| d.trim() == self.as_str()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled_in(settings().domains.as_deref())
    }
}

// =============================================================================
// Run context
// =============================================================================

static LOG_SEQ: AtomicU64 = AtomicU64::new(0);
static RUN_CONTEXT: OnceLock<RunContext> = OnceLock::new();
static SETTINGS: OnceLock<Settings> = OnceLock::new();

fn next_seq() -> u64 {
    LOG_SEQ.fetch_add(1, Ordering::SeqCst)
}

struct Settings {
    min_level: Level,
    domains: Option<String>,
}

fn settings() -> &'static Settings {
    SETTINGS.get_or_init(|| Settings {
        min_level: Level::from_env(),
        domains: std::env::var("LOG_DOMAINS").ok(),
    })
}

#[derive(Debug)]
struct FileSinks {
    events: Mutex<BufWriter<File>>,
    trace: Mutex<BufWriter<File>>,
}

#[derive(Debug)]
struct RunContext {
    run_id: String,
    files: Option<FileSinks>,
}

fn ensure_run_context() -> &'static RunContext {
    RUN_CONTEXT.get_or_init(|| {
        let run_id = std::env::var("RUN_ID")
            .unwrap_or_else(|_| format!("r-{}-{}", ts_epoch_ms(), process::id()));
        let files = std::env::var("LOG_DIR")
            .ok()
            .and_then(|base| open_sinks(PathBuf::from(base), &run_id));
        RunContext { run_id, files }
    })
}

fn open_sinks(base: PathBuf, run_id: &str) -> Option<FileSinks> {
    let run_dir = base.join(run_id);
    if let Err(err) = create_dir_all(&run_dir) {
        eprintln!("[log] failed to create run dir {}: {}", run_dir.display(), err);
        return None;
    }
    let _ = std::fs::write(
        run_dir.join("manifest.json"),
        json!({
            "run_id": run_id,
            "ts": ts_now(),
            "pid": process::id(),
            "log_dir": run_dir.to_string_lossy(),
        })
        .to_string(),
    );
    let open = |name: &str| match File::create(run_dir.join(name)) {
        Ok(f) => Some(Mutex::new(BufWriter::new(f))),
        Err(err) => {
            eprintln!("[log] failed to create {}: {}", name, err);
            None
        }
    };
    Some(FileSinks {
        events: open("events.jsonl")?,
        trace: open("trace.jsonl")?,
    })
}

fn sanitize_fields(mut fields: Map<String, Value>) -> Map<String, Value> {
    let redacted = Value::String("[REDACTED]".to_string());
    for key in ["authorization", "Authorization", "password", "token"] {
        if fields.contains_key(key) {
            fields.insert(key.to_string(), redacted.clone());
        }
    }
    fields
}

fn split_fields(mut fields: Map<String, Value>) -> (Map<String, Value>, Map<String, Value>) {
    let mut top = Map::new();
    for key in ["competitor_id", "round", "msg"] {
        if let Some(value) = fields.remove(key) {
            top.insert(key.to_string(), value);
        }
    }
    (top, fields)
}

fn write_line(writer: &Mutex<BufWriter<File>>, line: &str) {
    if let Ok(mut w) = writer.lock() {
        let _ = writeln!(w, "{}", line);
        let _ = w.flush();
    }
}

// =============================================================================
// Core logging functions
// =============================================================================

/// RFC3339 timestamp with milliseconds
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Epoch milliseconds
pub fn ts_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

/// Emit a structured log entry
pub fn log(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
    if level < settings().min_level || !domain.is_enabled() {
        return;
    }
    emit_record(level, domain.as_str(), event, fields);
}

fn build_record(
    run_id: &str,
    level: Level,
    component: &str,
    event: &str,
    fields: Map<String, Value>,
) -> Value {
    let fields = sanitize_fields(fields);
    let (mut top, data) = split_fields(fields);

    let msg = top.remove("msg").unwrap_or(Value::String(String::new()));
    let mut entry = Map::new();
    entry.insert("ts".to_string(), json!(ts_now()));
    entry.insert("run_id".to_string(), json!(run_id));
    entry.insert("seq".to_string(), json!(next_seq()));
    entry.insert("lvl".to_string(), json!(level.as_str().to_uppercase()));
    entry.insert("component".to_string(), json!(component));
    entry.insert("event".to_string(), json!(event));
    entry.insert("msg".to_string(), msg);
    for (k, v) in top {
        entry.insert(k, v);
    }
    entry.insert("data".to_string(), Value::Object(data));
    Value::Object(entry)
}

fn emit_record(level: Level, component: &str, event: &str, fields: Map<String, Value>) {
    let ctx = ensure_run_context();
    let line = build_record(&ctx.run_id, level, component, event, fields).to_string();
    if let Some(files) = &ctx.files {
        match level {
            Level::Trace | Level::Debug => write_line(&files.trace, &line),
            _ => write_line(&files.events, &line),
        }
    }
    println!("{}", line);
}

pub fn info(domain: Domain, event: &str, fields: Map<String, Value>) {
    log(Level::Info, domain, event, fields);
}

pub fn warn(domain: Domain, event: &str, fields: Map<String, Value>) {
    log(Level::Warn, domain, event, fields);
}

pub fn error(domain: Domain, event: &str, fields: Map<String, Value>) {
    log(Level::Error, domain, event, fields);
}

pub fn debug(domain: Domain, event: &str, fields: Map<String, Value>) {
    log(Level::Debug, domain, event, fields);
}

// =============================================================================
// Contest logs
// =============================================================================

pub fn log_registration(competitor_id: &str, name: &str, health: i64, damage: i64, roster_size: usize) {
    log(
        Level::Info,
        Domain::Roster,
        "registration",
        obj(&[
            ("competitor_id", v_str(competitor_id)),
            ("name", v_str(name)),
            ("health", json!(health)),
            ("damage", json!(damage)),
            ("roster_size", json!(roster_size)),
        ]),
    );
}

pub fn log_shot(shooter: &str, damage: i64, target: &str, remaining: i64) {
    log(
        Level::Info,
        Domain::Roster,
        "shot",
        obj(&[
            ("msg", v_str(&format!("{} inflicted {} damage on {}", shooter, damage, target))),
            ("shooter", v_str(shooter)),
            ("target", v_str(target)),
            ("damage", json!(damage)),
            ("remaining", json!(remaining)),
        ]),
    );
}

pub fn log_elimination(competitor_id: &str, name: &str, survivors: usize) {
    log(
        Level::Info,
        Domain::Roster,
        "elimination",
        obj(&[
            ("competitor_id", v_str(competitor_id)),
            ("name", v_str(name)),
            ("survivors", json!(survivors)),
        ]),
    );
}

pub fn log_phase_change(from: &str, to: &str) {
    log(
        Level::Info,
        Domain::Contest,
        "phase_change",
        obj(&[("from", v_str(from)), ("to", v_str(to))]),
    );
}

pub fn log_round(round: u64, survivors: usize) {
    log(
        Level::Debug,
        Domain::Referee,
        "round",
        obj(&[("round", json!(round)), ("survivors", json!(survivors))]),
    );
}

pub fn log_outcome(competitor_id: &str, outcome: &str) {
    log(
        Level::Info,
        Domain::Contest,
        "outcome",
        obj(&[("competitor_id", v_str(competitor_id)), ("outcome", v_str(outcome))]),
    );
}

/// Summary on arbiter shutdown
pub fn log_contest_summary(rounds: u64, winner: Option<(&str, &str)>, finished: bool) {
    let winner = match winner {
        Some((id, name)) => json!({"id": id, "name": name}),
        None => Value::Null,
    };
    log(
        Level::Info,
        Domain::Contest,
        "contest_summary",
        obj(&[
            ("rounds", json!(rounds)),
            ("winner", winner),
            ("finished", json!(finished)),
        ]),
    );
}

// =============================================================================
// Field helpers
// =============================================================================

pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (k, v) in pairs {
        map.insert((*k).to_string(), v.clone());
    }
    map
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_string())
}

pub fn v_err(err: &dyn std::fmt::Display) -> Value {
    Value::String(err.to_string())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(Level::Trace < Level::Debug);
        assert!(Level::Debug < Level::Info);
        assert!(Level::Info < Level::Warn);
        assert!(Level::Warn < Level::Error);
        assert!(Level::Error < Level::Fatal);
    }

    #[test]
    fn test_level_parse() {
        assert_eq!(Level::parse("warn"), Some(Level::Warn));
        assert_eq!(Level::parse("loud"), None);
    }

    #[test]
    fn test_domain_filter() {
        assert!(Domain::Roster.enabled_in(None));
        assert!(Domain::Roster.enabled_in(Some("all")));
        assert!(Domain::Roster.enabled_in(Some("bus, roster")));
        assert!(!Domain::Shooter.enabled_in(Some("bus,roster")));
    }

    #[test]
    fn test_record_layout() {
        let record = build_record(
            "r-test",
            Level::Warn,
            "roster",
            "shot",
            obj(&[
                ("competitor_id", v_str("a1")),
                ("msg", v_str("hello")),
                ("token", v_str("secret")),
                ("damage", json!(2)),
            ]),
        );
        assert_eq!(record["run_id"], "r-test");
        assert_eq!(record["lvl"], "WARN");
        assert_eq!(record["component"], "roster");
        assert_eq!(record["msg"], "hello");
        assert_eq!(record["competitor_id"], "a1");
        assert_eq!(record["data"]["damage"], 2);
        assert_eq!(record["data"]["token"], "[REDACTED]");
        assert!(record["data"].get("competitor_id").is_none());
    }

    #[test]
    fn test_open_sinks_writes_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let sinks = open_sinks(dir.path().to_path_buf(), "r-sinks");
        assert!(sinks.is_some());
        let manifest = std::fs::read_to_string(dir.path().join("r-sinks/manifest.json")).unwrap();
        let manifest: Value = serde_json::from_str(&manifest).unwrap();
        assert_eq!(manifest["run_id"], "r-sinks");
        assert!(dir.path().join("r-sinks/events.jsonl").exists());
        assert!(dir.path().join("r-sinks/trace.jsonl").exists());
    }

    #[test]
    fn test_seq_increments() {
        let s1 = next_seq();
        let s2 = next_seq();
        assert!(s2 > s1);
    }
}
