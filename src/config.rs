use std::path::PathBuf;
use std::str::FromStr;

use crate::model::Ms;

/// Server settings, read once from `SLOTBOOK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    /// Pending bookings older than this are cancelled. `None` keeps them forever.
    pub pending_ttl_ms: Option<Ms>,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5480,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            password: "slotbook".into(),
            max_connections: 256,
            compact_threshold: 1000,
            pending_ttl_ms: None,
            metrics_port: None,
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.trim().parse().ok())
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparseable values fall back to the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            port: parsed(&lookup, "SLOTBOOK_PORT").unwrap_or(defaults.port),
            bind: lookup("SLOTBOOK_BIND").unwrap_or(defaults.bind),
            data_dir: lookup("SLOTBOOK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            password: lookup("SLOTBOOK_PASSWORD").unwrap_or(defaults.password),
            max_connections: parsed(&lookup, "SLOTBOOK_MAX_CONNECTIONS")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.max_connections),
            compact_threshold: parsed(&lookup, "SLOTBOOK_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            pending_ttl_ms: parsed(&lookup, "SLOTBOOK_PENDING_TTL_MS").filter(|ttl: &Ms| *ttl > 0),
            metrics_port: parsed(&lookup, "SLOTBOOK_METRICS_PORT"),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}
