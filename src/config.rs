//! Engine configuration resolved from the environment.
//!
//! All options carry the documented defaults so a bare `EngineConfig::default()`
//! is a working local setup. `from_env` layers `.env` (via dotenvy) and process
//! environment variables on top.

use std::time::Duration;

/// Storage backend selection for the three persistent stores.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StorageBackend {
    /// Process-local volatile stores; used by tests and demo runs.
    InMemory,
    /// Embedded SQLite database on local disk.
    Embedded,
    /// Networked Postgres store shared between engine replicas.
    SharedCache,
}

impl StorageBackend {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "memory" | "in-memory" => Some(Self::InMemory),
            "embedded" | "sqlite" => Some(Self::Embedded),
            "shared-cache" | "postgres" => Some(Self::SharedCache),
            _ => None,
        }
    }
}

/// Human-in-the-loop gate settings.
#[derive(Clone, Debug)]
pub struct GateSettings {
    /// Transfer amount at which the gate pauses (inclusive).
    pub threshold: f64,
    /// When true the gate never pauses.
    pub auto_approve: bool,
    /// Advisory decision window stamped on approval records.
    pub timeout_seconds: u64,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            threshold: 5_000.0,
            auto_approve: false,
            timeout_seconds: 3_600,
        }
    }
}

/// Downstream banking collaborator settings.
#[derive(Clone, Debug)]
pub struct DownstreamSettings {
    pub base_url: String,
    pub timeout_ms: u64,
}

impl DownstreamSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for DownstreamSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            timeout_ms: 60_000,
        }
    }
}

/// Top-level engine configuration.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub gate: GateSettings,
    /// Classifier confidence below this (strict `<`) flags the turn for review.
    pub confidence_threshold: f64,
    pub downstream: DownstreamSettings,
    pub storage_backend: StorageBackend,
    /// SQLite path or Postgres URL, depending on the backend.
    pub storage_path_or_url: String,
    /// Account used when the user does not name one.
    pub default_account: String,
    /// HTTP bind address for the facade.
    pub bind_addr: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            gate: GateSettings::default(),
            confidence_threshold: 0.80,
            downstream: DownstreamSettings::default(),
            storage_backend: StorageBackend::Embedded,
            storage_path_or_url: "tellerflow.db".to_string(),
            default_account: "123".to_string(),
            bind_addr: "127.0.0.1:3000".to_string(),
        }
    }
}

impl EngineConfig {
    /// Resolve configuration from `.env` and the process environment.
    ///
    /// Unset or unparseable variables fall back to the defaults above.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let mut cfg = Self::default();

        if let Some(v) = env_parse::<f64>("TELLERFLOW_HIL_THRESHOLD") {
            cfg.gate.threshold = v;
        }
        if let Some(v) = env_parse::<bool>("TELLERFLOW_HIL_AUTO_APPROVE") {
            cfg.gate.auto_approve = v;
        }
        if let Some(v) = env_parse::<u64>("TELLERFLOW_HIL_TIMEOUT_SECONDS") {
            cfg.gate.timeout_seconds = v;
        }
        if let Some(v) = env_parse::<f64>("TELLERFLOW_CONFIDENCE_THRESHOLD") {
            cfg.confidence_threshold = v;
        }
        if let Ok(v) = std::env::var("TELLERFLOW_DOWNSTREAM_BASE_URL") {
            cfg.downstream.base_url = v;
        }
        if let Some(v) = env_parse::<u64>("TELLERFLOW_DOWNSTREAM_TIMEOUT_MS") {
            cfg.downstream.timeout_ms = v;
        }
        if let Some(v) = std::env::var("TELLERFLOW_STORAGE_BACKEND")
            .ok()
            .and_then(|s| StorageBackend::parse(&s))
        {
            cfg.storage_backend = v;
        }
        if let Ok(v) = std::env::var("TELLERFLOW_STORAGE_PATH_OR_URL") {
            cfg.storage_path_or_url = v;
        }
        if let Ok(v) = std::env::var("TELLERFLOW_DEFAULT_ACCOUNT") {
            cfg.default_account = v;
        }
        if let Ok(v) = std::env::var("TELLERFLOW_BIND_ADDR") {
            cfg.bind_addr = v;
        }
        cfg
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.gate.threshold, 5_000.0);
        assert!(!cfg.gate.auto_approve);
        assert_eq!(cfg.gate.timeout_seconds, 3_600);
        assert_eq!(cfg.confidence_threshold, 0.80);
        assert_eq!(cfg.downstream.timeout_ms, 60_000);
        assert_eq!(cfg.storage_backend, StorageBackend::Embedded);
    }

    #[test]
    fn backend_parsing_accepts_aliases() {
        assert_eq!(
            StorageBackend::parse("embedded"),
            Some(StorageBackend::Embedded)
        );
        assert_eq!(
            StorageBackend::parse("shared-cache"),
            Some(StorageBackend::SharedCache)
        );
        assert_eq!(StorageBackend::parse("memory"), Some(StorageBackend::InMemory));
        assert_eq!(StorageBackend::parse("bogus"), None);
    }
}
