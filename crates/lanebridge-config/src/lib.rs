//! Gateway configuration and persisted-state handling (SPEC_FULL §E.1, §F).
//!
//! Grounded on the teacher's `TelegramConfig::from_path` / `::from_env`
//! pair (`bin_telegram/src/config.rs`): a TOML file read at startup, with
//! an environment-variable layer on top and CLI flags overriding both.
//! Generalized from one bot's settings to the whole gateway's.

pub mod cli;
pub mod persist;

use std::path::PathBuf;
use std::time::Duration;

use lanebridge_core::binding::Binding;
use lanebridge_laneq::LaneQueueConfig;
use lanebridge_streamer::render::RenderConfig;
use lanebridge_streamer::streamer::StreamerConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use cli::Cli;
pub use persist::{JsonFilePersistStore, PersistError, PersistStore, PersistedGroup, PersistedSession, PersistedState};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Read { path: String, #[source] source: std::io::Error },
    #[error("invalid config in {path:?}: {source}")]
    Parse { path: String, #[source] source: toml::de::Error },
}

/// Session-manager tunables (spec §4.3), layered into `GatewayConfig`
/// rather than constructed ad hoc, so they're covered by the same
/// file/env/CLI precedence as everything else.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Default 5 min (spec §3 "EventRecord").
    #[serde(default = "default_dedupe_window_ms")]
    pub dedupe_window_ms: i64,
    /// Default 30 min; used by the sweeper (spec §4.3).
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: i64,
    /// Default 60s (sweeper tick period).
    #[serde(default = "default_sweep_period_secs")]
    pub sweep_period_secs: u64,
}

fn default_dedupe_window_ms() -> i64 {
    5 * 60 * 1000
}
fn default_idle_timeout_ms() -> i64 {
    30 * 60 * 1000
}
fn default_sweep_period_secs() -> u64 {
    60
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            dedupe_window_ms: default_dedupe_window_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
            sweep_period_secs: default_sweep_period_secs(),
        }
    }
}

/// Serde-friendly mirror of [`LaneQueueConfig`] (which carries a
/// `Duration` and has no `Deserialize` impl of its own).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LaneConfig {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_reap_interval_secs")]
    pub reap_interval_secs: u64,
}

fn default_max_concurrency() -> usize {
    10
}
fn default_reap_interval_secs() -> u64 {
    30
}

impl Default for LaneConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            reap_interval_secs: default_reap_interval_secs(),
        }
    }
}

impl From<LaneConfig> for LaneQueueConfig {
    fn from(cfg: LaneConfig) -> Self {
        LaneQueueConfig {
            max_concurrency: cfg.max_concurrency,
            reap_interval: Duration::from_secs(cfg.reap_interval_secs),
        }
    }
}

/// Serde-friendly mirror of [`StreamerConfig`]/[`RenderConfig`] (the
/// latter's `Duration`-free fields serialize directly; kept as a
/// dedicated type here so the top-level TOML schema has a stable shape
/// independent of the streamer crate's internal defaults helper names).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct StreamerSettings {
    #[serde(default)]
    pub throttle_ms: Option<u64>,
    #[serde(default)]
    pub retry_delay_ms: Option<u64>,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl From<StreamerSettings> for StreamerConfig {
    fn from(settings: StreamerSettings) -> Self {
        let defaults = StreamerConfig::default();
        StreamerConfig {
            retry_delay_ms: settings.retry_delay_ms.unwrap_or(defaults.retry_delay_ms),
            max_retries: settings.max_retries.unwrap_or(defaults.max_retries),
            render: RenderConfig::default(),
            ..defaults
        }
        .with_throttle_ms(settings.throttle_ms.unwrap_or(defaults.throttle_ms))
    }
}

/// Top-level configuration (SPEC_FULL §E.1). Loaded from TOML, then
/// layered with `LANEBRIDGE_*` environment overrides, then CLI flags —
/// in that order, matching spec §6 ("environment variables ... override
/// the TOML file; CLI overrides both").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub lane: LaneConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub streamer: StreamerSettings,
    #[serde(default)]
    pub bindings: Vec<Binding>,
    pub default_agent_id: String,
    #[serde(default)]
    pub persist_path: Option<PathBuf>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl GatewayConfig {
    /// `GatewayConfig::from_file` (SPEC_FULL §E.1): fatal on read or parse
    /// failure, matching spec §7 "Invalid config: fatal at startup; no
    /// partial boot."
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read { path: path.to_string(), source })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse { path: path.to_string(), source })
    }

    /// Apply `LANEBRIDGE_*` environment variables over file values (spec
    /// §6), matching the teacher's `TELEGRAM_*` naming convention.
    pub fn from_env_overrides(&mut self) {
        if let Ok(agent_id) = std::env::var("LANEBRIDGE_DEFAULT_AGENT_ID") {
            self.default_agent_id = agent_id;
        }
        if let Ok(log_level) = std::env::var("LANEBRIDGE_LOG_LEVEL") {
            self.log_level = log_level;
        }
        if let Ok(persist_path) = std::env::var("LANEBRIDGE_PERSIST_PATH") {
            self.persist_path = Some(PathBuf::from(persist_path));
        }
        if let Ok(max_concurrency) = std::env::var("LANEBRIDGE_MAX_CONCURRENCY") {
            if let Ok(parsed) = max_concurrency.parse() {
                self.lane.max_concurrency = parsed;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_in_when_toml_omits_sections() {
        let toml_src = r#"default_agent_id = "opencode""#;
        let config: GatewayConfig = toml::from_str(toml_src).unwrap();
        assert_eq!(config.lane.max_concurrency, 10);
        assert_eq!(config.session.dedupe_window_ms, 5 * 60 * 1000);
        assert_eq!(config.log_level, "info");
        assert!(config.bindings.is_empty());
    }

    #[test]
    fn env_overrides_win_over_file_values() {
        let toml_src = r#"
            default_agent_id = "opencode"
            log_level = "warn"
        "#;
        let mut config: GatewayConfig = toml::from_str(toml_src).unwrap();
        std::env::set_var("LANEBRIDGE_LOG_LEVEL", "debug");
        config.from_env_overrides();
        std::env::remove_var("LANEBRIDGE_LOG_LEVEL");
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn from_file_is_fatal_on_missing_path() {
        let err = GatewayConfig::from_file("/nonexistent/gateway.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn from_file_is_fatal_on_malformed_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.toml");
        std::fs::write(&path, "this is not valid toml =====").unwrap();
        let err = GatewayConfig::from_file(path.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
