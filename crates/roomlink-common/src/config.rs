//! Configuration loaded from defaults, an optional config file, and the environment.
//!
//! Precedence: env vars > .env file > roomlink.toml > defaults.
//!
//! The loaded [`AppConfig`] is returned to the caller and passed down explicitly;
//! there is no process-wide instance.

use std::time::Duration;

use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError};
use serde::Deserialize;

/// Load configuration from `roomlink.toml` (if present) and `ROOMLINK__*` env vars.
pub fn load() -> Result<AppConfig, ConfigError> {
    load_from("roomlink")
}

/// Same as [`load`] with a custom config file name (extension optional).
pub fn load_from(file: &str) -> Result<AppConfig, ConfigError> {
    // Load .env file if present (development)
    let _ = dotenvy::dotenv();

    defaults()?
        .add_source(config::File::with_name(file).required(false))
        // ROOMLINK__ENGINE__MAX_RETRIES, ROOMLINK__PROBE__SERVER_URL, etc.
        .add_source(
            config::Environment::with_prefix("ROOMLINK")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()
}

fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let engine = EngineConfig::default();
    let signal = SignalConfig::default();
    config::Config::builder()
        .set_default("engine.max_retries", i64::from(engine.max_retries))?
        .set_default("engine.queue_capacity", engine.queue_capacity as i64)?
        .set_default("engine.publish_interval_ms", engine.publish_interval_ms as i64)?
        .set_default("engine.max_ice_servers", engine.max_ice_servers as i64)?
        .set_default("engine.shutdown_grace_ms", engine.shutdown_grace_ms as i64)?
        .set_default("engine.audio_track_name", engine.audio_track_name)?
        .set_default("engine.video_track_name", engine.video_track_name)?
        .set_default("signal.connect_timeout_ms", signal.connect_timeout_ms as i64)?
        .set_default("signal.close_timeout_ms", signal.close_timeout_ms as i64)?
        .set_default("probe.server_url", "")?
        .set_default("probe.token", "")
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub signal: SignalConfig,
    pub probe: ProbeConfig,
}

/// Connection engine tuning.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Backoff cycles allowed before giving up with `MaxRetries`.
    pub max_retries: u16,
    /// Capacity of the engine event queue (both priority lanes together).
    pub queue_capacity: usize,
    /// Sleep between media publish loop iterations.
    pub publish_interval_ms: u64,
    /// ICE server URLs taken from a join response; the rest are ignored.
    pub max_ice_servers: usize,
    /// How long shutdown waits for the worker before aborting it.
    pub shutdown_grace_ms: u64,
    pub audio_track_name: String,
    pub video_track_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: 7,
            queue_capacity: 32,
            publish_interval_ms: 20,
            max_ice_servers: 8,
            shutdown_grace_ms: 100,
            audio_track_name: "microphone".into(),
            video_track_name: "camera".into(),
        }
    }
}

impl EngineConfig {
    pub fn publish_interval(&self) -> Duration {
        Duration::from_millis(self.publish_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// WebSocket transport settings for the signal channel.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct SignalConfig {
    /// Upper bound on the WebSocket handshake.
    pub connect_timeout_ms: u64,
    /// Upper bound on the closing handshake.
    pub close_timeout_ms: u64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            close_timeout_ms: 250,
        }
    }
}

impl SignalConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}

/// Target for the `roomlink-probe` binary.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ProbeConfig {
    /// `ws://` or `wss://` server URL; empty when unset.
    pub server_url: String,
    pub token: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_deserialize() {
        let cfg: AppConfig = defaults().unwrap().build().unwrap().try_deserialize().unwrap();
        assert_eq!(cfg.engine, EngineConfig::default());
        assert_eq!(cfg.signal, SignalConfig::default());
        assert!(cfg.probe.server_url.is_empty());
    }

    #[test]
    fn file_values_override_defaults() {
        let toml = r#"
            [engine]
            max_retries = 3
            publish_interval_ms = 40
        "#;
        let cfg: AppConfig = defaults()
            .unwrap()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(cfg.engine.max_retries, 3);
        assert_eq!(cfg.engine.publish_interval(), Duration::from_millis(40));
        assert_eq!(cfg.engine.queue_capacity, 32);
    }
}
