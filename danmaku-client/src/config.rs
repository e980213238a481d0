//! ## CONFIGURATION (C7)
//!
//! Layered the same way the teacher's daemon config loads: environment
//! variables override a TOML file, which overrides built-in defaults.
//! Invalid values are rejected here, at construction, rather than
//! discovered later at connect time.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::{error, warn};

use crate::error::ConfigError;

const DEFAULT_HEARTBEAT_SECS: u64 = 30;
const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 10;
const DEFAULT_PROTOCOL_VERSION: u16 = 2;

/// `{data_dir}/danmaku.toml` — all fields optional overrides.
#[derive(Deserialize, Default)]
struct TomlConfig {
    heartbeat_interval_secs: Option<u64>,
    handshake_timeout_secs: Option<u64>,
    protocol_version: Option<u16>,
    max_body_len: Option<usize>,
}

fn load_toml(data_dir: &Path) -> std::result::Result<Option<TomlConfig>, ConfigError> {
    let path = data_dir.join("danmaku.toml");
    let contents = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(_) => return Ok(None),
    };
    toml::from_str::<TomlConfig>(&contents)
        .map(Some)
        .map_err(|source| {
            error!(path = %path.display(), err = %source, "failed to parse danmaku.toml");
            ConfigError::TomlParse {
                path: path.display().to_string(),
                source,
            }
        })
}

/// Connection-tuning options (§4.7). Constructed once per [`crate::connection::Connection`].
#[derive(Debug, Clone, Copy)]
pub struct Config {
    pub room_id: u64,
    pub heartbeat_interval: Duration,
    /// `None` disables the handshake deadline — the historical, unbounded
    /// behavior (§4.4.7 / Open Question).
    pub handshake_timeout: Option<Duration>,
    pub protocol_version: u16,
    /// Wire cap on body length; may be lowered for defense-in-depth but
    /// never raised past [`crate::frame::DEFAULT_MAX_BODY_LEN`].
    pub max_body_len: usize,
}

impl Config {
    /// Build config for `room_id` from CLI/env args plus an optional TOML
    /// file under `data_dir`.
    ///
    /// Priority (highest to lowest): env vars -> TOML file -> defaults.
    pub fn new(room_id: u64, data_dir: Option<&Path>) -> std::result::Result<Self, ConfigError> {
        let toml = match data_dir {
            Some(dir) => load_toml(dir)?.unwrap_or_default(),
            None => TomlConfig::default(),
        };

        let heartbeat_secs = std::env::var("DANMAKU_HEARTBEAT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .or(toml.heartbeat_interval_secs)
            .unwrap_or(DEFAULT_HEARTBEAT_SECS);

        let handshake_timeout_secs = std::env::var("DANMAKU_HANDSHAKE_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .or(toml.handshake_timeout_secs)
            .unwrap_or(DEFAULT_HANDSHAKE_TIMEOUT_SECS);

        let protocol_version = std::env::var("DANMAKU_PROTOCOL_VERSION")
            .ok()
            .and_then(|v| v.parse().ok())
            .or(toml.protocol_version)
            .unwrap_or(DEFAULT_PROTOCOL_VERSION);

        let max_body_len = toml
            .max_body_len
            .unwrap_or(crate::frame::DEFAULT_MAX_BODY_LEN)
            .min(crate::frame::DEFAULT_MAX_BODY_LEN);

        if heartbeat_secs == 0 {
            return Err(ConfigError::ZeroHeartbeatInterval);
        }
        if !matches!(protocol_version, 0 | 1 | 2 | 3) {
            return Err(ConfigError::UnsupportedProtocolVersion(protocol_version));
        }

        if protocol_version == 3 {
            warn!("protocol_version 3 (brotli) is wire-compatible only — sub-frames will not be decompressed");
        }

        Ok(Self {
            room_id,
            heartbeat_interval: Duration::from_secs(heartbeat_secs),
            handshake_timeout: Some(Duration::from_secs(handshake_timeout_secs))
                .filter(|_| handshake_timeout_secs > 0),
            protocol_version,
            max_body_len,
        })
    }

    /// Build config directly from values, bypassing env/TOML layering —
    /// the path tests and embedders use.
    pub fn from_parts(
        room_id: u64,
        heartbeat_interval: Duration,
        handshake_timeout: Option<Duration>,
        protocol_version: u16,
    ) -> std::result::Result<Self, ConfigError> {
        if heartbeat_interval.is_zero() {
            return Err(ConfigError::ZeroHeartbeatInterval);
        }
        if !matches!(protocol_version, 0 | 1 | 2 | 3) {
            return Err(ConfigError::UnsupportedProtocolVersion(protocol_version));
        }
        Ok(Self {
            room_id,
            heartbeat_interval,
            handshake_timeout,
            protocol_version,
            max_body_len: crate::frame::DEFAULT_MAX_BODY_LEN,
        })
    }
}
