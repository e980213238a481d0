//! Error types shared by every component of the client.

use std::time::Duration;

/// Errors surfaced by the frame codec, transport, and connection core.
#[derive(Debug, thiserror::Error)]
pub enum DanmakuError {
    #[error("connect called while connection is not Idle")]
    InvalidState,

    #[error("connection has been disposed")]
    Disposed,

    #[error("server-info provider could not resolve credentials for the room")]
    CredentialUnavailable,

    #[error("transport closed")]
    TransportClosed,

    #[error("i/o error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("frame body of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },

    #[error("heartbeat send took longer than the {0:?} interval")]
    HeartbeatOverrun(Duration),

    #[error("no connect-ack received within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("operation cancelled")]
    Cancelled,

    #[error("decode error: {0}")]
    DecodeError(String),
}

pub type Result<T> = std::result::Result<T, DanmakuError>;

/// Errors raised while building a [`crate::config::Config`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("heartbeat_interval must be greater than zero")]
    ZeroHeartbeatInterval,

    #[error("protocol_version {0} is not one of 0, 1, 2, 3")]
    UnsupportedProtocolVersion(u16),

    #[error("failed to parse config file {path}: {source}")]
    TomlParse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}
