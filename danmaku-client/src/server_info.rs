//! ## SERVER-INFO PROVIDER (C3)
//!
//! Produces the endpoint and authentication token for a room. The real
//! HTTP-backed resolver (calling Bilibili's room-init API) is an upper-layer
//! concern — out of scope here, same as the spec's framing around a
//! "dependency-injection/bootstrap layer" (§1). This module only owns the
//! trait and a fixed-value implementation used by tests and by callers who
//! already hold an endpoint/token pair.

use async_trait::async_trait;

use crate::error::{DanmakuError, Result};

/// Endpoint and credential bundle for joining a room.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub host: String,
    pub port: u16,
    pub token: String,
    /// Viewer id to present as `uid` in the join-room payload. `0` is the
    /// anonymous-viewer sentinel the real room-init API hands back to
    /// unauthenticated callers.
    pub user_id: u64,
}

/// Resolves connection credentials for a room. The connection core treats
/// this as opaque (§4.3); any failure surfaces as [`DanmakuError::CredentialUnavailable`].
#[async_trait]
pub trait ServerInfoProvider: Send + Sync {
    async fn resolve(&self, room_id: u64) -> Result<ServerInfo>;
}

/// A provider that always returns the same, pre-resolved [`ServerInfo`].
///
/// Useful for tests and for embedders that already performed endpoint
/// discovery out of band.
pub struct StaticServerInfo {
    info: ServerInfo,
}

impl StaticServerInfo {
    pub fn new(host: impl Into<String>, port: u16, token: impl Into<String>, user_id: u64) -> Self {
        Self {
            info: ServerInfo {
                host: host.into(),
                port,
                token: token.into(),
                user_id,
            },
        }
    }
}

#[async_trait]
impl ServerInfoProvider for StaticServerInfo {
    async fn resolve(&self, _room_id: u64) -> Result<ServerInfo> {
        Ok(self.info.clone())
    }
}

/// A provider that always fails — useful for exercising the
/// `CredentialUnavailable` path in tests.
pub struct UnavailableServerInfo;

#[async_trait]
impl ServerInfoProvider for UnavailableServerInfo {
    async fn resolve(&self, _room_id: u64) -> Result<ServerInfo> {
        Err(DanmakuError::CredentialUnavailable)
    }
}
