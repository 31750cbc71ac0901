use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One remote assistance engagement, from start to stop. Owned exclusively
/// by the session manager for its lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub backend_name: String,
    pub notify_user: bool,
    pub proxy_port: u16,
    pub internal_port: Option<u16>,
    pub created_at: DateTime<Utc>,
    pub phase: SessionPhase,
    /// True when the proxy could not bind and the session continues without
    /// remote viewing.
    pub degraded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionPhase {
    Idle,
    Configuring,
    CredentialSet,
    BackendStarting,
    ProxyListening,
    Stopping,
}
