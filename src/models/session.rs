// src/models/session.rs
use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A live PPPoE/hotspot session as reported by NAS accounting. This
/// registry, not the service row, is the ground truth for online state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveSession {
    pub session_id: String,
    pub username: String,
    pub service_id: Uuid,
    pub nas_identifier: String,
    pub nas_ip: String,
    pub nas_port: Option<String>,
    pub framed_ip: Option<String>,
    pub start_time: DateTime<Utc>,
    pub bytes_in: i64,
    pub bytes_out: i64,
}

/// Addressing for CoA / Disconnect fan-out: a customer may hold several
/// simultaneous sessions across different NAS devices.
#[derive(Debug, Clone)]
pub enum SessionTarget {
    Customer(Uuid),
    Username(String),
    Session(String),
}

impl SessionTarget {
    pub fn describe(&self) -> String {
        match self {
            SessionTarget::Customer(id) => format!("customer:{}", id),
            SessionTarget::Username(u) => format!("username:{}", u),
            SessionTarget::Session(s) => format!("session:{}", s),
        }
    }
}

/// Per-session result of a CoA or Disconnect attempt. One unreachable NAS
/// never aborts the rest of the fan-out; callers aggregate these.
#[derive(Debug, Clone, Serialize)]
pub struct SessionPushResult {
    pub session_id: String,
    pub nas: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CoaOutcome {
    pub sessions_updated: usize,
    pub results: Vec<SessionPushResult>,
}

#[derive(Debug, Serialize)]
pub struct DisconnectOutcome {
    pub sessions_disconnected: usize,
    pub results: Vec<SessionPushResult>,
}
