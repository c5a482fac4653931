// src/models/service.rs
use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub plan_id: Uuid,
    pub status: ServiceStatus,
    pub entitlement_expiry: Option<DateTime<Utc>>,
    pub username: String,
    pub router_id: Option<Uuid>,
    pub is_online: bool,
    pub last_session_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Pending,
    Active,
    Suspended,
    Terminated,
}

impl ServiceStatus {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pending" => ServiceStatus::Pending,
            "active" => ServiceStatus::Active,
            "suspended" => ServiceStatus::Suspended,
            "terminated" => ServiceStatus::Terminated,
            _ => ServiceStatus::Pending,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ServiceStatus::Pending => "pending",
            ServiceStatus::Active => "active",
            ServiceStatus::Suspended => "suspended",
            ServiceStatus::Terminated => "terminated",
        }
    }

    /// Statuses eligible to receive entitlement from the allocation engine.
    pub fn is_allocatable(&self) -> bool {
        matches!(
            self,
            ServiceStatus::Pending | ServiceStatus::Active | ServiceStatus::Suspended
        )
    }
}

impl Service {
    pub fn is_entitled(&self, now: DateTime<Utc>) -> bool {
        match self.entitlement_expiry {
            Some(expiry) => expiry > now,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for s in ["pending", "active", "suspended", "terminated"] {
            assert_eq!(ServiceStatus::from_str(s).as_str(), s);
        }
    }

    #[test]
    fn test_terminated_not_allocatable() {
        assert!(!ServiceStatus::Terminated.is_allocatable());
        assert!(ServiceStatus::Suspended.is_allocatable());
    }
}
