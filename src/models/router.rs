// src/models/router.rs
use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Router {
    pub id: Uuid,
    pub name: String,
    pub vendor: Vendor,
    pub ip_address: String,
    pub coa_port: u16,
    pub shared_secret: String,
    pub api_port: u16,
    pub api_username: String,
    pub api_password: String,
    pub status: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    Mikrotik,
    Ubiquiti,
    Juniper,
    Unknown,
}

impl Vendor {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "mikrotik" => Vendor::Mikrotik,
            "ubiquiti" => Vendor::Ubiquiti,
            "juniper" => Vendor::Juniper,
            _ => Vendor::Unknown,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Vendor::Mikrotik => "mikrotik",
            Vendor::Ubiquiti => "ubiquiti",
            Vendor::Juniper => "juniper",
            Vendor::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ComplianceStatus {
    Compliant,
    Partial,
    Broken,
    Unsupported,
}

impl ComplianceStatus {
    pub fn as_str(&self) -> &str {
        match self {
            ComplianceStatus::Compliant => "compliant",
            ComplianceStatus::Partial => "partial",
            ComplianceStatus::Broken => "broken",
            ComplianceStatus::Unsupported => "unsupported",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "compliant" => ComplianceStatus::Compliant,
            "partial" => ComplianceStatus::Partial,
            "unsupported" => ComplianceStatus::Unsupported,
            _ => ComplianceStatus::Broken,
        }
    }
}

/// One audit cycle's verdict for a router. The latest snapshot replaces the
/// previous one; history rows are kept append-only for trend analysis.
#[derive(Debug, Clone, Serialize)]
pub struct ComplianceReport {
    pub router_id: Uuid,
    pub auth_ok: bool,
    pub accounting_ok: bool,
    pub coa_ok: bool,
    pub interim_ok: bool,
    pub dns_ok: bool,
    pub client_entry_ok: bool,
    pub overall_status: ComplianceStatus,
    pub issues: Vec<String>,
    pub checked_at: DateTime<Utc>,
}

impl ComplianceReport {
    /// Aggregate the per-check flags. The authentication path is the
    /// critical check: without it no customer can connect at all.
    pub fn aggregate(&mut self) {
        let checks = [
            self.auth_ok,
            self.accounting_ok,
            self.coa_ok,
            self.interim_ok,
            self.dns_ok,
            self.client_entry_ok,
        ];
        let passed = checks.iter().filter(|c| **c).count();

        self.overall_status = if passed == checks.len() {
            ComplianceStatus::Compliant
        } else if !self.auth_ok {
            ComplianceStatus::Broken
        } else {
            ComplianceStatus::Partial
        };
    }

    pub fn unsupported(router_id: Uuid, vendor: &str, now: DateTime<Utc>) -> Self {
        ComplianceReport {
            router_id,
            auth_ok: false,
            accounting_ok: false,
            coa_ok: false,
            interim_ok: false,
            dns_ok: false,
            client_entry_ok: false,
            overall_status: ComplianceStatus::Unsupported,
            issues: vec![format!("vendor '{}' has no audit implementation", vendor)],
            checked_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(flags: [bool; 6]) -> ComplianceReport {
        let mut r = ComplianceReport {
            router_id: Uuid::new_v4(),
            auth_ok: flags[0],
            accounting_ok: flags[1],
            coa_ok: flags[2],
            interim_ok: flags[3],
            dns_ok: flags[4],
            client_entry_ok: flags[5],
            overall_status: ComplianceStatus::Broken,
            issues: Vec::new(),
            checked_at: Utc::now(),
        };
        r.aggregate();
        r
    }

    #[test]
    fn test_all_pass_is_compliant() {
        assert_eq!(report([true; 6]).overall_status, ComplianceStatus::Compliant);
    }

    #[test]
    fn test_no_auth_path_is_broken() {
        assert_eq!(
            report([false, true, true, true, true, true]).overall_status,
            ComplianceStatus::Broken
        );
    }

    #[test]
    fn test_partial() {
        assert_eq!(
            report([true, true, false, true, false, true]).overall_status,
            ComplianceStatus::Partial
        );
    }

    #[test]
    fn test_aggregate_is_deterministic() {
        let a = report([true, true, false, true, true, true]);
        let b = report([true, true, false, true, true, true]);
        assert_eq!(a.overall_status, b.overall_status);
    }
}
