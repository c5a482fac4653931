// src/routers/vendor.rs
//! The audit/repair/provision contract every supported NAS vendor
//! implements, selected by the vendor tag on the router record.

use async_trait::async_trait;

use crate::error::BillingError;
use crate::models::{ComplianceReport, Router, Vendor};
use crate::routers::juniper::JuniperAudit;
use crate::routers::mikrotik::MikrotikAudit;
use crate::routers::ubiquiti::UbiquitiAudit;

/// Site-wide facts the vendor implementations need: where the authorization
/// server lives and how hardened the generated configuration should be.
#[derive(Debug, Clone)]
pub struct ProvisionContext {
    pub radius_ip: String,
    pub mgmt_ip: Option<String>,
    pub safe_dns: bool,
    pub api_timeout_ms: u64,
}

impl ProvisionContext {
    pub fn dns_servers(&self) -> &'static str {
        if self.safe_dns {
            "1.1.1.3,1.0.0.3"
        } else {
            "8.8.8.8,8.8.4.4"
        }
    }
}

#[async_trait]
pub trait RouterAudit: Send + Sync {
    /// Inspect the router's live configuration against the expected
    /// enforcement policy. Unreachable devices yield an all-failed report,
    /// never an error: the verdict is the data.
    async fn audit(&self, router: &Router, ctx: &ProvisionContext) -> ComplianceReport;

    /// Re-apply the expected configuration. Idempotent: repairing a healthy
    /// router changes nothing.
    async fn repair(
        &self,
        router: &Router,
        report: &ComplianceReport,
        ctx: &ProvisionContext,
    ) -> Result<(), BillingError>;

    /// Full provisioning script for operator use and first-time setup.
    fn provision_script(&self, router: &Router, ctx: &ProvisionContext) -> String;
}

/// Closed set: one implementation per declared vendor tag. Unknown vendors
/// get `None` and are reported as unsupported rather than failing the batch.
pub fn auditor_for(vendor: Vendor) -> Option<Box<dyn RouterAudit>> {
    match vendor {
        Vendor::Mikrotik => Some(Box::new(MikrotikAudit)),
        Vendor::Ubiquiti => Some(Box::new(UbiquitiAudit)),
        Vendor::Juniper => Some(Box::new(JuniperAudit)),
        Vendor::Unknown => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_declared_vendor_has_an_auditor() {
        for vendor in [Vendor::Mikrotik, Vendor::Ubiquiti, Vendor::Juniper] {
            assert!(auditor_for(vendor).is_some());
        }
        assert!(auditor_for(Vendor::Unknown).is_none());
    }

    #[test]
    fn test_safe_dns_selection() {
        let mut ctx = ProvisionContext {
            radius_ip: "10.0.0.2".to_string(),
            mgmt_ip: None,
            safe_dns: true,
            api_timeout_ms: 5000,
        };
        assert_eq!(ctx.dns_servers(), "1.1.1.3,1.0.0.3");
        ctx.safe_dns = false;
        assert_eq!(ctx.dns_servers(), "8.8.8.8,8.8.4.4");
    }
}
