// src/routers/ubiquiti.rs
//! Ubiquiti EdgeOS support: full provisioning script generation; live
//! configuration introspection has no API counterpart yet, so audits report
//! unsupported rather than guessing.

use async_trait::async_trait;
use chrono::Utc;

use crate::error::BillingError;
use crate::models::{ComplianceReport, Router};
use crate::routers::vendor::{ProvisionContext, RouterAudit};

pub struct UbiquitiAudit;

#[async_trait]
impl RouterAudit for UbiquitiAudit {
    async fn audit(&self, router: &Router, _ctx: &ProvisionContext) -> ComplianceReport {
        let mut report = ComplianceReport::unsupported(router.id, "ubiquiti", Utc::now());
        report.issues.push(
            "EdgeOS configuration audit not implemented; apply the provisioning script manually"
                .to_string(),
        );
        report
    }

    async fn repair(
        &self,
        router: &Router,
        _report: &ComplianceReport,
        _ctx: &ProvisionContext,
    ) -> Result<(), BillingError> {
        Err(BillingError::InvalidRequest(format!(
            "automated repair is not supported for ubiquiti router {}",
            router.name
        )))
    }

    fn provision_script(&self, router: &Router, ctx: &ProvisionContext) -> String {
        format!(
            r#"configure

set system ntp server pool.ntp.org

set service radius-server host {radius_ip} key {secret}
set service radius-server authentication-port 1812
set service radius-server accounting-port 1813

set system name-server {dns_primary}

set firewall name ISP-IN rule 10 action accept
set firewall name ISP-IN rule 10 protocol udp
set firewall name ISP-IN rule 10 destination port 1812,1813
set firewall name ISP-IN rule 10 source address {radius_ip}

set firewall name ISP-IN rule 20 action accept
set firewall name ISP-IN rule 20 protocol udp
set firewall name ISP-IN rule 20 destination port 3799
set firewall name ISP-IN rule 20 source address {radius_ip}

commit
save
"#,
            radius_ip = ctx.radius_ip,
            secret = router.shared_secret,
            dns_primary = ctx.dns_servers().split(',').next().unwrap_or("8.8.8.8"),
        )
    }
}
