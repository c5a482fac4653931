// src/routers/juniper.rs
//! Juniper BRAS support: provisioning script generation only, mirroring the
//! Ubiquiti situation.

use async_trait::async_trait;
use chrono::Utc;

use crate::error::BillingError;
use crate::models::{ComplianceReport, Router};
use crate::routers::vendor::{ProvisionContext, RouterAudit};

pub struct JuniperAudit;

#[async_trait]
impl RouterAudit for JuniperAudit {
    async fn audit(&self, router: &Router, _ctx: &ProvisionContext) -> ComplianceReport {
        let mut report = ComplianceReport::unsupported(router.id, "juniper", Utc::now());
        report.issues.push(
            "Junos configuration audit not implemented; apply the provisioning script manually"
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
            "automated repair is not supported for juniper router {}",
            router.name
        )))
    }

    fn provision_script(&self, router: &Router, ctx: &ProvisionContext) -> String {
        format!(
            r#"set access profile ISP radius-server {radius_ip} secret {secret}
set access profile ISP authentication-order radius
set access profile ISP accounting-order radius
set access profile ISP radius-server {radius_ip} port 1812
set access profile ISP radius-server {radius_ip} accounting-port 1813
set access profile ISP accounting update-interval 1

set system name-server {dns_primary}

commit
"#,
            radius_ip = ctx.radius_ip,
            secret = router.shared_secret,
            dns_primary = ctx.dns_servers().split(',').next().unwrap_or("8.8.8.8"),
        )
    }
}
