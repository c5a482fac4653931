// src/routers/mikrotik.rs
//! MikroTik RouterOS audit and repair over the binary API.

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use crate::error::BillingError;
use crate::models::{ComplianceReport, ComplianceStatus, Router};
use crate::routers::mikrotik_api::RouterOsClient;
use crate::routers::vendor::{ProvisionContext, RouterAudit};

pub struct MikrotikAudit;

impl MikrotikAudit {
    async fn connect(
        &self,
        router: &Router,
        ctx: &ProvisionContext,
    ) -> Result<RouterOsClient, BillingError> {
        RouterOsClient::connect(
            &router.ip_address,
            router.api_port,
            &router.api_username,
            &router.api_password,
            ctx.api_timeout_ms,
        )
        .await
    }
}

#[async_trait]
impl RouterAudit for MikrotikAudit {
    async fn audit(&self, router: &Router, ctx: &ProvisionContext) -> ComplianceReport {
        let mut report = ComplianceReport {
            router_id: router.id,
            auth_ok: false,
            accounting_ok: false,
            coa_ok: false,
            interim_ok: false,
            dns_ok: false,
            client_entry_ok: false,
            overall_status: ComplianceStatus::Broken,
            issues: Vec::new(),
            checked_at: Utc::now(),
        };

        let mut api = match self.connect(router, ctx).await {
            Ok(api) => api,
            Err(e) => {
                report.issues.push(format!("connection error: {}", e));
                report.aggregate();
                return report;
            }
        };

        // Authentication pointed at our RADIUS server, with PPP accounting
        match api.run("/radius/print", &[]).await {
            Ok(entries) => {
                let ours = entries
                    .iter()
                    .find(|e| e.get("address").map(String::as_str) == Some(ctx.radius_ip.as_str()));
                match ours {
                    Some(entry) => {
                        report.auth_ok = true;
                        if entry
                            .get("service")
                            .map(|s| s.contains("ppp"))
                            .unwrap_or(false)
                        {
                            report.accounting_ok = true;
                        } else {
                            report.issues.push("RADIUS entry lacks ppp service".to_string());
                        }
                    }
                    None => report.issues.push("RADIUS server not configured".to_string()),
                }
            }
            Err(e) => report.issues.push(format!("/radius/print failed: {}", e)),
        }

        // Incoming CoA port open
        match api.run("/radius/incoming/print", &[]).await {
            Ok(entries) => {
                if entries
                    .first()
                    .and_then(|e| e.get("accept"))
                    .map(|v| v == "yes" || v == "true")
                    .unwrap_or(false)
                {
                    report.coa_ok = true;
                } else {
                    report
                        .issues
                        .push("CoA (RADIUS incoming) not enabled".to_string());
                }
            }
            Err(e) => report
                .issues
                .push(format!("/radius/incoming/print failed: {}", e)),
        }

        // AAA uses RADIUS with interim updates
        match api.run("/ppp/aaa/print", &[]).await {
            Ok(entries) => {
                let aaa = entries.first();
                let use_radius = aaa
                    .and_then(|e| e.get("use-radius"))
                    .map(|v| v == "yes" || v == "true")
                    .unwrap_or(false);
                let interim = aaa
                    .and_then(|e| e.get("interim-update"))
                    .map(|v| !v.is_empty() && v != "0s")
                    .unwrap_or(false);
                if use_radius && interim {
                    report.interim_ok = true;
                } else {
                    if !use_radius {
                        report.issues.push("PPP AAA not using RADIUS".to_string());
                    }
                    if !interim {
                        report
                            .issues
                            .push("interim-update interval not configured".to_string());
                    }
                }
            }
            Err(e) => report.issues.push(format!("/ppp/aaa/print failed: {}", e)),
        }

        // DNS safety policy applied
        match api.run("/ip/dns/print", &[]).await {
            Ok(entries) => {
                if entries
                    .first()
                    .and_then(|e| e.get("servers"))
                    .map(|v| !v.is_empty())
                    .unwrap_or(false)
                {
                    report.dns_ok = true;
                } else {
                    report.issues.push("DNS not configured".to_string());
                }
            }
            Err(e) => report.issues.push(format!("/ip/dns/print failed: {}", e)),
        }

        report.aggregate();
        report
    }

    async fn repair(
        &self,
        router: &Router,
        report: &ComplianceReport,
        ctx: &ProvisionContext,
    ) -> Result<(), BillingError> {
        let mut api = self.connect(router, ctx).await?;

        if !report.auth_ok || !report.accounting_ok {
            api.run(
                "/radius/add",
                &[
                    ("address", ctx.radius_ip.as_str()),
                    ("secret", router.shared_secret.as_str()),
                    ("service", "ppp,hotspot"),
                    ("authentication-port", "1812"),
                    ("accounting-port", "1813"),
                    ("timeout", "300ms"),
                ],
            )
            .await?;
            info!("Repair {}: RADIUS entry added", router.name);
        }

        if !report.coa_ok {
            api.run(
                "/radius/incoming/set",
                &[("accept", "yes"), ("port", "3799")],
            )
            .await?;
            info!("Repair {}: CoA port opened", router.name);
        }

        if !report.interim_ok {
            api.run(
                "/ppp/aaa/set",
                &[
                    ("use-radius", "yes"),
                    ("accounting", "yes"),
                    ("interim-update", "1m"),
                ],
            )
            .await?;
            info!("Repair {}: AAA interim updates enabled", router.name);
        }

        if !report.dns_ok {
            api.run("/ip/dns/set", &[("servers", ctx.dns_servers())])
                .await?;
            info!("Repair {}: DNS servers set", router.name);
        }

        if !report.client_entry_ok {
            // Server-side fix, not a router command; flagged for the worker
            warn!(
                "Repair {}: missing client-table entry must be fixed on the RADIUS server",
                router.name
            );
        }

        Ok(())
    }

    fn provision_script(&self, router: &Router, ctx: &ProvisionContext) -> String {
        let mgmt = ctx.mgmt_ip.as_deref().unwrap_or("0.0.0.0");
        format!(
            r#"# ================= ISP AUTO PROVISION =================

# --- RADIUS ---
/radius remove [find]
/radius add address={radius_ip} secret={secret} service=ppp,hotspot \
    authentication-port=1812 accounting-port=1813 timeout=300ms

/radius incoming set accept=yes port=3799

# --- AAA ---
/ppp aaa set use-radius=yes accounting=yes interim-update=1m

# --- DNS ---
/ip dns set servers={dns} allow-remote-requests=yes

# --- FIREWALL (INPUT) ---
/ip firewall filter add chain=input connection-state=established,related \
    action=accept comment="ISP_MANAGED:STATE"

/ip firewall filter add chain=input protocol=udp dst-port=1812,1813 \
    src-address={radius_ip} action=accept comment="ISP_MANAGED:RADIUS"

/ip firewall filter add chain=input protocol=udp dst-port=3799 \
    src-address={radius_ip} action=accept comment="ISP_MANAGED:COA"

/ip firewall filter add chain=input protocol=tcp dst-port=22,8728,443 \
    src-address={mgmt} action=accept comment="ISP_MANAGED:MGMT"

/ip firewall filter add chain=input action=drop comment="ISP_MANAGED:DROP"

# --- SECURITY HARDENING ---
/ip service set telnet disabled=yes
/ip service set ftp disabled=yes
/ip service set www disabled=yes
/ip service set api address={mgmt}
/ip service set ssh address={mgmt}

# ================= END =================
"#,
            radius_ip = ctx.radius_ip,
            secret = router.shared_secret,
            dns = ctx.dns_servers(),
            mgmt = mgmt,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Vendor;
    use uuid::Uuid;

    fn router() -> Router {
        Router {
            id: Uuid::new_v4(),
            name: "core-1".to_string(),
            vendor: Vendor::Mikrotik,
            ip_address: "10.0.0.1".to_string(),
            coa_port: 3799,
            shared_secret: "nas-secret".to_string(),
            api_port: 8728,
            api_username: "api".to_string(),
            api_password: "x".to_string(),
            status: "active".to_string(),
        }
    }

    #[test]
    fn test_provision_script_is_idempotent_shape() {
        let ctx = ProvisionContext {
            radius_ip: "10.0.0.2".to_string(),
            mgmt_ip: Some("10.0.0.10".to_string()),
            safe_dns: true,
            api_timeout_ms: 5000,
        };
        let script = MikrotikAudit.provision_script(&router(), &ctx);

        // The remove-then-add form makes a second application converge to
        // the same end state
        assert!(script.contains("/radius remove [find]"));
        assert!(script.contains("address=10.0.0.2 secret=nas-secret"));
        assert!(script.contains("incoming set accept=yes port=3799"));
        assert!(script.contains("servers=1.1.1.3,1.0.0.3"));
        assert!(script.contains("src-address=10.0.0.10"));
    }
}
