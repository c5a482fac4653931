// src/routers/compliance.rs
//! The compliance and enforcement worker. Fully decoupled from the billing
//! flow: it walks the active router fleet, audits each device against the
//! expected enforcement policy, repairs what it can, and records a verdict
//! for every router whether or not repair succeeded.

use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::cache::{CacheKeys, RedisClient};
use crate::config::RadiusConfig;
use crate::database::DbPool;
use crate::error::BillingError;
use crate::models::{ComplianceReport, ComplianceStatus, Router, Vendor};
use crate::routers::vendor::{auditor_for, ProvisionContext};

const CYCLE_LOCK_TTL: usize = 600;

#[derive(Debug, Default, Serialize)]
pub struct ComplianceSummary {
    pub checked: usize,
    pub compliant: usize,
    pub repaired: usize,
    pub unsupported: usize,
    pub failed: usize,
}

pub struct ComplianceWorker {
    db_pool: DbPool,
    redis: RedisClient,
    ctx: ProvisionContext,
}

impl ComplianceWorker {
    pub fn new(db_pool: DbPool, redis: RedisClient, radius: &RadiusConfig) -> Self {
        Self {
            db_pool,
            redis,
            ctx: ProvisionContext {
                radius_ip: radius.server_ip.clone(),
                mgmt_ip: None,
                safe_dns: true,
                api_timeout_ms: radius.request_timeout_ms,
            },
        }
    }

    /// One enforcement cycle over the whole fleet. Routers are handled
    /// independently; an unreachable device is recorded and skipped, never
    /// fatal to the batch. Overlapping cycles are prevented by a lock.
    pub async fn enforce_all(&self) -> Result<ComplianceSummary, BillingError> {
        if !self
            .redis
            .setnx_ex(&CacheKeys::compliance_cycle_lock(), "1", CYCLE_LOCK_TTL)
            .await?
        {
            info!("Compliance cycle already running, skipping");
            return Ok(ComplianceSummary::default());
        }

        let result = self.enforce_all_locked().await;

        let _ = self.redis.delete(&CacheKeys::compliance_cycle_lock()).await;
        result
    }

    async fn enforce_all_locked(&self) -> Result<ComplianceSummary, BillingError> {
        let routers = self.fetch_active_routers().await?;
        let mut summary = ComplianceSummary::default();

        for router in &routers {
            summary.checked += 1;
            match self.enforce_router(router).await {
                Ok(report) => match report.overall_status {
                    ComplianceStatus::Compliant => summary.compliant += 1,
                    ComplianceStatus::Unsupported => summary.unsupported += 1,
                    _ => {
                        if report.issues.iter().any(|i| i.starts_with("repaired:")) {
                            summary.repaired += 1;
                        } else {
                            summary.failed += 1;
                        }
                    }
                },
                Err(e) => {
                    summary.failed += 1;
                    error!("Compliance pass failed for router {}: {}", router.name, e);
                }
            }
        }

        info!(
            "Compliance cycle: {} checked, {} compliant, {} repaired, {} unsupported, {} failed",
            summary.checked,
            summary.compliant,
            summary.repaired,
            summary.unsupported,
            summary.failed
        );
        Ok(summary)
    }

    /// Audit one router, attempt repair on a degraded verdict, and persist
    /// the (re-checked) result regardless of outcome.
    pub async fn enforce_router(&self, router: &Router) -> Result<ComplianceReport, BillingError> {
        let auditor = auditor_for(router.vendor);

        let mut report = match &auditor {
            Some(auditor) => {
                let mut report = auditor.audit(router, &self.ctx).await;
                report.client_entry_ok = self.client_table_entry_exists(router).await?;
                if !report.client_entry_ok {
                    report
                        .issues
                        .push("no entry in the authorization server's client table".to_string());
                }
                if report.overall_status != ComplianceStatus::Unsupported {
                    report.aggregate();
                }
                report
            }
            None => ComplianceReport::unsupported(
                router.id,
                router.vendor.as_str(),
                chrono::Utc::now(),
            ),
        };

        let needs_repair = matches!(
            report.overall_status,
            ComplianceStatus::Partial | ComplianceStatus::Broken
        );

        if needs_repair {
            if let Some(auditor) = &auditor {
                match auditor.repair(router, &report, &self.ctx).await {
                    Ok(()) => {
                        // Verify the repair took; the re-check is the verdict
                        let mut rechecked = auditor.audit(router, &self.ctx).await;
                        rechecked.client_entry_ok = report.client_entry_ok;
                        rechecked.aggregate();
                        if rechecked.overall_status == ComplianceStatus::Compliant {
                            rechecked.issues.push("repaired: configuration reapplied".to_string());
                        }
                        report = rechecked;
                    }
                    Err(BillingError::PermissionDenied { target, detail }) => {
                        // Operator problem, not ours to retry
                        warn!(
                            "Repair of {} needs operator attention: {} ({})",
                            router.name, detail, target
                        );
                        report
                            .issues
                            .push(format!("repair blocked, permission denied: {}", detail));
                    }
                    Err(e) => {
                        warn!("Repair of {} failed: {}", router.name, e);
                        report.issues.push(format!("repair failed: {}", e));
                    }
                }
            }
        }

        self.save_report(&report).await?;
        Ok(report)
    }

    pub async fn get_report(
        &self,
        router_id: Uuid,
    ) -> Result<Option<ComplianceReport>, BillingError> {
        let client = self.db_pool.get().await
            .map_err(|e| BillingError::Internal(e.to_string()))?;

        let row = client
            .query_opt(
                "SELECT router_id, auth_ok, accounting_ok, coa_ok, interim_ok,
                        dns_ok, client_entry_ok, overall_status, issues, checked_at
                 FROM router_compliance
                 WHERE router_id = $1",
                &[&router_id],
            )
            .await?;

        Ok(row.map(|r| {
            let issues: serde_json::Value = r.get(8);
            ComplianceReport {
                router_id: r.get(0),
                auth_ok: r.get(1),
                accounting_ok: r.get(2),
                coa_ok: r.get(3),
                interim_ok: r.get(4),
                dns_ok: r.get(5),
                client_entry_ok: r.get(6),
                overall_status: ComplianceStatus::from_str(r.get::<_, &str>(7)),
                issues: serde_json::from_value(issues).unwrap_or_default(),
                checked_at: r.get(9),
            }
        }))
    }

    /// Latest snapshot replaces the previous one; every cycle also appends
    /// to the history table so trends survive repair failures.
    async fn save_report(&self, report: &ComplianceReport) -> Result<(), BillingError> {
        let client = self.db_pool.get().await
            .map_err(|e| BillingError::Internal(e.to_string()))?;

        let issues = serde_json::to_value(&report.issues)
            .map_err(|e| BillingError::Internal(e.to_string()))?;

        client
            .execute(
                "INSERT INTO router_compliance
                 (router_id, auth_ok, accounting_ok, coa_ok, interim_ok, dns_ok,
                  client_entry_ok, overall_status, issues, checked_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                 ON CONFLICT (router_id) DO UPDATE SET
                     auth_ok = EXCLUDED.auth_ok,
                     accounting_ok = EXCLUDED.accounting_ok,
                     coa_ok = EXCLUDED.coa_ok,
                     interim_ok = EXCLUDED.interim_ok,
                     dns_ok = EXCLUDED.dns_ok,
                     client_entry_ok = EXCLUDED.client_entry_ok,
                     overall_status = EXCLUDED.overall_status,
                     issues = EXCLUDED.issues,
                     checked_at = EXCLUDED.checked_at",
                &[
                    &report.router_id,
                    &report.auth_ok,
                    &report.accounting_ok,
                    &report.coa_ok,
                    &report.interim_ok,
                    &report.dns_ok,
                    &report.client_entry_ok,
                    &report.overall_status.as_str(),
                    &issues,
                    &report.checked_at,
                ],
            )
            .await?;

        client
            .execute(
                "INSERT INTO router_compliance_history
                 (router_id, overall_status, issues, checked_at)
                 VALUES ($1, $2, $3, $4)",
                &[
                    &report.router_id,
                    &report.overall_status.as_str(),
                    &issues,
                    &report.checked_at,
                ],
            )
            .await?;

        Ok(())
    }

    async fn client_table_entry_exists(&self, router: &Router) -> Result<bool, BillingError> {
        let client = self.db_pool.get().await
            .map_err(|e| BillingError::Internal(e.to_string()))?;

        let row = client
            .query_one(
                "SELECT COUNT(*) FROM nas WHERE nasname = $1",
                &[&router.ip_address],
            )
            .await?;

        let count: i64 = row.get(0);
        Ok(count > 0)
    }

    async fn fetch_active_routers(&self) -> Result<Vec<Router>, BillingError> {
        let client = self.db_pool.get().await
            .map_err(|e| BillingError::Internal(e.to_string()))?;

        let rows = client
            .query(
                "SELECT id, name, vendor, ip_address, coa_port, shared_secret,
                        api_port, api_username, api_password, status
                 FROM routers
                 WHERE status = 'active'",
                &[],
            )
            .await?;

        Ok(rows
            .iter()
            .map(|r| Router {
                id: r.get(0),
                name: r.get(1),
                vendor: Vendor::from_str(r.get::<_, &str>(2)),
                ip_address: r.get(3),
                coa_port: r.get::<_, i32>(4) as u16,
                shared_secret: r.get(5),
                api_port: r.get::<_, i32>(6) as u16,
                api_username: r.get(7),
                api_password: r.get(8),
                status: r.get(9),
            })
            .collect())
    }
}
