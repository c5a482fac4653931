// src/services/fair_use.rs
//! Fair-use accounting and enforcement. Usage is accumulated per calendar
//! month; crossing the cap applies the throttle profile exactly once, and a
//! cooldown-limited burst can lift it for five minutes at a time.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::cache::{CacheKeys, RedisClient};
use crate::database::DbPool;
use crate::error::BillingError;
use crate::models::{FairUseStatus, SessionTarget};
use crate::radius::attributes::SpeedProfile;
use crate::radius::{CoaChanges, SessionController};

pub const BURST_DURATION_SECS: i64 = 300;

/// Pure cooldown gate: burst is available when the plan allows it and the
/// last activation is at least a full cooldown in the past.
pub fn can_activate_burst(
    burst_enabled: bool,
    last_burst_at: Option<DateTime<Utc>>,
    cooldown_minutes: i32,
    now: DateTime<Utc>,
) -> bool {
    if !burst_enabled {
        return false;
    }
    match last_burst_at {
        None => true,
        Some(last) => now >= last + Duration::minutes(cooldown_minutes as i64),
    }
}

pub struct FairUseEngine {
    db_pool: DbPool,
    redis: RedisClient,
    controller: Arc<SessionController>,
}

struct PlanPolicy {
    customer_id: Uuid,
    cap_gb: Option<Decimal>,
    burst_enabled: bool,
    burst_cooldown_minutes: i32,
    full: SpeedProfile,
    throttled: SpeedProfile,
}

impl FairUseEngine {
    pub fn new(db_pool: DbPool, redis: RedisClient, controller: Arc<SessionController>) -> Self {
        Self {
            db_pool,
            redis,
            controller,
        }
    }

    pub async fn check_status(
        &self,
        customer_id: Uuid,
        service_id: Uuid,
    ) -> Result<FairUseStatus, BillingError> {
        let policy = self.load_policy(service_id).await?;
        if policy.customer_id != customer_id {
            return Err(BillingError::ServiceNotFound);
        }

        let client = self.db_pool.get().await
            .map_err(|e| BillingError::Internal(e.to_string()))?;

        let row = client
            .query_one(
                "INSERT INTO fair_use_tracking (service_id, month, billable_mb)
                 VALUES ($1, to_char(NOW(), 'YYYY-MM'), 0)
                 ON CONFLICT (service_id, month) DO UPDATE SET service_id = EXCLUDED.service_id
                 RETURNING billable_mb, throttled, burst_active_until, last_burst_at",
                &[&service_id],
            )
            .await?;

        let billable_mb: i64 = row.get(0);
        let throttled: bool = row.get(1);
        let burst_active_until: Option<DateTime<Utc>> = row.get(2);
        let last_burst_at: Option<DateTime<Utc>> = row.get(3);

        let used_gb = Decimal::from(billable_mb) / Decimal::from(1024);
        let remaining_gb = policy
            .cap_gb
            .map(|cap| (cap - used_gb).max(Decimal::ZERO));
        let percent_used = policy.cap_gb.and_then(|cap| {
            if cap > Decimal::ZERO {
                Some((used_gb / cap * Decimal::from(100)).min(Decimal::from(100)))
            } else {
                None
            }
        });

        Ok(FairUseStatus {
            used_gb,
            cap_gb: policy.cap_gb,
            remaining_gb,
            percent_used,
            throttled,
            burst_active_until: burst_active_until.filter(|t| *t > Utc::now()),
            burst_available: can_activate_burst(
                policy.burst_enabled,
                last_burst_at,
                policy.burst_cooldown_minutes,
                Utc::now(),
            ),
        })
    }

    /// Fold a metering sample into the month's accumulator and throttle on
    /// the first cap crossing. The guarded UPDATE fires at most once per
    /// month: re-reporting usage on an already-throttled service is a no-op.
    pub async fn record_usage(
        &self,
        service_id: Uuid,
        upload_mb: i64,
        download_mb: i64,
    ) -> Result<(), BillingError> {
        let total_mb = upload_mb + download_mb;
        if total_mb < 0 {
            return Err(BillingError::InvalidRequest(
                "negative usage sample".to_string(),
            ));
        }

        let policy = self.load_policy(service_id).await?;

        let client = self.db_pool.get().await
            .map_err(|e| BillingError::Internal(e.to_string()))?;

        client
            .execute(
                "INSERT INTO fair_use_tracking (service_id, month, billable_mb)
                 VALUES ($1, to_char(NOW(), 'YYYY-MM'), $2)
                 ON CONFLICT (service_id, month)
                 DO UPDATE SET billable_mb = fair_use_tracking.billable_mb + $2,
                               updated_at = NOW()",
                &[&service_id, &total_mb],
            )
            .await?;

        let cap_gb = match policy.cap_gb {
            Some(cap) => cap,
            None => return Ok(()),
        };

        let cap_mb = (cap_gb * Decimal::from(1024)).trunc().to_i64().unwrap_or(i64::MAX);
        let crossed = client
            .execute(
                "UPDATE fair_use_tracking
                 SET limit_reached = true, throttled = true, throttle_applied_at = NOW()
                 WHERE service_id = $1 AND month = to_char(NOW(), 'YYYY-MM')
                 AND limit_reached = false
                 AND billable_mb >= $2",
                &[&service_id, &cap_mb],
            )
            .await?;

        if crossed == 1 {
            info!(
                "Service {} crossed its {}GB fair-use cap, throttling",
                service_id, cap_gb
            );
            let coa = self
                .controller
                .send_coa(
                    &SessionTarget::Customer(policy.customer_id),
                    &CoaChanges {
                        profile: Some(policy.throttled),
                        session_timeout: None,
                    },
                )
                .await?;
            if coa.sessions_updated == 0 && !coa.results.is_empty() {
                warn!(
                    "Throttle CoA reached no session for service {}; profile applies at next authorization",
                    service_id
                );
            }
        }

        Ok(())
    }

    /// Grant a five-minute throttle override. Returns `false` without any
    /// protocol action when burst is disabled or still cooling down.
    pub async fn activate_burst(
        &self,
        customer_id: Uuid,
        service_id: Uuid,
    ) -> Result<bool, BillingError> {
        let policy = self.load_policy(service_id).await?;
        if policy.customer_id != customer_id {
            return Err(BillingError::ServiceNotFound);
        }

        if !policy.burst_enabled {
            return Ok(false);
        }

        let client = self.db_pool.get().await
            .map_err(|e| BillingError::Internal(e.to_string()))?;

        // The cooldown is re-checked inside the guard, so two concurrent
        // requests cannot both win the window.
        let granted = client
            .execute(
                "UPDATE fair_use_tracking
                 SET burst_active_until = NOW() + make_interval(secs => $2),
                     last_burst_at = NOW(),
                     burst_used_count = burst_used_count + 1
                 WHERE service_id = $1 AND month = to_char(NOW(), 'YYYY-MM')
                 AND (last_burst_at IS NULL
                      OR last_burst_at <= NOW() - make_interval(mins => $3))",
                &[
                    &service_id,
                    &(BURST_DURATION_SECS as f64),
                    &policy.burst_cooldown_minutes,
                ],
            )
            .await?;

        if granted == 0 {
            info!(
                "Burst denied for service {}: cooldown still running",
                service_id
            );
            return Ok(false);
        }

        let _ = self
            .redis
            .set(
                &CacheKeys::burst(&service_id),
                "1",
                BURST_DURATION_SECS as usize,
            )
            .await;

        let coa = self
            .controller
            .send_coa(
                &SessionTarget::Customer(customer_id),
                &CoaChanges {
                    profile: Some(policy.full),
                    session_timeout: None,
                },
            )
            .await?;

        info!(
            "Burst granted for service {} ({} sessions lifted)",
            service_id, coa.sessions_updated
        );
        Ok(true)
    }

    /// Background check: elapsed burst windows are closed and throttled
    /// services get their reduced profile re-applied.
    pub async fn expire_bursts(&self) -> Result<usize, BillingError> {
        let client = self.db_pool.get().await
            .map_err(|e| BillingError::Internal(e.to_string()))?;

        let rows = client
            .query(
                "UPDATE fair_use_tracking
                 SET burst_active_until = NULL
                 WHERE burst_active_until IS NOT NULL AND burst_active_until <= NOW()
                 RETURNING service_id, throttled",
                &[],
            )
            .await?;
        drop(client);

        let mut reverted = 0;
        for row in &rows {
            let service_id: Uuid = row.get(0);
            let throttled: bool = row.get(1);
            if !throttled {
                continue;
            }

            match self.load_policy(service_id).await {
                Ok(policy) => {
                    let result = self
                        .controller
                        .send_coa(
                            &SessionTarget::Customer(policy.customer_id),
                            &CoaChanges {
                                profile: Some(policy.throttled),
                                session_timeout: None,
                            },
                        )
                        .await;
                    match result {
                        Ok(_) => reverted += 1,
                        Err(e) => {
                            error!("Burst revert failed for service {}: {}", service_id, e)
                        }
                    }
                }
                Err(e) => error!("Burst revert lookup failed for {}: {}", service_id, e),
            }
        }

        if reverted > 0 {
            info!("Burst expiry check reverted {} services", reverted);
        }
        Ok(reverted)
    }

    async fn load_policy(&self, service_id: Uuid) -> Result<PlanPolicy, BillingError> {
        let client = self.db_pool.get().await
            .map_err(|e| BillingError::Internal(e.to_string()))?;

        let row = client
            .query_opt(
                "SELECT svc.customer_id, p.monthly_cap_gb, p.burst_enabled,
                        p.burst_cooldown_minutes,
                        p.download_mbps, p.upload_mbps,
                        p.throttled_download_mbps, p.throttled_upload_mbps
                 FROM services svc
                 JOIN service_plans p ON p.id = svc.plan_id
                 WHERE svc.id = $1",
                &[&service_id],
            )
            .await?
            .ok_or(BillingError::ServiceNotFound)?;

        Ok(PlanPolicy {
            customer_id: row.get(0),
            cap_gb: row.get(1),
            burst_enabled: row.get(2),
            burst_cooldown_minutes: row.get(3),
            full: SpeedProfile::flat(row.get(4), row.get(5)),
            throttled: SpeedProfile::flat(row.get(6), row.get(7)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_disabled_never_available() {
        assert!(!can_activate_burst(false, None, 60, Utc::now()));
    }

    #[test]
    fn test_first_burst_always_available() {
        assert!(can_activate_burst(true, None, 60, Utc::now()));
    }

    #[test]
    fn test_burst_within_cooldown_denied_then_allowed() {
        let now = Utc::now();
        let last = now - Duration::minutes(3);

        // Second request three minutes into a 60-minute cooldown: denied
        assert!(!can_activate_burst(true, Some(last), 60, now));

        // Requested again after the cooldown has fully elapsed: allowed
        let later = last + Duration::minutes(60);
        assert!(can_activate_burst(true, Some(last), 60, later));
    }

    #[test]
    fn test_cooldown_boundary_is_inclusive() {
        let now = Utc::now();
        let last = now - Duration::minutes(30);
        assert!(can_activate_burst(true, Some(last), 30, now));
    }
}
