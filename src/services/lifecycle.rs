// src/services/lifecycle.rs
//! The service state machine. Every transition is a compare-and-swap on the
//! current status; a precondition that no longer holds is a no-op, never an
//! error, which is what makes concurrent sweeps safe.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::database::DbPool;
use crate::error::BillingError;
use crate::models::{ServiceStatus, SessionTarget};
use crate::radius::attributes::SpeedProfile;
use crate::radius::{CoaChanges, RadiusProvisioner, SessionController};
use crate::services::allocation::AllocationEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied,
    /// Another process already moved the row; nothing to do.
    PreconditionFailed,
}

/// The legal edges of the state machine: pending -> active,
/// active <-> suspended (suspension is re-entrant), and any live state ->
/// terminated. Everything else is refused.
pub fn transition_allowed(from: ServiceStatus, to: ServiceStatus) -> bool {
    matches!(
        (from, to),
        (ServiceStatus::Pending, ServiceStatus::Active)
            | (ServiceStatus::Active, ServiceStatus::Suspended)
            | (ServiceStatus::Suspended, ServiceStatus::Active)
    ) || (to == ServiceStatus::Terminated && from != ServiceStatus::Terminated)
}

#[derive(Debug, Default, Serialize)]
pub struct ExpirySweepStats {
    pub examined: usize,
    pub suspended: usize,
    pub disconnect_failures: usize,
}

#[derive(Debug, Default, Serialize)]
pub struct ProvisionSweepStats {
    pub examined: usize,
    pub provisioned: usize,
    pub failed: usize,
}

pub struct ServiceLifecycle {
    db_pool: DbPool,
    controller: Arc<SessionController>,
    provisioner: Arc<RadiusProvisioner>,
    grace_hours: i64,
}

impl ServiceLifecycle {
    pub fn new(
        db_pool: DbPool,
        controller: Arc<SessionController>,
        provisioner: Arc<RadiusProvisioner>,
        grace_hours: i64,
    ) -> Self {
        Self {
            db_pool,
            controller,
            provisioner,
            grace_hours,
        }
    }

    /// Guarded status write. Returns `PreconditionFailed` when the row is no
    /// longer in `expected`, including when it does not exist.
    async fn compare_and_swap(
        &self,
        service_id: Uuid,
        expected: ServiceStatus,
        next: ServiceStatus,
        extra_guard: &str,
    ) -> Result<TransitionOutcome, BillingError> {
        if !transition_allowed(expected, next) {
            return Ok(TransitionOutcome::PreconditionFailed);
        }

        let client = self.db_pool.get().await
            .map_err(|e| BillingError::Internal(e.to_string()))?;

        let query = format!(
            "UPDATE services
             SET status = $1, updated_at = NOW()
             WHERE id = $2 AND status = $3 {}",
            extra_guard
        );
        let updated = client
            .execute(
                query.as_str(),
                &[&next.as_str(), &service_id, &expected.as_str()],
            )
            .await?;

        if updated == 1 {
            client
                .execute(
                    "INSERT INTO service_events (service_id, event_type, description)
                     VALUES ($1, $2, $3)",
                    &[
                        &service_id,
                        &next.as_str(),
                        &format!("Status {} -> {}", expected.as_str(), next.as_str()),
                    ],
                )
                .await?;
            Ok(TransitionOutcome::Applied)
        } else {
            Ok(TransitionOutcome::PreconditionFailed)
        }
    }

    /// pending -> active: first allocation or manual activation. Provisions
    /// credentials so the next Access-Request succeeds.
    pub async fn activate(&self, service_id: Uuid) -> Result<TransitionOutcome, BillingError> {
        let outcome = self
            .compare_and_swap(service_id, ServiceStatus::Pending, ServiceStatus::Active, "")
            .await?;

        if outcome == TransitionOutcome::Applied {
            info!("Service {} activated", service_id);
            self.provisioner.provision(service_id).await?;
        }

        Ok(outcome)
    }

    /// suspended -> active: a new allocation pushed the expiry back into the
    /// future. Restores credentials and re-applies the plan profile to any
    /// session the NAS kept alive.
    pub async fn reactivate(&self, service_id: Uuid) -> Result<TransitionOutcome, BillingError> {
        let outcome = self
            .compare_and_swap(
                service_id,
                ServiceStatus::Suspended,
                ServiceStatus::Active,
                "AND entitlement_expiry > NOW()",
            )
            .await?;

        if outcome != TransitionOutcome::Applied {
            return Ok(outcome);
        }

        info!("Service {} reactivated", service_id);
        self.provisioner.provision(service_id).await?;

        if let Some((customer_id, profile)) = self.plan_profile(service_id).await? {
            let coa = self
                .controller
                .send_coa(
                    &SessionTarget::Customer(customer_id),
                    &CoaChanges {
                        profile: Some(profile),
                        session_timeout: None,
                    },
                )
                .await?;
            if coa.sessions_updated > 0 {
                info!(
                    "Re-applied plan profile to {} live sessions of service {}",
                    coa.sessions_updated, service_id
                );
            }
        }

        Ok(outcome)
    }

    /// any -> terminated: manual only. Deprovisions credentials and clears
    /// live sessions; the service never comes back.
    pub async fn terminate(&self, service_id: Uuid) -> Result<TransitionOutcome, BillingError> {
        let client = self.db_pool.get().await
            .map_err(|e| BillingError::Internal(e.to_string()))?;

        let row = client
            .query_opt(
                "UPDATE services
                 SET status = 'terminated', updated_at = NOW()
                 WHERE id = $1 AND status <> 'terminated'
                 RETURNING username",
                &[&service_id],
            )
            .await?;

        let username: String = match row {
            Some(r) => r.get(0),
            None => return Ok(TransitionOutcome::PreconditionFailed),
        };

        client
            .execute(
                "INSERT INTO service_events (service_id, event_type, description)
                 VALUES ($1, 'terminated', 'Service terminated by operator')",
                &[&service_id],
            )
            .await?;

        self.provisioner.deprovision(&username).await?;

        let disconnect = self
            .controller
            .send_disconnect(&SessionTarget::Username(username.clone()), "Admin-Reset")
            .await?;

        info!(
            "Service {} terminated ({} sessions disconnected)",
            service_id, disconnect.sessions_disconnected
        );
        Ok(TransitionOutcome::Applied)
    }

    /// React to allocation results after their transaction committed.
    pub async fn apply_allocation_events(&self, events: &[AllocationEvent]) {
        for event in events {
            let result = match event.prior_status {
                ServiceStatus::Pending => self.activate(event.service_id).await,
                ServiceStatus::Suspended => self.reactivate(event.service_id).await,
                // Already active: the extension alone is enough
                _ => Ok(TransitionOutcome::Applied),
            };

            if let Err(e) = result {
                // The entitlement is already booked; enforcement converges on
                // the next provisioning sweep.
                error!(
                    "Post-allocation transition for service {} failed: {}",
                    event.service_id, e
                );
            }
        }
    }

    /// The expiry sweep: active services past their entitlement (plus grace)
    /// are suspended and kicked off the network. Each service is handled
    /// independently; one failure never aborts the sweep.
    pub async fn suspend_expired(&self) -> Result<ExpirySweepStats, BillingError> {
        let client = self.db_pool.get().await
            .map_err(|e| BillingError::Internal(e.to_string()))?;

        let rows = client
            .query(
                "SELECT id, username FROM services
                 WHERE status = 'active'
                 AND entitlement_expiry < NOW() - make_interval(hours => $1)",
                &[&(self.grace_hours as i32)],
            )
            .await?;
        drop(client);

        let mut stats = ExpirySweepStats {
            examined: rows.len(),
            ..Default::default()
        };

        for row in &rows {
            let service_id: Uuid = row.get(0);
            let username: String = row.get(1);

            match self.suspend_one(service_id, &username).await {
                Ok(true) => stats.suspended += 1,
                Ok(false) => {}
                Err(e) => {
                    stats.disconnect_failures += 1;
                    error!("Expiry sweep failed for service {}: {}", service_id, e);
                }
            }
        }

        if stats.suspended > 0 {
            info!(
                "Expiry sweep: {} suspended out of {} examined",
                stats.suspended, stats.examined
            );
        }

        Ok(stats)
    }

    async fn suspend_one(&self, service_id: Uuid, username: &str) -> Result<bool, BillingError> {
        // Re-check expiry inside the guard: an allocation racing this sweep
        // may have extended the service since the candidate query.
        let outcome = self
            .compare_and_swap(
                service_id,
                ServiceStatus::Active,
                ServiceStatus::Suspended,
                "AND entitlement_expiry < NOW()",
            )
            .await?;

        if outcome != TransitionOutcome::Applied {
            return Ok(false);
        }

        info!("Service {} suspended: entitlement expired", service_id);

        // Re-authentication now fails; live sessions still need evicting.
        self.provisioner.suspend(username).await?;

        let disconnect = self
            .controller
            .send_disconnect(
                &SessionTarget::Username(username.to_string()),
                "Session-Timeout",
            )
            .await?;

        let unacked = disconnect.results.len() - disconnect.sessions_disconnected;
        if unacked > 0 {
            // Fallback: a NAS that won't disconnect still honors CoA; pin the
            // session to the restricted profile until it re-authenticates.
            warn!(
                "{} sessions of service {} did not ack disconnect, applying CoA downgrade",
                unacked, service_id
            );
            if let Some((_, profile)) = self.throttled_profile(service_id).await? {
                let _ = self
                    .controller
                    .send_coa(
                        &SessionTarget::Username(username.to_string()),
                        &CoaChanges {
                            profile: Some(profile),
                            session_timeout: Some(300),
                        },
                    )
                    .await;
            }
        }

        Ok(true)
    }

    /// The provisioning sweep: active services whose credentials are missing
    /// from the authorization tables get them reinstated. Idempotent.
    pub async fn provision_active(&self) -> Result<ProvisionSweepStats, BillingError> {
        let client = self.db_pool.get().await
            .map_err(|e| BillingError::Internal(e.to_string()))?;

        let rows = client
            .query(
                "SELECT svc.id, svc.username FROM services svc
                 WHERE svc.status = 'active'
                 AND NOT EXISTS (
                     SELECT 1 FROM radcheck rc
                     WHERE rc.username = svc.username
                     AND rc.attribute = 'Cleartext-Password'
                 )",
                &[],
            )
            .await?;
        drop(client);

        let mut stats = ProvisionSweepStats {
            examined: rows.len(),
            ..Default::default()
        };

        for row in &rows {
            let service_id: Uuid = row.get(0);
            match self.provisioner.provision(service_id).await {
                Ok(()) => stats.provisioned += 1,
                Err(e) => {
                    stats.failed += 1;
                    error!("Provisioning sweep failed for service {}: {}", service_id, e);
                }
            }
        }

        Ok(stats)
    }

    async fn plan_profile(
        &self,
        service_id: Uuid,
    ) -> Result<Option<(Uuid, SpeedProfile)>, BillingError> {
        self.profile_query(
            service_id,
            "p.download_mbps, p.upload_mbps",
        )
        .await
    }

    async fn throttled_profile(
        &self,
        service_id: Uuid,
    ) -> Result<Option<(Uuid, SpeedProfile)>, BillingError> {
        self.profile_query(
            service_id,
            "p.throttled_download_mbps, p.throttled_upload_mbps",
        )
        .await
    }

    async fn profile_query(
        &self,
        service_id: Uuid,
        columns: &str,
    ) -> Result<Option<(Uuid, SpeedProfile)>, BillingError> {
        let client = self.db_pool.get().await
            .map_err(|e| BillingError::Internal(e.to_string()))?;

        let query = format!(
            "SELECT svc.customer_id, {} FROM services svc
             JOIN service_plans p ON p.id = svc.plan_id
             WHERE svc.id = $1",
            columns
        );
        let row = client.query_opt(query.as_str(), &[&service_id]).await?;

        Ok(row.map(|r| {
            (
                r.get(0),
                SpeedProfile::flat(r.get(1), r.get(2)),
            )
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_edges() {
        assert!(transition_allowed(ServiceStatus::Pending, ServiceStatus::Active));
        assert!(transition_allowed(ServiceStatus::Active, ServiceStatus::Suspended));
        assert!(transition_allowed(ServiceStatus::Suspended, ServiceStatus::Active));
    }

    #[test]
    fn test_any_live_state_can_terminate() {
        for from in [
            ServiceStatus::Pending,
            ServiceStatus::Active,
            ServiceStatus::Suspended,
        ] {
            assert!(transition_allowed(from, ServiceStatus::Terminated));
        }
    }

    #[test]
    fn test_terminated_is_terminal() {
        for to in [
            ServiceStatus::Pending,
            ServiceStatus::Active,
            ServiceStatus::Suspended,
            ServiceStatus::Terminated,
        ] {
            assert!(!transition_allowed(ServiceStatus::Terminated, to));
        }
    }

    #[test]
    fn test_no_shortcut_edges() {
        assert!(!transition_allowed(ServiceStatus::Pending, ServiceStatus::Suspended));
        assert!(!transition_allowed(ServiceStatus::Active, ServiceStatus::Pending));
        assert!(!transition_allowed(ServiceStatus::Suspended, ServiceStatus::Pending));
    }
}
