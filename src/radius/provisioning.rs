// src/radius/provisioning.rs
//! radcheck/radreply management. The authorization server reads these tables
//! directly, so provisioning is pure row maintenance: suspension removes the
//! password check row, reactivation restores it, termination clears all.

use tracing::{info, warn};
use uuid::Uuid;

use crate::database::DbPool;
use crate::error::BillingError;
use crate::models::Vendor;
use crate::radius::attributes::{format_speed_attribute, SpeedProfile};

pub struct RadiusProvisioner {
    db_pool: DbPool,
}

impl RadiusProvisioner {
    pub fn new(db_pool: DbPool) -> Self {
        Self { db_pool }
    }

    /// Create or refresh the credential and reply attributes for a service.
    /// Idempotent: reapplying an unchanged plan produces the same rows.
    pub async fn provision(&self, service_id: Uuid) -> Result<(), BillingError> {
        let client = self.db_pool.get().await
            .map_err(|e| BillingError::Internal(e.to_string()))?;

        let row = client
            .query_opt(
                "SELECT svc.username, svc.password,
                        p.download_mbps, p.upload_mbps,
                        COALESCE(r.vendor, 'unknown')
                 FROM services svc
                 JOIN service_plans p ON p.id = svc.plan_id
                 LEFT JOIN routers r ON r.id = svc.router_id
                 WHERE svc.id = $1",
                &[&service_id],
            )
            .await?;

        let row = row.ok_or(BillingError::ServiceNotFound)?;
        let username: String = row.get(0);
        let password: String = row.get(1);
        let vendor = Vendor::from_str(row.get::<_, &str>(4));
        let profile = SpeedProfile::flat(row.get(2), row.get(3));

        client
            .execute(
                "INSERT INTO radcheck (username, attribute, op, value)
                 VALUES ($1, 'Cleartext-Password', ':=', $2)
                 ON CONFLICT (username, attribute)
                 DO UPDATE SET value = $2",
                &[&username, &password],
            )
            .await?;

        let (speed_attr, speed_value) = format_speed_attribute(vendor, &profile);

        client
            .execute(
                "DELETE FROM radreply
                 WHERE username = $1
                 AND (attribute LIKE '%Rate-Limit%' OR attribute LIKE '%Bandwidth%'
                      OR attribute LIKE 'ERX-%' OR attribute = 'Filter-Id')",
                &[&username],
            )
            .await?;

        for (attribute, value) in [
            (speed_attr.as_str(), speed_value.as_str()),
            ("Service-Type", "Framed-User"),
            ("Framed-Protocol", "PPP"),
        ] {
            client
                .execute(
                    "INSERT INTO radreply (username, attribute, op, value)
                     VALUES ($1, $2, ':=', $3)
                     ON CONFLICT (username, attribute)
                     DO UPDATE SET value = $3",
                    &[&username, &attribute, &value],
                )
                .await?;
        }

        info!(
            "Provisioned RADIUS user {} ({} = {})",
            username, speed_attr, speed_value
        );
        Ok(())
    }

    /// Remove the password check row so re-authentication fails. Reply
    /// attributes are left in place for a later reactivation.
    pub async fn suspend(&self, username: &str) -> Result<(), BillingError> {
        let client = self.db_pool.get().await
            .map_err(|e| BillingError::Internal(e.to_string()))?;

        let deleted = client
            .execute("DELETE FROM radcheck WHERE username = $1", &[&username])
            .await?;

        if deleted == 0 {
            warn!("Suspend of {}: no radcheck rows present", username);
        } else {
            info!("Suspended RADIUS user {}", username);
        }
        Ok(())
    }

    /// Remove everything: credentials, reply attributes, group membership.
    pub async fn deprovision(&self, username: &str) -> Result<(), BillingError> {
        let client = self.db_pool.get().await
            .map_err(|e| BillingError::Internal(e.to_string()))?;

        client
            .execute("DELETE FROM radcheck WHERE username = $1", &[&username])
            .await?;
        client
            .execute("DELETE FROM radreply WHERE username = $1", &[&username])
            .await?;
        client
            .execute("DELETE FROM radusergroup WHERE username = $1", &[&username])
            .await?;

        info!("Deprovisioned RADIUS user {}", username);
        Ok(())
    }

    /// A service is provisioned when its password check row exists.
    pub async fn is_provisioned(&self, username: &str) -> Result<bool, BillingError> {
        let client = self.db_pool.get().await
            .map_err(|e| BillingError::Internal(e.to_string()))?;

        let row = client
            .query_one(
                "SELECT COUNT(*) FROM radcheck
                 WHERE username = $1 AND attribute = 'Cleartext-Password'",
                &[&username],
            )
            .await?;

        let count: i64 = row.get(0);
        Ok(count > 0)
    }
}
