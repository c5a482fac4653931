// src/services/dunning.rs
//! Expiry reminders: fixed slots relative to a service's entitlement expiry,
//! one row per slot. A failed or missed slot is never resent; the next slot
//! is the next opportunity.

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::SmsConfig;
use crate::database::DbPool;
use crate::error::BillingError;
use crate::models::NotificationStatus;

const SWEEP_BATCH: i64 = 100;

struct SlotTemplate {
    notification_type: &'static str,
    offset_days: i64,
    message: &'static str,
}

static SLOTS: Lazy<Vec<SlotTemplate>> = Lazy::new(|| {
    vec![
        SlotTemplate {
            notification_type: "expiry_warning_5days",
            offset_days: -5,
            message: "Your service will expire in 5 days. Please renew to avoid interruption.",
        },
        SlotTemplate {
            notification_type: "expiry_warning_2days",
            offset_days: -2,
            message: "Your service will expire in 2 days. Please renew immediately.",
        },
        SlotTemplate {
            notification_type: "expiry_day",
            offset_days: 0,
            message: "Your service expires today. Renew now to stay connected.",
        },
        SlotTemplate {
            notification_type: "final_notice",
            offset_days: 3,
            message: "Final notice: your service expired 3 days ago and will be deprovisioned soon.",
        },
    ]
});

#[derive(Debug, Clone, PartialEq)]
pub struct NotificationSlot {
    pub notification_type: String,
    pub scheduled_for: DateTime<Utc>,
    pub message: String,
}

/// Compute the slots for an expiry. Slots already in the past at scheduling
/// time are dropped: a reminder about a moment that has passed is noise.
pub fn notification_slots(expiry: DateTime<Utc>, now: DateTime<Utc>) -> Vec<NotificationSlot> {
    SLOTS
        .iter()
        .filter_map(|slot| {
            let scheduled_for = expiry + Duration::days(slot.offset_days);
            if scheduled_for > now {
                Some(NotificationSlot {
                    notification_type: slot.notification_type.to_string(),
                    scheduled_for,
                    message: slot.message.to_string(),
                })
            } else {
                None
            }
        })
        .collect()
}

#[derive(Debug, Default, Serialize)]
pub struct DunningSweepStats {
    pub sent: usize,
    pub failed: usize,
}

pub struct DunningScheduler {
    db_pool: DbPool,
    http: reqwest::Client,
    sms: SmsConfig,
}

impl DunningScheduler {
    pub fn new(db_pool: DbPool, sms: SmsConfig) -> Self {
        Self {
            db_pool,
            http: reqwest::Client::new(),
            sms,
        }
    }

    /// Insert pending rows for a service's expiry. Idempotent per
    /// (service, type, moment): rescheduling after a second allocation adds
    /// rows for the new expiry without disturbing old ones.
    pub async fn schedule_for(
        &self,
        service_id: Uuid,
        expiry: DateTime<Utc>,
    ) -> Result<usize, BillingError> {
        let slots = notification_slots(expiry, Utc::now());
        if slots.is_empty() {
            return Ok(0);
        }

        let client = self.db_pool.get().await
            .map_err(|e| BillingError::Internal(e.to_string()))?;

        let mut created = 0;
        for slot in &slots {
            let inserted = client
                .execute(
                    "INSERT INTO service_notifications
                     (id, service_id, notification_type, scheduled_for, status, message)
                     VALUES ($1, $2, $3, $4, 'pending', $5)
                     ON CONFLICT (service_id, notification_type, scheduled_for) DO NOTHING",
                    &[
                        &Uuid::new_v4(),
                        &service_id,
                        &slot.notification_type,
                        &slot.scheduled_for,
                        &slot.message,
                    ],
                )
                .await?;
            created += inserted as usize;
        }

        info!(
            "Scheduled {} dunning slots for service {} (expiry {})",
            created, service_id, expiry
        );
        Ok(created)
    }

    /// Deliver due pending notifications. Each row is marked `sent` or
    /// `failed`; there is no in-slot retry.
    pub async fn run_sweep(&self) -> Result<DunningSweepStats, BillingError> {
        let client = self.db_pool.get().await
            .map_err(|e| BillingError::Internal(e.to_string()))?;

        let rows = client
            .query(
                "SELECT sn.id, sn.message, c.phone
                 FROM service_notifications sn
                 JOIN services svc ON svc.id = sn.service_id
                 JOIN customers c ON c.id = svc.customer_id
                 WHERE sn.status = 'pending' AND sn.scheduled_for <= NOW()
                 ORDER BY sn.scheduled_for
                 LIMIT $1",
                &[&SWEEP_BATCH],
            )
            .await?;

        let mut stats = DunningSweepStats::default();

        for row in &rows {
            let id: Uuid = row.get(0);
            let message: String = row.get(1);
            let phone: String = row.get(2);

            let delivered = self.deliver(&phone, &message).await;

            let status_enum = if delivered {
                NotificationStatus::Sent
            } else {
                NotificationStatus::Failed
            };
            let status = status_enum.as_str();
            client
                .execute(
                    "UPDATE service_notifications
                     SET status = $2, sent_at = CASE WHEN $2 = 'sent' THEN NOW() END
                     WHERE id = $1",
                    &[&id, &status],
                )
                .await?;

            if delivered {
                stats.sent += 1;
            } else {
                stats.failed += 1;
            }
        }

        if stats.sent + stats.failed > 0 {
            info!(
                "Dunning sweep: {} sent, {} failed",
                stats.sent, stats.failed
            );
        }
        Ok(stats)
    }

    async fn deliver(&self, phone: &str, message: &str) -> bool {
        if self.sms.gateway_url.is_empty() {
            warn!("SMS gateway not configured, cannot deliver to {}", phone);
            return false;
        }

        let payload = serde_json::json!({
            "to": phone,
            "from": self.sms.sender_id,
            "message": message,
        });

        match self
            .http
            .post(&self.sms.gateway_url)
            .header("Authorization", format!("Bearer {}", self.sms.api_key))
            .json(&payload)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!(
                    "SMS gateway rejected message to {}: HTTP {}",
                    phone,
                    response.status()
                );
                false
            }
            Err(e) => {
                warn!("SMS gateway unreachable for {}: {}", phone, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_four_slots_for_far_future_expiry() {
        let now = Utc::now();
        let expiry = now + Duration::days(30);
        let slots = notification_slots(expiry, now);

        assert_eq!(slots.len(), 4);
        assert_eq!(slots[0].notification_type, "expiry_warning_5days");
        assert_eq!(slots[0].scheduled_for, expiry - Duration::days(5));
        assert_eq!(slots[3].notification_type, "final_notice");
        assert_eq!(slots[3].scheduled_for, expiry + Duration::days(3));
    }

    #[test]
    fn test_past_slots_are_skipped() {
        let now = Utc::now();
        // Expiry in 3 days: the T-5 slot is already behind us
        let slots = notification_slots(now + Duration::days(3), now);

        assert_eq!(slots.len(), 3);
        assert!(slots.iter().all(|s| s.scheduled_for > now));
        assert!(!slots
            .iter()
            .any(|s| s.notification_type == "expiry_warning_5days"));
    }

    #[test]
    fn test_lapsed_expiry_keeps_only_final_notice() {
        let now = Utc::now();
        let slots = notification_slots(now - Duration::days(1), now);

        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].notification_type, "final_notice");
    }

    #[test]
    fn test_slots_are_distinct_rows() {
        let now = Utc::now();
        let slots = notification_slots(now + Duration::days(30), now);
        let unique: std::collections::HashSet<_> = slots
            .iter()
            .map(|s| (&s.notification_type, s.scheduled_for))
            .collect();
        assert_eq!(unique.len(), slots.len());
    }
}
