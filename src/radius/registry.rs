// src/radius/registry.rs
use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::database::DbPool;
use crate::error::BillingError;
use crate::models::{AccountingEvent, AcctStatusType, LiveSession, SessionTarget};

/// Owner of the live-session registry. Billing code never writes
/// `radius_sessions_active` directly; accounting events from the NAS and
/// acknowledged disconnects are the only mutations.
pub struct SessionRegistry {
    db_pool: DbPool,
}

impl SessionRegistry {
    pub fn new(db_pool: DbPool) -> Self {
        Self { db_pool }
    }

    pub async fn handle_accounting(&self, event: &AccountingEvent) -> Result<(), BillingError> {
        match event.status_type {
            AcctStatusType::Start => self.record_start(event).await,
            AcctStatusType::InterimUpdate => self.record_interim(event).await,
            AcctStatusType::Stop => {
                let archived = self
                    .record_stop(event.session_id.as_str(), event.terminate_cause.as_deref())
                    .await?;
                if !archived {
                    warn!(
                        "Accounting-Stop for unknown session {}",
                        event.session_id
                    );
                }
                Ok(())
            }
        }
    }

    async fn record_start(&self, event: &AccountingEvent) -> Result<(), BillingError> {
        let client = self.db_pool.get().await
            .map_err(|e| BillingError::Internal(e.to_string()))?;

        let service_row = client
            .query_opt(
                "SELECT id FROM services WHERE username = $1",
                &[&event.username],
            )
            .await?;

        let service_id: Uuid = match service_row {
            Some(row) => row.get(0),
            None => {
                warn!(
                    "Accounting-Start for unknown username {}, session {}",
                    event.username, event.session_id
                );
                return Ok(());
            }
        };

        client
            .execute(
                "INSERT INTO radius_sessions_active
                 (session_id, username, service_id, nas_identifier, nas_ip, nas_port,
                  framed_ip, start_time, last_update, bytes_in, bytes_out)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, NOW(), NOW(), 0, 0)
                 ON CONFLICT (session_id) DO UPDATE
                 SET last_update = NOW()",
                &[
                    &event.session_id,
                    &event.username,
                    &service_id,
                    &event.nas_identifier,
                    &event.nas_ip,
                    &event.nas_port,
                    &event.framed_ip,
                ],
            )
            .await?;

        client
            .execute(
                "UPDATE services
                 SET is_online = true, last_session_at = NOW(), updated_at = NOW()
                 WHERE id = $1",
                &[&service_id],
            )
            .await?;

        info!(
            "Session started: {} for {} on {}",
            event.session_id, event.username, event.nas_identifier
        );
        Ok(())
    }

    async fn record_interim(&self, event: &AccountingEvent) -> Result<(), BillingError> {
        let client = self.db_pool.get().await
            .map_err(|e| BillingError::Internal(e.to_string()))?;

        let updated = client
            .execute(
                "UPDATE radius_sessions_active
                 SET bytes_in = $2, bytes_out = $3, last_update = NOW()
                 WHERE session_id = $1",
                &[&event.session_id, &event.input_octets, &event.output_octets],
            )
            .await?;

        // A NAS that rebooted mid-session can interim-update a session this
        // registry never saw start; treat it as a late start.
        if updated == 0 {
            self.record_start(event).await?;
        }

        Ok(())
    }

    /// Archive a session out of the live set. Used for Accounting-Stop and
    /// for acknowledged administrative disconnects.
    pub async fn record_stop(
        &self,
        session_id: &str,
        terminate_cause: Option<&str>,
    ) -> Result<bool, BillingError> {
        let client = self.db_pool.get().await
            .map_err(|e| BillingError::Internal(e.to_string()))?;

        let cause = terminate_cause.unwrap_or("User-Request");

        let row = client
            .query_opt(
                "WITH moved AS (
                     DELETE FROM radius_sessions_active
                     WHERE session_id = $1
                     RETURNING session_id, username, service_id, nas_identifier,
                               nas_ip, nas_port, framed_ip, start_time, bytes_in, bytes_out
                 )
                 INSERT INTO radius_sessions_archive
                 (session_id, username, service_id, nas_identifier, nas_ip, nas_port,
                  framed_ip, start_time, bytes_in, bytes_out, stop_time, terminate_cause, archived_at)
                 SELECT session_id, username, service_id, nas_identifier, nas_ip, nas_port,
                        framed_ip, start_time, bytes_in, bytes_out, NOW(), $2, NOW()
                 FROM moved
                 RETURNING service_id",
                &[&session_id, &cause],
            )
            .await?;

        let service_id: Uuid = match row {
            Some(row) => row.get(0),
            None => return Ok(false),
        };

        client
            .execute(
                "UPDATE services
                 SET is_online = EXISTS (
                         SELECT 1 FROM radius_sessions_active WHERE service_id = services.id
                     ),
                     updated_at = NOW()
                 WHERE id = $1",
                &[&service_id],
            )
            .await?;

        info!("Session stopped: {} ({})", session_id, cause);
        Ok(true)
    }

    /// Resolve a CoA/Disconnect target to its live sessions. A customer may
    /// hold simultaneous sessions on different NAS devices.
    pub async fn sessions_for(
        &self,
        target: &SessionTarget,
    ) -> Result<Vec<LiveSession>, BillingError> {
        let client = self.db_pool.get().await
            .map_err(|e| BillingError::Internal(e.to_string()))?;

        const COLUMNS: &str =
            "s.session_id, s.username, s.service_id, s.nas_identifier, s.nas_ip,
             s.nas_port, s.framed_ip, s.start_time, s.bytes_in, s.bytes_out";

        let rows = match target {
            SessionTarget::Customer(customer_id) => {
                let query = format!(
                    "SELECT {} FROM radius_sessions_active s
                     JOIN services svc ON svc.id = s.service_id
                     WHERE svc.customer_id = $1",
                    COLUMNS
                );
                client.query(query.as_str(), &[customer_id]).await?
            }
            SessionTarget::Username(username) => {
                let query = format!(
                    "SELECT {} FROM radius_sessions_active s WHERE s.username = $1",
                    COLUMNS
                );
                client.query(query.as_str(), &[username]).await?
            }
            SessionTarget::Session(session_id) => {
                let query = format!(
                    "SELECT {} FROM radius_sessions_active s WHERE s.session_id = $1",
                    COLUMNS
                );
                client.query(query.as_str(), &[session_id]).await?
            }
        };

        Ok(rows.iter().map(row_to_session).collect())
    }

    pub async fn live_session_count(&self, username: &str) -> Result<i64, BillingError> {
        let client = self.db_pool.get().await
            .map_err(|e| BillingError::Internal(e.to_string()))?;

        let row = client
            .query_one(
                "SELECT COUNT(*) FROM radius_sessions_active WHERE username = $1",
                &[&username],
            )
            .await?;

        Ok(row.get(0))
    }
}

fn row_to_session(row: &tokio_postgres::Row) -> LiveSession {
    let start_time: DateTime<Utc> = row.get(7);
    LiveSession {
        session_id: row.get(0),
        username: row.get(1),
        service_id: row.get(2),
        nas_identifier: row.get(3),
        nas_ip: row.get(4),
        nas_port: row.get(5),
        framed_ip: row.get(6),
        start_time,
        bytes_in: row.get(8),
        bytes_out: row.get(9),
    }
}
