// src/radius/controller.rs
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::database::DbPool;
use crate::error::BillingError;
use crate::models::{
    CoaOutcome, DisconnectOutcome, LiveSession, ServiceStatus, SessionPushResult, SessionTarget,
    Vendor,
};
use crate::radius::attributes::{apply_bandwidth, format_speed_attribute, SpeedProfile};
use crate::radius::client::RadiusClient;
use crate::radius::packet::{attr, PacketCode, RadiusPacket};
use crate::radius::registry::SessionRegistry;

/// Attribute changes to push onto live sessions without dropping them.
#[derive(Debug, Clone, Default)]
pub struct CoaChanges {
    pub profile: Option<SpeedProfile>,
    pub session_timeout: Option<u32>,
}

/// Verdict of a diagnostic probe against an authorization server. A reject
/// of the test credentials still proves the server is alive.
#[derive(Debug, Serialize)]
pub struct RadiusTestResult {
    pub reachable: bool,
    pub detail: String,
}

#[derive(Debug, Serialize)]
pub struct AccessDecision {
    pub accepted: bool,
    pub reason: String,
    pub attributes: Vec<(String, String)>,
}

impl AccessDecision {
    fn reject(reason: &str) -> Self {
        Self {
            accepted: false,
            reason: reason.to_string(),
            attributes: Vec::new(),
        }
    }
}

/// Translates lifecycle and policy decisions into protocol actions against
/// the NAS fleet, and owns the live-session registry.
pub struct SessionController {
    db_pool: DbPool,
    registry: Arc<SessionRegistry>,
    client: RadiusClient,
    default_coa_port: u16,
}

struct NasEndpoint {
    addr: SocketAddr,
    secret: String,
    vendor: Vendor,
}

impl SessionController {
    pub fn new(
        db_pool: DbPool,
        registry: Arc<SessionRegistry>,
        client: RadiusClient,
        default_coa_port: u16,
    ) -> Self {
        Self {
            db_pool,
            registry,
            client,
            default_coa_port,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Access-Request decision for a connecting username. Rejection here is
    /// the enforcement backstop: even when a Disconnect was lost, a
    /// suspended customer cannot re-authenticate.
    pub async fn authorize(&self, username: &str) -> Result<AccessDecision, BillingError> {
        let client = self.db_pool.get().await
            .map_err(|e| BillingError::Internal(e.to_string()))?;

        let row = client
            .query_opt(
                "SELECT svc.id, svc.status, svc.entitlement_expiry,
                        p.simultaneous_use, p.download_mbps, p.upload_mbps,
                        p.throttled_download_mbps, p.throttled_upload_mbps,
                        COALESCE(r.vendor, 'unknown')
                 FROM services svc
                 JOIN service_plans p ON p.id = svc.plan_id
                 LEFT JOIN routers r ON r.id = svc.router_id
                 WHERE svc.username = $1",
                &[&username],
            )
            .await?;

        let row = match row {
            Some(r) => r,
            None => {
                info!("Authorize REJECT {}: unknown user", username);
                return Ok(AccessDecision::reject("unknown_user"));
            }
        };

        let service_id: Uuid = row.get(0);
        let status = ServiceStatus::from_str(row.get::<_, &str>(1));
        let expiry: Option<DateTime<Utc>> = row.get(2);
        let simultaneous_use: i32 = row.get(3);
        let vendor = Vendor::from_str(row.get::<_, &str>(8));

        match status {
            ServiceStatus::Active => {}
            ServiceStatus::Pending => {
                info!("Authorize REJECT {}: pending activation", username);
                return Ok(AccessDecision::reject("pending_activation"));
            }
            ServiceStatus::Suspended => {
                info!("Authorize REJECT {}: suspended", username);
                return Ok(AccessDecision::reject("suspended"));
            }
            ServiceStatus::Terminated => {
                info!("Authorize REJECT {}: terminated", username);
                return Ok(AccessDecision::reject("terminated"));
            }
        }

        match expiry {
            Some(e) if e > Utc::now() => {}
            _ => {
                info!("Authorize REJECT {}: entitlement expired", username);
                return Ok(AccessDecision::reject("expired"));
            }
        }

        let live = self.registry.live_session_count(username).await?;
        if live >= simultaneous_use as i64 {
            info!(
                "Authorize REJECT {}: {} live sessions, plan allows {}",
                username, live, simultaneous_use
            );
            return Ok(AccessDecision::reject("simultaneous_use_exceeded"));
        }

        // Throttled services authenticate at the reduced profile unless a
        // burst window is currently open.
        let throttle_row = client
            .query_opt(
                "SELECT throttled, burst_active_until
                 FROM fair_use_tracking
                 WHERE service_id = $1 AND month = to_char(NOW(), 'YYYY-MM')",
                &[&service_id],
            )
            .await?;

        let throttled = match throttle_row {
            Some(r) => {
                let throttled: bool = r.get(0);
                let burst_until: Option<DateTime<Utc>> = r.get(1);
                throttled && !burst_until.map(|t| t > Utc::now()).unwrap_or(false)
            }
            None => false,
        };

        let profile = if throttled {
            SpeedProfile::flat(row.get(6), row.get(7))
        } else {
            SpeedProfile::flat(row.get(4), row.get(5))
        };

        let (attr_name, attr_value) = format_speed_attribute(vendor, &profile);

        info!(
            "Authorize ACCEPT {} ({} = {}{})",
            username,
            attr_name,
            attr_value,
            if throttled { ", throttled" } else { "" }
        );

        Ok(AccessDecision {
            accepted: true,
            reason: "authorized".to_string(),
            attributes: vec![(attr_name, attr_value)],
        })
    }

    /// Apply attribute changes to every live session matching the target.
    /// Each session is pushed independently with its own NAS address, shared
    /// secret and timeout; one dead NAS never blocks the rest.
    pub async fn send_coa(
        &self,
        target: &SessionTarget,
        changes: &CoaChanges,
    ) -> Result<CoaOutcome, BillingError> {
        let sessions = self.registry.sessions_for(target).await?;

        if sessions.is_empty() {
            info!("CoA {}: no live sessions", target.describe());
            return Ok(CoaOutcome {
                sessions_updated: 0,
                results: Vec::new(),
            });
        }

        let pushes = sessions.iter().map(|session| async move {
            match self.push_coa(session, changes).await {
                Ok(()) => SessionPushResult {
                    session_id: session.session_id.clone(),
                    nas: session.nas_ip.clone(),
                    success: true,
                    error: None,
                },
                Err(e) => {
                    warn!(
                        "CoA failed for session {} on {}: {}",
                        session.session_id, session.nas_ip, e
                    );
                    SessionPushResult {
                        session_id: session.session_id.clone(),
                        nas: session.nas_ip.clone(),
                        success: false,
                        error: Some(e.to_string()),
                    }
                }
            }
        });

        let results: Vec<SessionPushResult> = join_all(pushes).await;
        let sessions_updated = results.iter().filter(|r| r.success).count();

        info!(
            "CoA {}: {}/{} sessions updated",
            target.describe(),
            sessions_updated,
            results.len()
        );

        Ok(CoaOutcome {
            sessions_updated,
            results,
        })
    }

    /// Force-terminate every live session matching the target. Acknowledged
    /// sessions are archived with the reason; unacknowledged ones are
    /// reported failed, and the caller's state change stands either way.
    pub async fn send_disconnect(
        &self,
        target: &SessionTarget,
        reason: &str,
    ) -> Result<DisconnectOutcome, BillingError> {
        let sessions = self.registry.sessions_for(target).await?;

        if sessions.is_empty() {
            info!("Disconnect {}: no live sessions", target.describe());
            return Ok(DisconnectOutcome {
                sessions_disconnected: 0,
                results: Vec::new(),
            });
        }

        let pushes = sessions.iter().map(|session| async move {
            match self.push_disconnect(session).await {
                Ok(()) => {
                    // Ack received: archive out of the live set
                    if let Err(e) = self
                        .registry
                        .record_stop(&session.session_id, Some(reason))
                        .await
                    {
                        warn!("Failed to archive session {}: {}", session.session_id, e);
                    }
                    SessionPushResult {
                        session_id: session.session_id.clone(),
                        nas: session.nas_ip.clone(),
                        success: true,
                        error: None,
                    }
                }
                Err(e) => {
                    warn!(
                        "Disconnect failed for session {} on {}: {}",
                        session.session_id, session.nas_ip, e
                    );
                    SessionPushResult {
                        session_id: session.session_id.clone(),
                        nas: session.nas_ip.clone(),
                        success: false,
                        error: Some(e.to_string()),
                    }
                }
            }
        });

        let results: Vec<SessionPushResult> = join_all(pushes).await;
        let sessions_disconnected = results.iter().filter(|r| r.success).count();

        info!(
            "Disconnect {}: {}/{} sessions terminated ({})",
            target.describe(),
            sessions_disconnected,
            results.len(),
            reason
        );

        Ok(DisconnectOutcome {
            sessions_disconnected,
            results,
        })
    }

    async fn push_coa(
        &self,
        session: &LiveSession,
        changes: &CoaChanges,
    ) -> Result<(), BillingError> {
        let nas = self.resolve_nas(session).await?;

        let mut packet = RadiusPacket::new(PacketCode::CoaRequest);
        packet.add_string(attr::USER_NAME, &session.username);
        packet.add_string(attr::ACCT_SESSION_ID, &session.session_id);
        packet.add_string(attr::NAS_IDENTIFIER, &session.nas_identifier);
        if let Some(profile) = &changes.profile {
            apply_bandwidth(&mut packet, nas.vendor, profile);
        }
        if let Some(timeout) = changes.session_timeout {
            packet.add_u32(attr::SESSION_TIMEOUT, timeout);
        }

        let response = self.client.send(nas.addr, &nas.secret, packet).await?;

        match response.code {
            PacketCode::CoaAck => Ok(()),
            PacketCode::CoaNak => Err(BillingError::InvalidRequest(format!(
                "CoA-NAK from {}: {}",
                nas.addr,
                response
                    .get_string(attr::ERROR_CAUSE)
                    .unwrap_or_else(|| "unspecified".to_string())
            ))),
            other => Err(BillingError::InvalidRequest(format!(
                "unexpected {:?} in reply to CoA-Request",
                other
            ))),
        }
    }

    async fn push_disconnect(&self, session: &LiveSession) -> Result<(), BillingError> {
        let nas = self.resolve_nas(session).await?;

        let mut packet = RadiusPacket::new(PacketCode::DisconnectRequest);
        packet.add_string(attr::USER_NAME, &session.username);
        packet.add_string(attr::ACCT_SESSION_ID, &session.session_id);
        packet.add_string(attr::NAS_IDENTIFIER, &session.nas_identifier);

        let response = self.client.send(nas.addr, &nas.secret, packet).await?;

        match response.code {
            PacketCode::DisconnectAck => Ok(()),
            PacketCode::DisconnectNak => Err(BillingError::InvalidRequest(format!(
                "Disconnect-NAK from {}: {}",
                nas.addr,
                response
                    .get_string(attr::ERROR_CAUSE)
                    .unwrap_or_else(|| "unspecified".to_string())
            ))),
            other => Err(BillingError::InvalidRequest(format!(
                "unexpected {:?} in reply to Disconnect-Request",
                other
            ))),
        }
    }

    /// Probe an authorization server with throwaway credentials. Used from
    /// the diagnostics API before pointing a router at a new server.
    pub async fn test_server(
        &self,
        host: &str,
        port: u16,
        secret: &str,
    ) -> Result<RadiusTestResult, BillingError> {
        let addr: SocketAddr = format!("{}:{}", host, port).parse().map_err(|_| {
            BillingError::InvalidRequest(format!("invalid server address {}:{}", host, port))
        })?;

        let mut packet = RadiusPacket::new(PacketCode::AccessRequest);
        packet.add_string(attr::USER_NAME, "radtest");
        packet.add_user_password("radtest", secret);
        packet.add_ipv4(attr::NAS_IP_ADDRESS, std::net::Ipv4Addr::LOCALHOST);

        match self.client.send(addr, secret, packet).await {
            Ok(response) => Ok(RadiusTestResult {
                reachable: true,
                detail: match response.code {
                    PacketCode::AccessAccept => "Access-Accept received".to_string(),
                    PacketCode::AccessReject => {
                        "Access-Reject received (expected for test credentials)".to_string()
                    }
                    other => format!("unexpected {:?} response", other),
                },
            }),
            Err(BillingError::ProtocolTimeout { timeout_ms, .. }) => Ok(RadiusTestResult {
                reachable: false,
                detail: format!("no response within {}ms", timeout_ms),
            }),
            Err(e) => Err(e),
        }
    }

    /// Each session resolves its own NAS endpoint: a customer with
    /// simultaneous sessions may be online through different routers, each
    /// with its own shared secret and CoA port.
    async fn resolve_nas(&self, session: &LiveSession) -> Result<NasEndpoint, BillingError> {
        let client = self.db_pool.get().await
            .map_err(|e| BillingError::Internal(e.to_string()))?;

        let row = client
            .query_opt(
                "SELECT ip_address, coa_port, shared_secret, vendor
                 FROM routers
                 WHERE ip_address = $1 OR name = $2
                 LIMIT 1",
                &[&session.nas_ip, &session.nas_identifier],
            )
            .await?;

        let row = row.ok_or_else(|| BillingError::DeviceUnreachable {
            target: format!("no router record for NAS {}", session.nas_ip),
        })?;

        let ip: String = row.get(0);
        let coa_port: i32 = row.get(1);
        let secret: String = row.get(2);
        let vendor = Vendor::from_str(row.get::<_, &str>(3));

        let port = if coa_port > 0 {
            coa_port as u16
        } else {
            self.default_coa_port
        };

        let addr: SocketAddr = format!("{}:{}", ip, port).parse().map_err(|_| {
            BillingError::DeviceUnreachable {
                target: format!("invalid NAS address {}:{}", ip, port),
            }
        })?;

        Ok(NasEndpoint {
            addr,
            secret,
            vendor,
        })
    }
}
