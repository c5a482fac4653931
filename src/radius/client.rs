// src/radius/client.rs
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

use crate::error::BillingError;
use crate::radius::packet::RadiusPacket;

/// One-shot UDP request/response exchange with a NAS. Every call carries its
/// own bounded timeout so a dead device costs at most `request_timeout`.
#[derive(Clone)]
pub struct RadiusClient {
    request_timeout: Duration,
}

impl RadiusClient {
    pub fn new(request_timeout_ms: u64) -> Self {
        Self {
            request_timeout: Duration::from_millis(request_timeout_ms),
        }
    }

    pub async fn send(
        &self,
        target: SocketAddr,
        secret: &str,
        mut packet: RadiusPacket,
    ) -> Result<RadiusPacket, BillingError> {
        let socket = UdpSocket::bind("0.0.0.0:0").await.map_err(|e| {
            BillingError::Internal(format!("failed to bind UDP socket: {}", e))
        })?;

        let wire = packet.encode(secret);
        let request_auth = packet.authenticator;
        let identifier = packet.identifier;

        debug!(
            "RADIUS {:?} id={} -> {} ({} bytes)",
            packet.code, identifier, target, wire.len()
        );

        socket.send_to(&wire, target).await.map_err(|e| {
            BillingError::DeviceUnreachable {
                target: format!("{}: {}", target, e),
            }
        })?;

        let mut buf = [0u8; 4096];
        let deadline = tokio::time::Instant::now() + self.request_timeout;

        loop {
            let remaining = deadline
                .checked_duration_since(tokio::time::Instant::now())
                .unwrap_or(Duration::ZERO);

            let (len, from) = timeout(remaining, socket.recv_from(&mut buf))
                .await
                .map_err(|_| BillingError::ProtocolTimeout {
                    target: target.to_string(),
                    timeout_ms: self.request_timeout.as_millis() as u64,
                })?
                .map_err(|e| BillingError::DeviceUnreachable {
                    target: format!("{}: {}", target, e),
                })?;

            if from.ip() != target.ip() {
                warn!("Ignoring RADIUS datagram from unexpected source {}", from);
                continue;
            }

            let response = RadiusPacket::parse(&buf[..len])?;

            if response.identifier != identifier {
                debug!(
                    "Stale RADIUS response id={} (expected {}), waiting",
                    response.identifier, identifier
                );
                continue;
            }

            if !RadiusPacket::verify_response(&buf[..len], &request_auth, secret) {
                warn!("RADIUS response authenticator mismatch from {}", target);
                return Err(BillingError::InvalidRequest(format!(
                    "bad response authenticator from {}",
                    target
                )));
            }

            return Ok(response);
        }
    }
}
