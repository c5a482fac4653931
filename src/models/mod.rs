// src/models/mod.rs
pub mod service;
pub mod plan;
pub mod ledger;
pub mod session;
pub mod router;
pub mod fair_use;
pub mod notification;

pub use service::{Service, ServiceStatus};
pub use plan::ServicePlan;
pub use ledger::{AllocationRecord, AllocationType, CreditOutcome, LedgerEntry, WalletBalance};
pub use session::{
    CoaOutcome, DisconnectOutcome, LiveSession, SessionPushResult, SessionTarget,
};
pub use router::{ComplianceReport, ComplianceStatus, Router, Vendor};
pub use fair_use::{FairUseStatus, FairUseTracking};
pub use notification::{DunningNotification, NotificationStatus};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ==================== API DTOs ====================

/// M-Pesa STK callback envelope. Metadata items arrive as loosely typed
/// name/value pairs; `extract_payment` normalizes them.
#[derive(Debug, Clone, Deserialize)]
pub struct MpesaCallback {
    #[serde(rename = "Body")]
    pub body: MpesaCallbackBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MpesaCallbackBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StkCallback {
    #[serde(rename = "ResultCode")]
    pub result_code: i64,
    #[serde(rename = "CallbackMetadata", default)]
    pub callback_metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackMetadata {
    #[serde(rename = "Item", default)]
    pub items: Vec<MetadataItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetadataItem {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value", default)]
    pub value: Option<Value>,
}

/// Normalized payment event pulled out of a provider callback.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentEvent {
    pub amount: Decimal,
    pub reference: String,
    pub payer: String,
}

impl MpesaCallback {
    pub fn extract_payment(&self) -> Option<PaymentEvent> {
        let cb = &self.body.stk_callback;
        if cb.result_code != 0 {
            return None;
        }

        let items = &cb.callback_metadata.as_ref()?.items;
        let find = |name: &str| -> Option<&Value> {
            items
                .iter()
                .find(|i| i.name == name)
                .and_then(|i| i.value.as_ref())
        };

        let amount = match find("Amount")? {
            Value::Number(n) => Decimal::try_from(n.as_f64()?).ok()?,
            Value::String(s) => s.parse().ok()?,
            _ => return None,
        };
        let reference = match find("MpesaReceiptNumber")? {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let payer = match find("PhoneNumber")? {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };

        if reference.is_empty() || amount <= Decimal::ZERO {
            return None;
        }

        Some(PaymentEvent {
            amount,
            reference,
            payer,
        })
    }
}

/// Webhook acknowledgement in the provider's expected shape. ResultCode 0
/// tells the gateway to stop retrying; 1 invites a retry.
#[derive(Debug, Serialize)]
pub struct WebhookAck {
    #[serde(rename = "ResultCode")]
    pub result_code: i64,
    #[serde(rename = "ResultDesc")]
    pub result_desc: String,
}

impl WebhookAck {
    pub fn processed() -> Self {
        Self { result_code: 0, result_desc: "Success".to_string() }
    }

    pub fn already_processed() -> Self {
        Self { result_code: 0, result_desc: "Already processed".to_string() }
    }

    pub fn unprocessable(reason: &str) -> Self {
        Self { result_code: 0, result_desc: reason.to_string() }
    }

    pub fn retryable() -> Self {
        Self { result_code: 1, result_desc: "Internal error".to_string() }
    }
}

/// NAS accounting packet relayed by the RADIUS front end.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountingEvent {
    pub status_type: AcctStatusType,
    pub session_id: String,
    pub username: String,
    pub nas_identifier: String,
    pub nas_ip: String,
    #[serde(default)]
    pub nas_port: Option<String>,
    #[serde(default)]
    pub framed_ip: Option<String>,
    #[serde(default)]
    pub input_octets: i64,
    #[serde(default)]
    pub output_octets: i64,
    #[serde(default)]
    pub session_time: i64,
    #[serde(default)]
    pub terminate_cause: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AcctStatusType {
    Start,
    InterimUpdate,
    Stop,
}

#[derive(Debug, Deserialize)]
pub struct CoaApiRequest {
    #[serde(default)]
    pub customer_id: Option<Uuid>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub download_mbps: Option<i32>,
    #[serde(default)]
    pub upload_mbps: Option<i32>,
    #[serde(default)]
    pub session_timeout: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct DisconnectApiRequest {
    #[serde(default)]
    pub customer_id: Option<Uuid>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BurstRequest {
    pub customer_id: Uuid,
    pub service_id: Uuid,
}

/// One metering sample from the usage collaborator.
#[derive(Debug, Deserialize)]
pub struct UsageReport {
    pub service_id: Uuid,
    #[serde(default)]
    pub upload_mb: i64,
    #[serde(default)]
    pub download_mb: i64,
}

#[derive(Debug, Deserialize)]
pub struct RadiusTestRequest {
    pub host: String,
    #[serde(default = "default_auth_port")]
    pub port: u16,
    pub secret: String,
}

fn default_auth_port() -> u16 {
    1812
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn callback(result_code: i64, items: Vec<(&str, Value)>) -> MpesaCallback {
        MpesaCallback {
            body: MpesaCallbackBody {
                stk_callback: StkCallback {
                    result_code,
                    callback_metadata: Some(CallbackMetadata {
                        items: items
                            .into_iter()
                            .map(|(name, value)| MetadataItem {
                                name: name.to_string(),
                                value: Some(value),
                            })
                            .collect(),
                    }),
                },
            },
        }
    }

    #[test]
    fn test_extract_payment() {
        let cb = callback(
            0,
            vec![
                ("Amount", serde_json::json!(1500)),
                ("MpesaReceiptNumber", serde_json::json!("R1")),
                ("PhoneNumber", serde_json::json!("254700000001")),
            ],
        );
        let event = cb.extract_payment().unwrap();
        assert_eq!(event.amount, dec!(1500));
        assert_eq!(event.reference, "R1");
        assert_eq!(event.payer, "254700000001");
    }

    #[test]
    fn test_failed_callback_yields_nothing() {
        let cb = callback(1032, vec![("Amount", serde_json::json!(100))]);
        assert!(cb.extract_payment().is_none());
    }

    #[test]
    fn test_zero_amount_rejected() {
        let cb = callback(
            0,
            vec![
                ("Amount", serde_json::json!(0)),
                ("MpesaReceiptNumber", serde_json::json!("R2")),
                ("PhoneNumber", serde_json::json!("254700000001")),
            ],
        );
        assert!(cb.extract_payment().is_none());
    }
}
