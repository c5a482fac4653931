// src/models/ledger.rs
use serde::{Deserialize, Serialize};
use rust_decimal::Decimal;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// One credited payment. Append-only: rows are never mutated or deleted,
/// and `source_reference` is globally unique (the webhook idempotency key).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub amount: Decimal,
    pub source_reference: String,
    pub gateway: String,
    pub created_at: DateTime<Utc>,
}

/// Links a portion of one ledger entry's value to one service's expiry
/// extension. Sum of `amount` per ledger entry never exceeds the entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationRecord {
    pub id: Uuid,
    pub service_id: Uuid,
    pub ledger_entry_id: Uuid,
    pub amount: Decimal,
    pub days_added: i32,
    pub allocation_type: AllocationType,
    pub allocated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AllocationType {
    Automatic,
    Manual,
}

impl AllocationType {
    pub fn as_str(&self) -> &str {
        match self {
            AllocationType::Automatic => "automatic",
            AllocationType::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WalletBalance {
    pub credited: Decimal,
    pub allocated: Decimal,
    pub available: Decimal,
}

#[derive(Debug, Serialize)]
pub struct CreditOutcome {
    pub ledger_entry_id: Uuid,
    pub already_processed: bool,
}
