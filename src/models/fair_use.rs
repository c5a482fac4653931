// src/models/fair_use.rs
use serde::{Deserialize, Serialize};
use rust_decimal::Decimal;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Month-keyed usage accumulator for one service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FairUseTracking {
    pub service_id: Uuid,
    pub month: String,
    pub billable_mb: i64,
    pub limit_reached: bool,
    pub throttled: bool,
    pub burst_active_until: Option<DateTime<Utc>>,
    pub last_burst_at: Option<DateTime<Utc>>,
    pub burst_used_count: i32,
}

#[derive(Debug, Serialize)]
pub struct FairUseStatus {
    pub used_gb: Decimal,
    pub cap_gb: Option<Decimal>,
    pub remaining_gb: Option<Decimal>,
    pub percent_used: Option<Decimal>,
    pub throttled: bool,
    pub burst_active_until: Option<DateTime<Utc>>,
    pub burst_available: bool,
}
