// src/models/plan.rs
use serde::{Deserialize, Serialize};
use rust_decimal::Decimal;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicePlan {
    pub id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub billing_cycle_days: i32,
    pub download_mbps: i32,
    pub upload_mbps: i32,
    pub throttled_download_mbps: i32,
    pub throttled_upload_mbps: i32,
    pub burst_enabled: bool,
    pub burst_cooldown_minutes: i32,
    pub monthly_cap_gb: Option<Decimal>,
    pub simultaneous_use: i32,
    pub max_prepay_days: i32,
}

impl ServicePlan {
    /// Entitlement conversion rate: one day of service in wallet currency.
    pub fn daily_rate(&self) -> Decimal {
        self.price / Decimal::from(self.billing_cycle_days)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn plan(price: Decimal, cycle: i32) -> ServicePlan {
        ServicePlan {
            id: Uuid::new_v4(),
            name: "Home 10M".to_string(),
            price,
            billing_cycle_days: cycle,
            download_mbps: 10,
            upload_mbps: 5,
            throttled_download_mbps: 2,
            throttled_upload_mbps: 1,
            burst_enabled: true,
            burst_cooldown_minutes: 60,
            monthly_cap_gb: Some(dec!(200)),
            simultaneous_use: 1,
            max_prepay_days: 90,
        }
    }

    #[test]
    fn test_daily_rate() {
        assert_eq!(plan(dec!(1500), 30).daily_rate(), dec!(50));
        assert_eq!(plan(dec!(700), 7).daily_rate(), dec!(100));
    }
}
