// src/workers/mod.rs
//! Independent periodic sweeps. Each loop owns one concern, ticks on its own
//! interval, and is safe to trigger manually at any time: every unit of work
//! behind it is a guarded, idempotent write.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::time::{interval, Duration};
use tracing::{error, info};

use crate::config::SweepConfig;
use crate::error::BillingError;
use crate::routers::ComplianceWorker;
use crate::services::{DunningScheduler, FairUseEngine, ServiceLifecycle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepKind {
    Expiry,
    Provisioning,
    Compliance,
    Dunning,
    Burst,
}

impl SweepKind {
    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "expiry" => SweepKind::Expiry,
            "provisioning" => SweepKind::Provisioning,
            "compliance" => SweepKind::Compliance,
            "dunning" => SweepKind::Dunning,
            "burst" => SweepKind::Burst,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &str {
        match self {
            SweepKind::Expiry => "expiry",
            SweepKind::Provisioning => "provisioning",
            SweepKind::Compliance => "compliance",
            SweepKind::Dunning => "dunning",
            SweepKind::Burst => "burst",
        }
    }
}

#[derive(Clone)]
pub struct Sweeps {
    pub lifecycle: Arc<ServiceLifecycle>,
    pub fair_use: Arc<FairUseEngine>,
    pub dunning: Arc<DunningScheduler>,
    pub compliance: Arc<ComplianceWorker>,
}

impl Sweeps {
    /// Run one named sweep to completion and summarize the outcome.
    pub async fn run(&self, kind: SweepKind) -> Result<Value, BillingError> {
        match kind {
            SweepKind::Expiry => {
                let stats = self.lifecycle.suspend_expired().await?;
                Ok(json!({ "sweep": "expiry", "stats": stats }))
            }
            SweepKind::Provisioning => {
                let stats = self.lifecycle.provision_active().await?;
                Ok(json!({ "sweep": "provisioning", "stats": stats }))
            }
            SweepKind::Compliance => {
                let summary = self.compliance.enforce_all().await?;
                Ok(json!({ "sweep": "compliance", "stats": summary }))
            }
            SweepKind::Dunning => {
                let stats = self.dunning.run_sweep().await?;
                Ok(json!({ "sweep": "dunning", "stats": stats }))
            }
            SweepKind::Burst => {
                let reverted = self.fair_use.expire_bursts().await?;
                Ok(json!({ "sweep": "burst", "stats": { "reverted": reverted } }))
            }
        }
    }

    /// Spawn one background loop per sweep. Loops never exit; a failing
    /// cycle is logged and the next tick tries again.
    pub fn spawn_all(&self, config: &SweepConfig) {
        self.spawn_loop(SweepKind::Expiry, config.expiry_secs);
        self.spawn_loop(SweepKind::Provisioning, config.provisioning_secs);
        self.spawn_loop(SweepKind::Compliance, config.compliance_secs);
        self.spawn_loop(SweepKind::Dunning, config.dunning_secs);
        self.spawn_loop(SweepKind::Burst, config.burst_secs);
    }

    fn spawn_loop(&self, kind: SweepKind, period_secs: u64) {
        if period_secs == 0 {
            info!("Sweep {} disabled (period 0)", kind.as_str());
            return;
        }

        let sweeps = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(period_secs));
            // The first tick fires immediately; skip it so startup is quiet
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if let Err(e) = sweeps.run(kind).await {
                    error!("Sweep {} cycle failed: {}", kind.as_str(), e);
                }
            }
        });

        info!("Sweep {} scheduled every {}s", kind.as_str(), period_secs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sweep_kind_round_trip() {
        for name in ["expiry", "provisioning", "compliance", "dunning", "burst"] {
            assert_eq!(SweepKind::from_str(name).unwrap().as_str(), name);
        }
        assert!(SweepKind::from_str("vacuum").is_none());
    }
}
