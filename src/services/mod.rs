// src/services/mod.rs
pub mod wallet;
pub mod allocation;
pub mod lifecycle;
pub mod fair_use;
pub mod dunning;

pub use wallet::WalletLedger;
pub use allocation::{AllocationEngine, AllocationOutcome, AllocationPolicy};
pub use lifecycle::{ServiceLifecycle, TransitionOutcome};
pub use fair_use::FairUseEngine;
pub use dunning::DunningScheduler;
