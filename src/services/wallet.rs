// src/services/wallet.rs
//! The wallet ledger: append-only credits keyed by the payment provider's
//! receipt reference. Replays of the same reference are absorbed without a
//! second credit, however many times the gateway retries.

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::{CacheKeys, RedisClient};
use crate::database::DbPool;
use crate::error::BillingError;
use crate::models::{AllocationType, CreditOutcome, WalletBalance};
use crate::services::allocation::{AllocationEngine, AllocationOutcome, AllocationPolicy};

const CREDIT_LOCK_TTL: usize = 60;

pub struct WalletLedger {
    db_pool: DbPool,
    redis: RedisClient,
    allocation: Arc<AllocationEngine>,
}

impl WalletLedger {
    pub fn new(db_pool: DbPool, redis: RedisClient, allocation: Arc<AllocationEngine>) -> Self {
        Self {
            db_pool,
            redis,
            allocation,
        }
    }

    /// Record a payment exactly once and run the first allocation pass in
    /// the same transaction, so a crash between the two cannot lose money.
    ///
    /// The customer id is not verified against the customer store: a credit
    /// for an id we cannot match still lands in the ledger rather than being
    /// silently discarded, and simply stays unallocated.
    pub async fn credit(
        &self,
        customer_id: Uuid,
        amount: Decimal,
        source_reference: &str,
        gateway: &str,
        raw_payload: &serde_json::Value,
    ) -> Result<(CreditOutcome, AllocationOutcome), BillingError> {
        if amount <= Decimal::ZERO {
            return Err(BillingError::InvalidRequest(format!(
                "non-positive credit amount {}",
                amount
            )));
        }

        let lock_held = self
            .redis
            .setnx_ex(&CacheKeys::allocation_lock(&customer_id), "1", CREDIT_LOCK_TTL)
            .await?;

        let result = self
            .credit_inner(
                customer_id,
                amount,
                source_reference,
                gateway,
                raw_payload,
                lock_held,
            )
            .await;

        if lock_held {
            let _ = self
                .redis
                .delete(&CacheKeys::allocation_lock(&customer_id))
                .await;
        }

        result
    }

    async fn credit_inner(
        &self,
        customer_id: Uuid,
        amount: Decimal,
        source_reference: &str,
        gateway: &str,
        raw_payload: &serde_json::Value,
        run_allocation: bool,
    ) -> Result<(CreditOutcome, AllocationOutcome), BillingError> {
        let mut client = self.db_pool.get().await
            .map_err(|e| BillingError::Internal(e.to_string()))?;

        let transaction = client.transaction().await?;

        let ledger_entry_id = Uuid::new_v4();
        let inserted = transaction
            .query_opt(
                "INSERT INTO payments
                 (id, customer_id, amount, source_reference, gateway, raw_payload, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, NOW())
                 ON CONFLICT (source_reference) DO NOTHING
                 RETURNING id",
                &[
                    &ledger_entry_id,
                    &customer_id,
                    &amount,
                    &source_reference,
                    &gateway,
                    raw_payload,
                ],
            )
            .await?;

        if inserted.is_none() {
            // Exactly-once: this reference was already credited. Report the
            // original entry and touch nothing.
            transaction.rollback().await.ok();

            let client = self.db_pool.get().await
                .map_err(|e| BillingError::Internal(e.to_string()))?;
            let row = client
                .query_one(
                    "SELECT id FROM payments WHERE source_reference = $1",
                    &[&source_reference],
                )
                .await?;

            info!("Duplicate payment event absorbed: {}", source_reference);
            return Ok((
                CreditOutcome {
                    ledger_entry_id: row.get(0),
                    already_processed: true,
                },
                AllocationOutcome::default(),
            ));
        }

        transaction
            .execute(
                "INSERT INTO wallet_transactions
                 (customer_id, amount, transaction_type, reference_id,
                  balance_before, balance_after, notes)
                 SELECT $1, $2, 'payment', $3, bal.available - $2, bal.available, $4
                 FROM (SELECT
                           COALESCE((SELECT SUM(amount) FROM payments WHERE customer_id = $1), 0)
                         - COALESCE((SELECT SUM(amount) FROM service_allocations a
                                     JOIN payments p ON p.id = a.ledger_entry_id
                                     WHERE p.customer_id = $1), 0) AS available
                      ) bal",
                &[
                    &customer_id,
                    &amount,
                    &ledger_entry_id,
                    &format!("Payment credited: {}", source_reference),
                ],
            )
            .await?;

        // Another pass holding the wallet lock means it will see this credit
        // the moment we commit; skipping here avoids a double-spend race.
        let allocation = if run_allocation {
            self.allocation
                .allocate_in_tx(
                    &transaction,
                    customer_id,
                    AllocationPolicy::OldestExpiry,
                    AllocationType::Automatic,
                )
                .await?
        } else {
            warn!(
                "Wallet {} locked by a concurrent pass; deferring allocation",
                customer_id
            );
            AllocationOutcome::default()
        };

        transaction.commit().await?;

        info!(
            "Payment {} credited: {} to customer {} ({} services extended)",
            source_reference, amount, customer_id, allocation.services_extended
        );

        if allocation.services_extended == 0 {
            warn!(
                "Credit {} stays unallocated for customer {}",
                source_reference, customer_id
            );
        }

        Ok((
            CreditOutcome {
                ledger_entry_id,
                already_processed: false,
            },
            allocation,
        ))
    }

    pub fn allocation(&self) -> &Arc<AllocationEngine> {
        &self.allocation
    }

    pub async fn get_balance(&self, customer_id: Uuid) -> Result<WalletBalance, BillingError> {
        let client = self.db_pool.get().await
            .map_err(|e| BillingError::Internal(e.to_string()))?;

        let row = client
            .query_one(
                "SELECT
                     COALESCE((SELECT SUM(amount) FROM payments WHERE customer_id = $1), 0),
                     COALESCE((SELECT SUM(a.amount) FROM service_allocations a
                               JOIN payments p ON p.id = a.ledger_entry_id
                               WHERE p.customer_id = $1), 0)",
                &[&customer_id],
            )
            .await?;

        let credited: Decimal = row.get(0);
        let allocated: Decimal = row.get(1);

        Ok(WalletBalance {
            credited,
            allocated,
            available: credited - allocated,
        })
    }

    /// Resolve a payer identifier (MSISDN) to a customer id. Customer
    /// records are owned by an external collaborator; this is a read.
    pub async fn find_customer_by_phone(
        &self,
        phone: &str,
    ) -> Result<Option<Uuid>, BillingError> {
        let normalized: String = phone
            .chars()
            .filter(|c| c.is_ascii_digit())
            .collect();

        let client = self.db_pool.get().await
            .map_err(|e| BillingError::Internal(e.to_string()))?;

        let row = client
            .query_opt(
                "SELECT id FROM customers
                 WHERE phone = $1 OR phone = $2
                 LIMIT 1",
                &[&phone, &normalized],
            )
            .await?;

        Ok(row.map(|r| r.get(0)))
    }
}
