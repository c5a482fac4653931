// src/services/allocation.rs
//! Converts unallocated wallet balance into entitlement-days. The planner is
//! pure; the engine wraps it in a transaction plus a per-customer lock so
//! concurrent passes (webhook vs. manual vs. sweep) cannot double-spend.

use chrono::{DateTime, Duration, Utc};
use deadpool_postgres::Transaction;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::{CacheKeys, RedisClient};
use crate::database::DbPool;
use crate::error::BillingError;
use crate::models::{AllocationType, ServiceStatus};

const ALLOCATION_LOCK_TTL: usize = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationPolicy {
    /// Services closest to (or past) expiry first; never-funded services
    /// sort before everything.
    OldestExpiry,
    /// Oldest service first, regardless of expiry.
    CreatedAt,
}

impl AllocationPolicy {
    pub fn from_str(s: &str) -> Self {
        match s {
            "created_at" => AllocationPolicy::CreatedAt,
            _ => AllocationPolicy::OldestExpiry,
        }
    }
}

/// Remaining spendable value of one ledger entry.
#[derive(Debug, Clone)]
pub struct EntryFunds {
    pub ledger_entry_id: Uuid,
    pub remaining: Decimal,
}

/// An eligible service in policy order.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub service_id: Uuid,
    pub status: ServiceStatus,
    pub daily_rate: Decimal,
    pub current_expiry: Option<DateTime<Utc>>,
    pub max_prepay_days: i32,
}

/// One ledger-entry portion funding one service extension.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedAllocation {
    pub service_id: Uuid,
    pub ledger_entry_id: Uuid,
    pub days: i32,
    pub amount: Decimal,
}

/// Net effect on one service after a pass.
#[derive(Debug, Clone)]
pub struct AllocationEvent {
    pub service_id: Uuid,
    pub prior_status: ServiceStatus,
    pub days_added: i32,
    pub new_expiry: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct AllocationOutcome {
    pub allocated_amount: Decimal,
    pub services_extended: usize,
    pub events: Vec<AllocationEvent>,
}

/// Compute a pass without touching storage. Entries are drained FIFO in
/// whole days so that no ledger entry is ever over-attributed; sub-day
/// remainders stay on the entry (and in the available balance) for the next
/// pass.
pub fn plan_allocations(
    now: DateTime<Utc>,
    entries: &mut [EntryFunds],
    candidates: &[Candidate],
) -> (Vec<PlannedAllocation>, Vec<AllocationEvent>) {
    let mut allocations = Vec::new();
    let mut events = Vec::new();

    for candidate in candidates {
        if candidate.daily_rate <= Decimal::ZERO {
            warn!(
                "Service {} has a non-positive daily rate, skipping",
                candidate.service_id
            );
            continue;
        }

        // The prepay horizon bounds days remaining after this pass, so a
        // paid-ahead service cannot run away however many passes execute.
        let already_paid_days = candidate
            .current_expiry
            .map(|e| (e - now).num_days().max(0))
            .unwrap_or(0);
        let allowed = (candidate.max_prepay_days as i64 - already_paid_days).max(0) as i32;
        if allowed == 0 {
            continue;
        }

        let mut days_total = 0i32;

        for entry in entries.iter_mut() {
            if days_total >= allowed {
                break;
            }

            let affordable = (entry.remaining / candidate.daily_rate)
                .floor()
                .to_i32()
                .unwrap_or(0);
            let take = affordable.min(allowed - days_total);
            if take <= 0 {
                continue;
            }

            let amount = Decimal::from(take) * candidate.daily_rate;
            allocations.push(PlannedAllocation {
                service_id: candidate.service_id,
                ledger_entry_id: entry.ledger_entry_id,
                days: take,
                amount,
            });
            entry.remaining -= amount;
            days_total += take;
        }

        if days_total > 0 {
            // Days are anchored at the prior expiry: a service two days
            // lapsed that buys 30 days lands 28 days out, not 30.
            let base = candidate.current_expiry.unwrap_or(now);
            events.push(AllocationEvent {
                service_id: candidate.service_id,
                prior_status: candidate.status,
                days_added: days_total,
                new_expiry: base + Duration::days(days_total as i64),
            });
        }
    }

    (allocations, events)
}

pub struct AllocationEngine {
    db_pool: DbPool,
    redis: RedisClient,
}

impl AllocationEngine {
    pub fn new(db_pool: DbPool, redis: RedisClient) -> Self {
        Self { db_pool, redis }
    }

    /// Run one allocation pass for a customer. Returns an empty outcome when
    /// another pass holds the wallet lock; the caller's money is safe and
    /// the next pass will pick it up.
    pub async fn allocate(
        &self,
        customer_id: Uuid,
        policy: AllocationPolicy,
    ) -> Result<AllocationOutcome, BillingError> {
        if !self.try_lock(customer_id).await? {
            warn!(
                "Allocation pass for customer {} skipped: wallet locked",
                customer_id
            );
            return Ok(AllocationOutcome::default());
        }

        let result = self.allocate_locked(customer_id, policy).await;

        self.unlock(customer_id).await;
        result
    }

    async fn allocate_locked(
        &self,
        customer_id: Uuid,
        policy: AllocationPolicy,
    ) -> Result<AllocationOutcome, BillingError> {
        let mut client = self.db_pool.get().await
            .map_err(|e| BillingError::Internal(e.to_string()))?;

        let transaction = client.transaction().await?;
        let outcome = self
            .allocate_in_tx(&transaction, customer_id, policy, AllocationType::Automatic)
            .await?;
        transaction.commit().await?;

        Ok(outcome)
    }

    /// The pass itself, composable into a caller's transaction so a credit
    /// and its first allocation commit or roll back together.
    pub async fn allocate_in_tx(
        &self,
        transaction: &Transaction<'_>,
        customer_id: Uuid,
        policy: AllocationPolicy,
        allocation_type: AllocationType,
    ) -> Result<AllocationOutcome, BillingError> {
        let now = Utc::now();

        let mut entries = self.fetch_entry_funds(transaction, customer_id).await?;
        if entries.is_empty() {
            return Ok(AllocationOutcome::default());
        }

        let candidates = self.fetch_candidates(transaction, customer_id, policy).await?;
        if candidates.is_empty() {
            info!(
                "Customer {} has credit but no eligible services; balance stays unallocated",
                customer_id
            );
            return Ok(AllocationOutcome::default());
        }

        let (allocations, events) = plan_allocations(now, &mut entries, &candidates);
        if allocations.is_empty() {
            return Ok(AllocationOutcome::default());
        }

        let mut allocated_amount = Decimal::ZERO;

        for planned in &allocations {
            transaction
                .execute(
                    "INSERT INTO service_allocations
                     (id, service_id, ledger_entry_id, amount, days_added,
                      allocation_type, allocated_at)
                     VALUES ($1, $2, $3, $4, $5, $6, NOW())",
                    &[
                        &Uuid::new_v4(),
                        &planned.service_id,
                        &planned.ledger_entry_id,
                        &planned.amount,
                        &planned.days,
                        &allocation_type.as_str(),
                    ],
                )
                .await?;
            allocated_amount += planned.amount;
        }

        for event in &events {
            // Monotonic: expiry only ever moves forward
            transaction
                .execute(
                    "UPDATE services
                     SET entitlement_expiry = $2, updated_at = NOW()
                     WHERE id = $1
                     AND (entitlement_expiry IS NULL OR entitlement_expiry <= $2)",
                    &[&event.service_id, &event.new_expiry],
                )
                .await?;

            transaction
                .execute(
                    "INSERT INTO service_events (service_id, event_type, description, metadata)
                     VALUES ($1, 'extended', $2, $3)",
                    &[
                        &event.service_id,
                        &format!(
                            "Service extended for {} days until {}",
                            event.days_added,
                            event.new_expiry.to_rfc3339()
                        ),
                        &serde_json::json!({
                            "days_added": event.days_added,
                            "new_expiry": event.new_expiry,
                        }),
                    ],
                )
                .await?;
        }

        transaction
            .execute(
                "INSERT INTO wallet_transactions
                 (customer_id, amount, transaction_type, balance_before, balance_after, notes)
                 SELECT $1, $2,
                        'allocation',
                        bal.available + $3, bal.available,
                        $4
                 FROM (SELECT
                           COALESCE((SELECT SUM(amount) FROM payments WHERE customer_id = $1), 0)
                         - COALESCE((SELECT SUM(amount) FROM service_allocations a
                                     JOIN payments p ON p.id = a.ledger_entry_id
                                     WHERE p.customer_id = $1), 0) AS available
                      ) bal",
                &[
                    &customer_id,
                    &(-allocated_amount),
                    &allocated_amount,
                    &format!("Allocated to {} services", events.len()),
                ],
            )
            .await?;

        info!(
            "Allocated {} across {} services for customer {}",
            allocated_amount,
            events.len(),
            customer_id
        );

        Ok(AllocationOutcome {
            allocated_amount,
            services_extended: events.len(),
            events,
        })
    }

    /// Manual allocation of a fixed amount to one chosen service.
    pub async fn allocate_to_service(
        &self,
        customer_id: Uuid,
        service_id: Uuid,
        amount: Decimal,
        allocated_by: &str,
    ) -> Result<AllocationOutcome, BillingError> {
        if !self.try_lock(customer_id).await? {
            return Err(BillingError::InvalidRequest(
                "allocation already in progress for this customer".to_string(),
            ));
        }

        let result = async {
            let mut client = self.db_pool.get().await
                .map_err(|e| BillingError::Internal(e.to_string()))?;
            let transaction = client.transaction().await?;

            let mut entries = self.fetch_entry_funds(&transaction, customer_id).await?;
            let available: Decimal = entries.iter().map(|e| e.remaining).sum();
            if available < amount {
                return Err(BillingError::InsufficientBalance {
                    required: amount.to_string(),
                    available: available.to_string(),
                });
            }

            let candidates = self
                .fetch_candidates(&transaction, customer_id, AllocationPolicy::OldestExpiry)
                .await?;
            let candidate = candidates
                .into_iter()
                .find(|c| c.service_id == service_id)
                .ok_or(BillingError::ServiceNotFound)?;

            let days = (amount / candidate.daily_rate).floor().to_i32().unwrap_or(0);
            if days <= 0 {
                return Err(BillingError::InvalidRequest(format!(
                    "amount {} is below one day at rate {}",
                    amount, candidate.daily_rate
                )));
            }

            // Reuse the planner with this single candidate, capped at the
            // purchased days.
            let capped = Candidate {
                max_prepay_days: days.min(candidate.max_prepay_days),
                ..candidate
            };
            let (allocations, events) = plan_allocations(Utc::now(), &mut entries, &[capped]);

            let mut allocated_amount = Decimal::ZERO;
            for planned in &allocations {
                transaction
                    .execute(
                        "INSERT INTO service_allocations
                         (id, service_id, ledger_entry_id, amount, days_added,
                          allocation_type, allocated_at, allocated_by)
                         VALUES ($1, $2, $3, $4, $5, 'manual', NOW(), $6)",
                        &[
                            &Uuid::new_v4(),
                            &planned.service_id,
                            &planned.ledger_entry_id,
                            &planned.amount,
                            &planned.days,
                            &allocated_by,
                        ],
                    )
                    .await?;
                allocated_amount += planned.amount;
            }

            for event in &events {
                transaction
                    .execute(
                        "UPDATE services
                         SET entitlement_expiry = $2, updated_at = NOW()
                         WHERE id = $1
                         AND (entitlement_expiry IS NULL OR entitlement_expiry <= $2)",
                        &[&event.service_id, &event.new_expiry],
                    )
                    .await?;
            }

            transaction.commit().await?;

            Ok(AllocationOutcome {
                allocated_amount,
                services_extended: events.len(),
                events,
            })
        }
        .await;

        self.unlock(customer_id).await;
        result
    }

    async fn fetch_entry_funds(
        &self,
        transaction: &Transaction<'_>,
        customer_id: Uuid,
    ) -> Result<Vec<EntryFunds>, BillingError> {
        let rows = transaction
            .query(
                "SELECT p.id, p.amount - COALESCE(SUM(a.amount), 0)
                 FROM payments p
                 LEFT JOIN service_allocations a ON a.ledger_entry_id = p.id
                 WHERE p.customer_id = $1
                 GROUP BY p.id, p.amount, p.created_at
                 HAVING p.amount - COALESCE(SUM(a.amount), 0) > 0
                 ORDER BY p.created_at ASC",
                &[&customer_id],
            )
            .await?;

        Ok(rows
            .iter()
            .map(|row| EntryFunds {
                ledger_entry_id: row.get(0),
                remaining: row.get(1),
            })
            .collect())
    }

    async fn fetch_candidates(
        &self,
        transaction: &Transaction<'_>,
        customer_id: Uuid,
        policy: AllocationPolicy,
    ) -> Result<Vec<Candidate>, BillingError> {
        let order = match policy {
            AllocationPolicy::OldestExpiry => "svc.entitlement_expiry ASC NULLS FIRST",
            AllocationPolicy::CreatedAt => "svc.created_at ASC",
        };

        let query = format!(
            "SELECT svc.id, svc.status, svc.entitlement_expiry,
                    p.price, p.billing_cycle_days, p.max_prepay_days
             FROM services svc
             JOIN service_plans p ON p.id = svc.plan_id
             WHERE svc.customer_id = $1
             AND svc.status IN ('pending', 'active', 'suspended')
             ORDER BY {}",
            order
        );
        let rows = transaction.query(query.as_str(), &[&customer_id]).await?;

        Ok(rows
            .iter()
            .map(|row| {
                let price: Decimal = row.get(3);
                let cycle: i32 = row.get(4);
                Candidate {
                    service_id: row.get(0),
                    status: ServiceStatus::from_str(row.get::<_, &str>(1)),
                    daily_rate: price / Decimal::from(cycle.max(1)),
                    current_expiry: row.get(2),
                    max_prepay_days: row.get(5),
                }
            })
            .collect())
    }

    async fn try_lock(&self, customer_id: Uuid) -> Result<bool, BillingError> {
        self.redis
            .setnx_ex(
                &CacheKeys::allocation_lock(&customer_id),
                "1",
                ALLOCATION_LOCK_TTL,
            )
            .await
    }

    async fn unlock(&self, customer_id: Uuid) {
        let _ = self
            .redis
            .delete(&CacheKeys::allocation_lock(&customer_id))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn entry(remaining: Decimal) -> EntryFunds {
        EntryFunds {
            ledger_entry_id: Uuid::new_v4(),
            remaining,
        }
    }

    fn candidate(
        rate: Decimal,
        expiry_days_from_now: Option<i64>,
        status: ServiceStatus,
        now: DateTime<Utc>,
    ) -> Candidate {
        Candidate {
            service_id: Uuid::new_v4(),
            status,
            daily_rate: rate,
            current_expiry: expiry_days_from_now.map(|d| now + Duration::days(d)),
            max_prepay_days: 365,
        }
    }

    #[test]
    fn test_lapsed_service_lands_net_of_lapse() {
        // Daily rate 50, expiry two days in the past, credit 1500:
        // 30 days purchased anchored at the old expiry, landing 28 days out.
        let now = Utc::now();
        let mut entries = vec![entry(dec!(1500))];
        let candidates = vec![candidate(dec!(50), Some(-2), ServiceStatus::Suspended, now)];

        let (allocations, events) = plan_allocations(now, &mut entries, &candidates);

        assert_eq!(allocations.len(), 1);
        assert_eq!(allocations[0].days, 30);
        assert_eq!(allocations[0].amount, dec!(1500));
        assert_eq!(events[0].new_expiry, now + Duration::days(28));
        assert_eq!(events[0].days_added, 30);
        assert_eq!(entries[0].remaining, dec!(0));
    }

    #[test]
    fn test_remainder_stays_unallocated() {
        let now = Utc::now();
        let mut entries = vec![entry(dec!(120))];
        let candidates = vec![candidate(dec!(50), None, ServiceStatus::Pending, now)];

        let (allocations, _) = plan_allocations(now, &mut entries, &candidates);

        assert_eq!(allocations[0].days, 2);
        assert_eq!(entries[0].remaining, dec!(20));
    }

    #[test]
    fn test_insufficient_for_one_day_allocates_nothing() {
        let now = Utc::now();
        let mut entries = vec![entry(dec!(49))];
        let candidates = vec![candidate(dec!(50), None, ServiceStatus::Active, now)];

        let (allocations, events) = plan_allocations(now, &mut entries, &candidates);

        assert!(allocations.is_empty());
        assert!(events.is_empty());
        assert_eq!(entries[0].remaining, dec!(49));
    }

    #[test]
    fn test_future_expiry_extends_from_expiry() {
        let now = Utc::now();
        let mut entries = vec![entry(dec!(500))];
        let candidates = vec![candidate(dec!(50), Some(10), ServiceStatus::Active, now)];

        let (_, events) = plan_allocations(now, &mut entries, &candidates);

        assert_eq!(
            events[0].new_expiry,
            now + Duration::days(10) + Duration::days(10)
        );
    }

    #[test]
    fn test_prepay_horizon_caps_days() {
        let now = Utc::now();
        let mut entries = vec![entry(dec!(100_000))];
        let mut c = candidate(dec!(50), Some(80), ServiceStatus::Active, now);
        c.max_prepay_days = 90;
        let (allocations, _) = plan_allocations(now, &mut entries, &[c]);

        // 80 days already paid; only 10 more fit under the horizon
        assert_eq!(allocations[0].days, 10);
    }

    #[test]
    fn test_oldest_expiry_order_drains_first_candidate_first() {
        let now = Utc::now();
        let mut entries = vec![entry(dec!(150))];
        let first = candidate(dec!(50), Some(-5), ServiceStatus::Suspended, now);
        let second = candidate(dec!(50), Some(20), ServiceStatus::Active, now);
        let first_id = first.service_id;

        let (allocations, _) = plan_allocations(now, &mut entries, &[first, second]);

        // 3 affordable days all go to the most-lapsed service
        assert_eq!(allocations.len(), 1);
        assert_eq!(allocations[0].service_id, first_id);
        assert_eq!(allocations[0].days, 3);
    }

    #[test]
    fn test_draws_across_entries_fifo() {
        let now = Utc::now();
        let e1 = entry(dec!(70));
        let e2 = entry(dec!(130));
        let first_entry = e1.ledger_entry_id;
        let mut entries = vec![e1, e2];
        let candidates = vec![candidate(dec!(50), None, ServiceStatus::Pending, now)];

        let (allocations, events) = plan_allocations(now, &mut entries, &candidates);

        assert_eq!(allocations.len(), 2);
        assert_eq!(allocations[0].ledger_entry_id, first_entry);
        assert_eq!(allocations[0].days, 1);
        assert_eq!(allocations[1].days, 2);
        assert_eq!(events[0].days_added, 3);
        // 20 left on entry one, 30 on entry two
        assert_eq!(entries[0].remaining, dec!(20));
        assert_eq!(entries[1].remaining, dec!(30));
    }

    proptest! {
        /// Conservation: no ledger entry is ever attributed more value than
        /// it holds, and planned amounts equal days times rate exactly.
        #[test]
        fn prop_conservation(
            amounts in proptest::collection::vec(1u32..200_000, 1..4),
            rates in proptest::collection::vec(1u32..5_000, 1..4),
        ) {
            let now = Utc::now();
            let mut entries: Vec<EntryFunds> = amounts
                .iter()
                .map(|a| entry(Decimal::from(*a) / dec!(100)))
                .collect();
            let originals: Vec<Decimal> = entries.iter().map(|e| e.remaining).collect();
            let candidates: Vec<Candidate> = rates
                .iter()
                .map(|r| candidate(Decimal::from(*r) / dec!(100), None, ServiceStatus::Active, now))
                .collect();

            let (allocations, _) = plan_allocations(now, &mut entries, &candidates);

            for (i, original) in originals.iter().enumerate() {
                let spent: Decimal = allocations
                    .iter()
                    .filter(|a| a.ledger_entry_id == entries[i].ledger_entry_id)
                    .map(|a| a.amount)
                    .sum();
                prop_assert!(spent <= *original);
                prop_assert_eq!(entries[i].remaining, *original - spent);
                prop_assert!(entries[i].remaining >= Decimal::ZERO);
            }

            for a in &allocations {
                let rate = candidates
                    .iter()
                    .find(|c| c.service_id == a.service_id)
                    .unwrap()
                    .daily_rate;
                prop_assert_eq!(a.amount, Decimal::from(a.days) * rate);
            }
        }
    }
}
