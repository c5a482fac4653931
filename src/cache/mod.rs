// src/cache/mod.rs
pub mod redis_client;

pub use redis_client::RedisClient;

use uuid::Uuid;

/// Helper for generating consistent cache keys
pub struct CacheKeys;

impl CacheKeys {
    /// Lock serializing allocation passes for one wallet: `alloc_lock:{customer_id}`
    pub fn allocation_lock(customer_id: &Uuid) -> String {
        format!("alloc_lock:{}", customer_id)
    }

    /// Guard against overlapping compliance cycles: `compliance_cycle_lock`
    pub fn compliance_cycle_lock() -> String {
        "compliance_cycle_lock".to_string()
    }

    /// Cached service plan: `plan:{plan_id}`
    pub fn plan(plan_id: &Uuid) -> String {
        format!("plan:{}", plan_id)
    }

    /// Fast authorize-path marker for an active burst window: `burst:{service_id}`
    pub fn burst(service_id: &Uuid) -> String {
        format!("burst:{}", service_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_do_not_collide() {
        let id = Uuid::new_v4();
        let keys = [
            CacheKeys::allocation_lock(&id),
            CacheKeys::plan(&id),
            CacheKeys::burst(&id),
            CacheKeys::compliance_cycle_lock(),
        ];
        let unique = keys.iter().collect::<std::collections::HashSet<_>>();
        assert_eq!(unique.len(), keys.len());
    }
}
