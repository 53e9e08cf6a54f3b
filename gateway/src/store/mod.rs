//! Persisted-state collaborators (SPEC_FULL.md §3 "Usage/pricing", §6
//! "Persisted state layout", §6a). Modeled as narrow traits so a real
//! DynamoDB-backed implementation can be dropped in later; this crate ships
//! only the in-memory reference implementation, sufficient for tests and
//! single-node operation.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// An API key's authorization and budget state (SPEC_FULL.md §6).
#[derive(Debug, Clone)]
pub struct ApiKeyRecord {
    pub api_key: String,
    pub user_id: String,
    pub is_active: bool,
    pub rate_limit: Option<u32>,
    pub service_tier: String,
    pub monthly_budget: Option<f64>,
    pub budget_used: f64,
    pub budget_used_mtd: f64,
    pub budget_mtd_month: String,
    pub budget_history: HashMap<String, f64>,
    pub deactivated_reason: Option<String>,
    pub tpm_limit: Option<u32>,
}

#[async_trait::async_trait]
pub trait ApiKeyStore: Send + Sync {
    async fn get(&self, api_key: &str) -> Option<ApiKeyRecord>;
    async fn put(&self, record: ApiKeyRecord);
    async fn record_budget_usage(&self, api_key: &str, dollars: f64);
}

/// One call's usage, keyed by `(api_key, timestamp_ms)` (SPEC_FULL.md §6).
#[derive(Debug, Clone)]
pub struct UsageRecord {
    pub api_key: String,
    pub timestamp_ms: i64,
    pub request_id: String,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cached_tokens: u32,
    pub cache_write_input_tokens: u32,
    pub success: bool,
    pub error_message: Option<String>,
}

#[async_trait::async_trait]
pub trait UsageStore: Send + Sync {
    async fn record(&self, record: UsageRecord);
    async fn list_for_key(&self, api_key: &str) -> Vec<UsageRecord>;
}

/// Price per 1M tokens for a model, by provider (SPEC_FULL.md §6).
#[derive(Debug, Clone)]
pub struct ModelPricing {
    pub model_id: String,
    pub provider: String,
    pub input_price_per_million: f64,
    pub output_price_per_million: f64,
    pub cache_read_price_per_million: f64,
    pub cache_write_price_per_million: f64,
}

#[async_trait::async_trait]
pub trait PricingStore: Send + Sync {
    async fn get(&self, model_id: &str) -> Option<ModelPricing>;
}

/// `service_tier` cost multiplier, per SPEC_FULL.md §3.
pub fn service_tier_multiplier(tier: &str) -> f64 {
    match tier {
        "flex" => 0.5,
        "priority" => 1.75,
        _ => 1.0,
    }
}

/// Single-process in-memory implementation of all three stores, backed by
/// `DashMap`s so unrelated keys never contend — the same discipline as
/// [`crate::ptc::session::SessionStore`].
#[derive(Clone, Default)]
pub struct InMemoryStore {
    api_keys: Arc<DashMap<String, ApiKeyRecord>>,
    usage: Arc<DashMap<String, Vec<UsageRecord>>>,
    pricing: Arc<DashMap<String, ModelPricing>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_pricing(&self, entries: Vec<ModelPricing>) {
        for entry in entries {
            self.pricing.insert(entry.model_id.clone(), entry);
        }
    }
}

#[async_trait::async_trait]
impl ApiKeyStore for InMemoryStore {
    async fn get(&self, api_key: &str) -> Option<ApiKeyRecord> {
        self.api_keys.get(api_key).map(|entry| entry.clone())
    }

    async fn put(&self, record: ApiKeyRecord) {
        self.api_keys.insert(record.api_key.clone(), record);
    }

    async fn record_budget_usage(&self, api_key: &str, dollars: f64) {
        if let Some(mut entry) = self.api_keys.get_mut(api_key) {
            entry.budget_used += dollars;
            entry.budget_used_mtd += dollars;
        }
    }
}

#[async_trait::async_trait]
impl UsageStore for InMemoryStore {
    async fn record(&self, record: UsageRecord) {
        self.usage.entry(record.api_key.clone()).or_default().push(record);
    }

    async fn list_for_key(&self, api_key: &str) -> Vec<UsageRecord> {
        self.usage.get(api_key).map(|v| v.clone()).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl PricingStore for InMemoryStore {
    async fn get(&self, model_id: &str) -> Option<ModelPricing> {
        self.pricing.get(model_id).map(|entry| entry.clone())
    }
}

/// Current month key in `YYYY-MM` form, used for `budget_mtd_month` rollover.
pub fn current_month_key(now: DateTime<Utc>) -> String {
    now.format("%Y-%m").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(api_key: &str) -> ApiKeyRecord {
        ApiKeyRecord {
            api_key: api_key.to_string(),
            user_id: "user_1".to_string(),
            is_active: true,
            rate_limit: Some(1000),
            service_tier: "default".to_string(),
            monthly_budget: Some(100.0),
            budget_used: 0.0,
            budget_used_mtd: 0.0,
            budget_mtd_month: "2026-07".to_string(),
            budget_history: HashMap::new(),
            deactivated_reason: None,
            tpm_limit: None,
        }
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = InMemoryStore::new();
        store.put(record("key_1")).await;
        let found = store.get("key_1").await.unwrap();
        assert_eq!(found.user_id, "user_1");
    }

    #[tokio::test]
    async fn record_budget_usage_accumulates() {
        let store = InMemoryStore::new();
        store.put(record("key_1")).await;
        store.record_budget_usage("key_1", 1.5).await;
        store.record_budget_usage("key_1", 2.5).await;
        let found = store.get("key_1").await.unwrap();
        assert_eq!(found.budget_used, 4.0);
    }

    #[tokio::test]
    async fn usage_store_lists_records_for_key() {
        let store = InMemoryStore::new();
        store
            .record(UsageRecord {
                api_key: "key_1".to_string(),
                timestamp_ms: 1,
                request_id: "req_1".to_string(),
                model: "claude-sonnet-4-5-20250929".to_string(),
                input_tokens: 10,
                output_tokens: 20,
                cached_tokens: 0,
                cache_write_input_tokens: 0,
                success: true,
                error_message: None,
            })
            .await;
        assert_eq!(store.list_for_key("key_1").await.len(), 1);
    }

    #[test]
    fn service_tier_multiplier_matches_table() {
        assert_eq!(service_tier_multiplier("default"), 1.0);
        assert_eq!(service_tier_multiplier("flex"), 0.5);
        assert_eq!(service_tier_multiplier("priority"), 1.75);
    }
}
