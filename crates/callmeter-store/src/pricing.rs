//! Provider pricing records

use async_trait::async_trait;
use callmeter_core::models::Pricing;
use callmeter_core::traits::PricingRepository;
use callmeter_core::AppResult;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A thread-safe in-memory store for pricing, keyed by provider id.
#[derive(Default, Clone)]
pub struct InMemoryPricingRepository {
    pricing: Arc<RwLock<HashMap<String, Pricing>>>,
}

impl InMemoryPricingRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PricingRepository for InMemoryPricingRepository {
    async fn find(&self, provider_id: &str) -> AppResult<Option<Pricing>> {
        let pricing = self.pricing.read().await;
        Ok(pricing.get(provider_id).cloned())
    }

    async fn upsert(&self, record: &Pricing) -> AppResult<Pricing> {
        let mut pricing = self.pricing.write().await;
        pricing.insert(record.provider_id.clone(), record.clone());
        Ok(record.clone())
    }

    async fn list(&self) -> AppResult<Vec<Pricing>> {
        let pricing = self.pricing.read().await;
        let mut all: Vec<Pricing> = pricing.values().cloned().collect();
        all.sort_by(|a, b| a.provider_id.cmp(&b.provider_id));
        Ok(all)
    }
}
