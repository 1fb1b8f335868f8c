//! Provider directory and earnings
//!
//! Earnings and provider profiles share one lock so crediting a call and
//! bumping the provider's running total happen together.

use async_trait::async_trait;
use callmeter_core::models::{EarningRecord, ProviderProfile, ProviderStatus};
use callmeter_core::traits::{CreditOutcome, EarningsRepository, ProviderDirectory};
use callmeter_core::AppResult;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct ProviderBook {
    profiles: HashMap<String, ProviderProfile>,
    /// keyed by `{providerId}_{callId}`
    earnings: HashMap<String, EarningRecord>,
}

/// A thread-safe in-memory provider store.
#[derive(Default, Clone)]
pub struct InMemoryProviderStore {
    book: Arc<RwLock<ProviderBook>>,
}

impl InMemoryProviderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EarningsRepository for InMemoryProviderStore {
    async fn credit_once(&self, mut record: EarningRecord) -> AppResult<CreditOutcome> {
        let mut book = self.book.write().await;
        let key = record.key();

        if let Some(existing) = book.earnings.get(&key) {
            if existing.credited {
                return Ok(CreditOutcome::AlreadyCredited(existing.clone()));
            }
        }

        let now = Utc::now();
        record.credited = true;
        record.credited_at = Some(now);

        let profile = book
            .profiles
            .entry(record.provider_id.clone())
            .or_insert_with(|| ProviderProfile::new(record.provider_id.clone(), now));
        profile.total_earnings += record.amount;
        profile.updated_at = now;

        book.earnings.insert(key, record.clone());
        Ok(CreditOutcome::Credited(record))
    }

    async fn find(&self, provider_id: &str, call_id: &str) -> AppResult<Option<EarningRecord>> {
        let book = self.book.read().await;
        Ok(book
            .earnings
            .get(&EarningRecord::key_for(provider_id, call_id))
            .cloned())
    }

    async fn list_for_provider(&self, provider_id: &str) -> AppResult<Vec<EarningRecord>> {
        let book = self.book.read().await;
        let mut records: Vec<EarningRecord> = book
            .earnings
            .values()
            .filter(|r| r.provider_id == provider_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.credited_at.cmp(&b.credited_at));
        Ok(records)
    }
}

#[async_trait]
impl ProviderDirectory for InMemoryProviderStore {
    async fn profile(&self, provider_id: &str) -> AppResult<Option<ProviderProfile>> {
        let book = self.book.read().await;
        Ok(book.profiles.get(provider_id).cloned())
    }

    async fn set_status(
        &self,
        provider_id: &str,
        status: ProviderStatus,
    ) -> AppResult<ProviderProfile> {
        let mut book = self.book.write().await;
        let now = Utc::now();
        let profile = book
            .profiles
            .entry(provider_id.to_string())
            .or_insert_with(|| ProviderProfile::new(provider_id, now));
        profile.status = status;
        profile.updated_at = now;
        Ok(profile.clone())
    }

    async fn release_if_busy(&self, provider_id: &str) -> AppResult<bool> {
        let mut book = self.book.write().await;
        match book.profiles.get_mut(provider_id) {
            Some(profile) if profile.status == ProviderStatus::Busy => {
                profile.status = ProviderStatus::Online;
                profile.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_credit_once_is_idempotent() {
        let store = InMemoryProviderStore::new();
        let first = store
            .credit_once(EarningRecord::new("p1", "c1", dec!(95)))
            .await
            .unwrap();
        assert!(matches!(first, CreditOutcome::Credited(_)));

        let second = store
            .credit_once(EarningRecord::new("p1", "c1", dec!(95)))
            .await
            .unwrap();
        assert!(matches!(second, CreditOutcome::AlreadyCredited(_)));

        let profile = store.profile("p1").await.unwrap().unwrap();
        assert_eq!(profile.total_earnings, dec!(95));
        assert_eq!(store.list_for_provider("p1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_release_only_from_busy() {
        let store = InMemoryProviderStore::new();
        assert!(!store.release_if_busy("p1").await.unwrap());

        store.set_status("p1", ProviderStatus::Offline).await.unwrap();
        assert!(!store.release_if_busy("p1").await.unwrap());

        store.set_status("p1", ProviderStatus::Busy).await.unwrap();
        assert!(store.release_if_busy("p1").await.unwrap());
        assert_eq!(
            store.profile("p1").await.unwrap().unwrap().status,
            ProviderStatus::Online
        );
    }
}
