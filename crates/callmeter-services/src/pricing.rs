//! Pricing resolution
//!
//! Looks up a provider's pricing and turns it into the rate the ticker
//! charges, the quote for a given duration, and the balance a wallet needs
//! before billing may begin.

use callmeter_core::{
    models::{Pricing, RatingModel, ResolvedRate},
    traits::PricingRepository,
    AppResult,
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Fields a caller may set on a provider's pricing
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingUpdate {
    pub rating_model: RatingModel,
    pub base_price: Decimal,
    #[serde(default)]
    pub discount_percent: Decimal,
    pub included_minutes: Option<u32>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

/// Pricing service
pub struct PricingService {
    repo: Arc<dyn PricingRepository>,
    default_rate_per_minute: Decimal,
}

impl PricingService {
    pub fn new(repo: Arc<dyn PricingRepository>, default_rate_per_minute: Decimal) -> Self {
        Self {
            repo,
            default_rate_per_minute,
        }
    }

    /// Stored pricing for the provider, or the configured default.
    #[instrument(skip(self))]
    pub async fn resolve_pricing(&self, provider_id: &str) -> AppResult<Pricing> {
        match self.repo.find(provider_id).await? {
            Some(pricing) if pricing.is_active => {
                debug!(
                    "Resolved {} pricing for provider {}: {}",
                    pricing.rating_model,
                    provider_id,
                    pricing.effective_price()
                );
                Ok(pricing)
            }
            Some(_) => {
                warn!(
                    "Pricing for provider {} is inactive, using default {}/min",
                    provider_id, self.default_rate_per_minute
                );
                Ok(Pricing::default_for(provider_id, self.default_rate_per_minute))
            }
            None => {
                warn!(
                    "No pricing for provider {}, using default {}/min",
                    provider_id, self.default_rate_per_minute
                );
                Ok(Pricing::default_for(provider_id, self.default_rate_per_minute))
            }
        }
    }

    pub async fn resolve_rate(&self, provider_id: &str) -> AppResult<ResolvedRate> {
        Ok(self.resolve_pricing(provider_id).await?.resolved_rate())
    }

    /// Price of a call lasting `minutes`.
    pub async fn quote(&self, provider_id: &str, minutes: Decimal) -> AppResult<Decimal> {
        Ok(self
            .resolve_pricing(provider_id)
            .await?
            .cost_for_duration(minutes))
    }

    pub async fn minimum_balance(
        &self,
        provider_id: &str,
        window_minutes: u32,
    ) -> AppResult<Decimal> {
        Ok(self
            .resolve_pricing(provider_id)
            .await?
            .minimum_balance_required(window_minutes))
    }

    /// Validate and store pricing for a provider.
    #[instrument(skip(self, update))]
    pub async fn set_pricing(
        &self,
        provider_id: &str,
        update: PricingUpdate,
    ) -> AppResult<Pricing> {
        let included_minutes = match update.rating_model {
            RatingModel::PerCall => update.included_minutes,
            RatingModel::PerMinute => None,
        };
        let pricing = Pricing {
            provider_id: provider_id.to_string(),
            rating_model: update.rating_model,
            base_price: update.base_price,
            discount_percent: update.discount_percent,
            included_minutes,
            is_active: update.is_active,
            is_default: false,
            updated_at: Utc::now(),
        };
        pricing.validate()?;

        let stored = self.repo.upsert(&pricing).await?;
        info!(
            "Pricing for provider {} set to {} {} (discount {}%)",
            provider_id, stored.rating_model, stored.base_price, stored.discount_percent
        );
        Ok(stored)
    }

    pub async fn list_pricing(&self) -> AppResult<Vec<Pricing>> {
        self.repo.list().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callmeter_core::AppError;
    use callmeter_store::InMemoryPricingRepository;
    use rust_decimal_macros::dec;

    fn service() -> PricingService {
        PricingService::new(Arc::new(InMemoryPricingRepository::new()), dec!(50))
    }

    fn per_minute(base: Decimal) -> PricingUpdate {
        PricingUpdate {
            rating_model: RatingModel::PerMinute,
            base_price: base,
            discount_percent: Decimal::ZERO,
            included_minutes: None,
            is_active: true,
        }
    }

    #[tokio::test]
    async fn test_unknown_provider_gets_default() {
        let svc = service();
        let pricing = svc.resolve_pricing("nobody").await.unwrap();
        assert!(pricing.is_default);
        assert_eq!(pricing.effective_price(), dec!(50));
        assert_eq!(svc.minimum_balance("nobody", 5).await.unwrap(), dec!(250));
    }

    #[tokio::test]
    async fn test_set_and_resolve() {
        let svc = service();
        svc.set_pricing("p1", per_minute(dec!(60))).await.unwrap();
        let rate = svc.resolve_rate("p1").await.unwrap();
        assert_eq!(rate.rate_per_minute, dec!(60));
        assert_eq!(rate.rate_per_second, dec!(1));
        assert_eq!(svc.quote("p1", dec!(10)).await.unwrap(), dec!(600));
        assert_eq!(svc.list_pricing().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_per_call_quote() {
        let svc = service();
        svc.set_pricing(
            "p1",
            PricingUpdate {
                rating_model: RatingModel::PerCall,
                base_price: dec!(200),
                discount_percent: Decimal::ZERO,
                included_minutes: Some(30),
                is_active: true,
            },
        )
        .await
        .unwrap();
        assert_eq!(svc.quote("p1", dec!(40)).await.unwrap().round_dp(2), dec!(233.33));
    }

    #[tokio::test]
    async fn test_rejects_invalid_pricing() {
        let svc = service();
        let err = svc.set_pricing("p1", per_minute(dec!(0))).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(svc.list_pricing().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_inactive_pricing_falls_back() {
        let svc = service();
        let mut update = per_minute(dec!(90));
        update.is_active = false;
        svc.set_pricing("p1", update).await.unwrap();
        assert!(svc.resolve_pricing("p1").await.unwrap().is_default);
    }
}
