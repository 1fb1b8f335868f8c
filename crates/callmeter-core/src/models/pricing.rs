//! Provider pricing model
//!
//! Each provider publishes either a per-minute rate or a flat per-call
//! price covering a fixed number of minutes, optionally discounted.

use crate::error::AppError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Minutes assumed for a per-call package that does not state its length
pub const DEFAULT_INCLUDED_MINUTES: u32 = 30;

/// Billing model for a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RatingModel {
    #[default]
    PerMinute,
    PerCall,
}

impl fmt::Display for RatingModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RatingModel::PerMinute => write!(f, "per_minute"),
            RatingModel::PerCall => write!(f, "per_call"),
        }
    }
}

impl RatingModel {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "per_minute" => Some(RatingModel::PerMinute),
            "per_call" => Some(RatingModel::PerCall),
            _ => None,
        }
    }
}

/// Rate frozen onto a call when billing starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedRate {
    pub rate_per_minute: Decimal,
    pub rate_per_second: Decimal,
}

/// Pricing entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pricing {
    pub provider_id: String,
    pub rating_model: RatingModel,
    pub base_price: Decimal,
    /// Percentage in `[0, 100]`
    pub discount_percent: Decimal,
    /// Package length for per-call pricing
    pub included_minutes: Option<u32>,
    pub is_active: bool,
    /// True when synthesized because the provider has no stored pricing
    #[serde(default)]
    pub is_default: bool,
    pub updated_at: DateTime<Utc>,
}

impl Pricing {
    /// Fallback used for providers without a pricing record.
    pub fn default_for(provider_id: impl Into<String>, rate_per_minute: Decimal) -> Self {
        Self {
            provider_id: provider_id.into(),
            rating_model: RatingModel::PerMinute,
            base_price: rate_per_minute,
            discount_percent: Decimal::ZERO,
            included_minutes: None,
            is_active: true,
            is_default: true,
            updated_at: Utc::now(),
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.base_price <= Decimal::ZERO {
            return Err(AppError::Validation("basePrice must be greater than 0".into()));
        }
        if self.discount_percent < Decimal::ZERO || self.discount_percent > Decimal::ONE_HUNDRED {
            return Err(AppError::Validation(
                "discountPercent must be between 0 and 100".into(),
            ));
        }
        if self.rating_model == RatingModel::PerCall && self.included_minutes.unwrap_or(0) == 0 {
            return Err(AppError::Validation(
                "includedMinutes must be greater than 0 for per_call pricing".into(),
            ));
        }
        Ok(())
    }

    /// Price after discount: `base * (1 - discount/100)`.
    #[inline]
    pub fn effective_price(&self) -> Decimal {
        self.base_price * (Decimal::ONE - self.discount_percent / Decimal::ONE_HUNDRED)
    }

    fn package_minutes(&self) -> Decimal {
        Decimal::from(self.included_minutes.unwrap_or(DEFAULT_INCLUDED_MINUTES).max(1))
    }

    /// Per-minute rate the ticker charges.
    ///
    /// Per-call packages are spread evenly across their included minutes.
    pub fn rate_per_minute(&self) -> Decimal {
        match self.rating_model {
            RatingModel::PerMinute => self.effective_price(),
            RatingModel::PerCall => self.effective_price() / self.package_minutes(),
        }
    }

    #[inline]
    pub fn rate_per_second(&self) -> Decimal {
        self.rate_per_minute() / Decimal::from(60)
    }

    pub fn resolved_rate(&self) -> ResolvedRate {
        ResolvedRate {
            rate_per_minute: self.rate_per_minute(),
            rate_per_second: self.rate_per_second(),
        }
    }

    /// Quote for a call of `minutes` length.
    ///
    /// Per-call pricing charges the package price, plus half the package's
    /// per-minute rate for each minute beyond the included ones.
    pub fn cost_for_duration(&self, minutes: Decimal) -> Decimal {
        let minutes = minutes.max(Decimal::ZERO);
        match self.rating_model {
            RatingModel::PerMinute => self.effective_price() * minutes,
            RatingModel::PerCall => {
                let included = self.package_minutes();
                let overage = (minutes - included).max(Decimal::ZERO);
                let overage_rate = self.rate_per_minute() / Decimal::TWO;
                self.effective_price() + overage * overage_rate
            }
        }
    }

    /// Balance a wallet must hold before billing can start.
    pub fn minimum_balance_required(&self, window_minutes: u32) -> Decimal {
        match self.rating_model {
            RatingModel::PerMinute => {
                self.effective_price() * Decimal::from(window_minutes.max(5))
            }
            RatingModel::PerCall => self.effective_price(),
        }
    }
}
