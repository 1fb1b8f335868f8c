//! Provider earnings and availability

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Credit owed to a provider for one call. At most one exists per
/// `(provider, call)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EarningRecord {
    pub provider_id: String,
    pub call_id: String,
    pub amount: Decimal,
    pub credited: bool,
    pub credited_at: Option<DateTime<Utc>>,
}

impl EarningRecord {
    pub fn new(
        provider_id: impl Into<String>,
        call_id: impl Into<String>,
        amount: Decimal,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            call_id: call_id.into(),
            amount,
            credited: false,
            credited_at: None,
        }
    }

    /// Storage key `{providerId}_{callId}`
    pub fn key(&self) -> String {
        Self::key_for(&self.provider_id, &self.call_id)
    }

    pub fn key_for(provider_id: &str, call_id: &str) -> String {
        format!("{provider_id}_{call_id}")
    }
}

/// Provider availability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderStatus {
    #[default]
    Online,
    Busy,
    Offline,
}

impl fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderStatus::Online => write!(f, "online"),
            ProviderStatus::Busy => write!(f, "busy"),
            ProviderStatus::Offline => write!(f, "offline"),
        }
    }
}

/// Provider directory entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderProfile {
    pub provider_id: String,
    pub status: ProviderStatus,
    pub total_earnings: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl ProviderProfile {
    pub fn new(provider_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            provider_id: provider_id.into(),
            status: ProviderStatus::Online,
            total_earnings: Decimal::ZERO,
            updated_at: now,
        }
    }
}
