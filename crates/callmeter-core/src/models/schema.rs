//! Versioned call documents
//!
//! Call records are persisted as JSON documents carrying a `schemaVersion`.
//! Documents written before versioning, or by older writers, are normalized
//! here at read time into a typed [`Call`]. Missing fields take values that
//! never lead to a charge.

use super::call::{Call, CallStatus, CallType, FinalizeReason, SettlementStatus};
use crate::error::AppError;
use crate::AppResult;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Loosely typed call document as found in storage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallDocument {
    pub schema_version: Option<u32>,
    pub call_id: Option<String>,
    pub user_id: Option<String>,
    pub provider_id: Option<String>,
    pub call_type: Option<CallType>,
    pub status: Option<String>,
    pub user_joined: Option<bool>,
    pub provider_joined: Option<bool>,
    pub media_published: Option<bool>,
    pub billing_started: Option<bool>,
    pub billing_finalized: Option<bool>,
    pub rate_per_minute: Option<Decimal>,
    pub rate_per_second: Option<Decimal>,
    pub elapsed_seconds: Option<u64>,
    pub accrued_amount: Option<Decimal>,
    pub provider_earning: Option<Decimal>,
    pub created_at: Option<DateTime<Utc>>,
    pub connected_at: Option<DateTime<Utc>>,
    pub call_start_time: Option<DateTime<Utc>>,
    pub call_end_time: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub end_reason: Option<FinalizeReason>,
    pub settlement: Option<SettlementStatus>,
}

impl CallDocument {
    pub fn from_value(value: serde_json::Value) -> AppResult<Self> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn to_value(&self) -> AppResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn is_current(&self) -> bool {
        self.schema_version == Some(CURRENT_SCHEMA_VERSION)
    }
}

impl From<&Call> for CallDocument {
    fn from(call: &Call) -> Self {
        Self {
            schema_version: Some(CURRENT_SCHEMA_VERSION),
            call_id: Some(call.call_id.clone()),
            user_id: Some(call.user_id.clone()),
            provider_id: Some(call.provider_id.clone()),
            call_type: Some(call.call_type),
            status: Some(call.status.as_str().to_string()),
            user_joined: Some(call.user_joined),
            provider_joined: Some(call.provider_joined),
            media_published: Some(call.media_published),
            billing_started: Some(call.billing_started),
            billing_finalized: Some(call.billing_finalized),
            rate_per_minute: call.rate_per_minute,
            rate_per_second: call.rate_per_second,
            elapsed_seconds: Some(call.elapsed_seconds),
            accrued_amount: Some(call.accrued_amount),
            provider_earning: Some(call.provider_earning),
            created_at: Some(call.created_at),
            connected_at: call.connected_at,
            call_start_time: call.call_start_time,
            call_end_time: call.call_end_time,
            updated_at: Some(call.updated_at),
            end_reason: call.end_reason,
            settlement: call.settlement.clone(),
        }
    }
}

/// Map a stored status, including pre-versioning values, onto the current set.
fn normalize_status(raw: &str, both_joined: bool) -> Option<CallStatus> {
    match raw.to_lowercase().as_str() {
        "created" | "pending" | "queued" | "ringing" => Some(CallStatus::Created),
        "active" if both_joined => Some(CallStatus::Connected),
        "active" => Some(CallStatus::Created),
        "cancelled" | "rejected" | "missed" => Some(CallStatus::Failed),
        other => CallStatus::from_str(other),
    }
}

/// Normalize a document of any schema version into a [`Call`].
///
/// `fallback_id` is the storage key, used when the document body lacks a
/// `callId`. The function is pure; callers decide whether to write back.
pub fn migrate(doc: CallDocument, fallback_id: &str) -> AppResult<Call> {
    if let Some(version) = doc.schema_version {
        if version > CURRENT_SCHEMA_VERSION {
            return Err(AppError::Serialization(format!(
                "call {fallback_id} has unsupported schema version {version}"
            )));
        }
    }

    let call_id = doc.call_id.unwrap_or_else(|| fallback_id.to_string());
    let user_id = doc
        .user_id
        .ok_or_else(|| AppError::Serialization(format!("call {call_id} has no userId")))?;
    let provider_id = doc
        .provider_id
        .ok_or_else(|| AppError::Serialization(format!("call {call_id} has no providerId")))?;

    let user_joined = doc.user_joined.unwrap_or(false);
    let provider_joined = doc.provider_joined.unwrap_or(false);

    let status = match doc.status.as_deref() {
        None => CallStatus::Created,
        Some(raw) => normalize_status(raw, user_joined && provider_joined).ok_or_else(|| {
            AppError::Serialization(format!("call {call_id} has unknown status '{raw}'"))
        })?,
    };

    // A completed legacy call is treated as settled so it is never charged again.
    let billing_finalized = doc
        .billing_finalized
        .unwrap_or(status == CallStatus::Completed);
    let billing_started = doc.billing_started.unwrap_or(billing_finalized);

    if billing_finalized && !billing_started {
        return Err(AppError::Serialization(format!(
            "call {call_id} is finalized but billing never started"
        )));
    }
    if status == CallStatus::Failed && billing_started {
        return Err(AppError::Serialization(format!(
            "call {call_id} is failed but billing started"
        )));
    }

    let created_at = doc.created_at.unwrap_or_default();
    let rate_per_second = doc
        .rate_per_second
        .or_else(|| doc.rate_per_minute.map(|rpm| rpm / Decimal::from(60)));

    Ok(Call {
        call_id,
        user_id,
        provider_id,
        call_type: doc.call_type.unwrap_or_default(),
        status,
        user_joined,
        provider_joined,
        media_published: doc.media_published.unwrap_or(false),
        billing_started,
        billing_finalized,
        rate_per_minute: doc.rate_per_minute,
        rate_per_second,
        elapsed_seconds: doc.elapsed_seconds.unwrap_or(0),
        accrued_amount: doc.accrued_amount.unwrap_or(Decimal::ZERO),
        provider_earning: doc.provider_earning.unwrap_or(Decimal::ZERO),
        created_at,
        connected_at: doc.connected_at,
        call_start_time: doc.call_start_time,
        call_end_time: doc.call_end_time,
        updated_at: doc.updated_at.unwrap_or(created_at),
        end_reason: doc.end_reason,
        settlement: doc.settlement,
    })
}
