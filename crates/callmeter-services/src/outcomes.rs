//! Results returned by the billing service

use callmeter_core::models::{
    Call, CallStatus, FinalizeReason, MeterSnapshot, SettlementStatus,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::settlement::to_money;

/// Billing has begun for a call
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingStarted {
    pub call_id: String,
    pub rate_per_minute: Decimal,
    pub rate_per_second: Decimal,
    pub started_at: DateTime<Utc>,
    pub via_grace_period: bool,
    /// Seconds the wallet covered when billing started
    pub max_billable_seconds: Option<u64>,
}

/// What happened when a signal made the call eligible for billing
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AutoStart {
    Started(BillingStarted),
    NotEligible { reason: String },
    Rejected { code: String, message: String },
}

/// Result of a presence or media signal
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalOutcome {
    pub call_id: String,
    /// `None` when the call does not exist
    pub status: Option<CallStatus>,
    pub both_present: bool,
    pub media_published: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub billing: Option<AutoStart>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finalized: Option<FinalizeOutcome>,
}

impl SignalOutcome {
    pub fn from_call(call: &Call) -> Self {
        Self {
            call_id: call.call_id.clone(),
            status: Some(call.status),
            both_present: call.both_joined(),
            media_published: call.media_published,
            billing: None,
            finalized: None,
        }
    }

    pub fn unknown(call_id: &str) -> Self {
        Self {
            call_id: call_id.to_string(),
            status: None,
            both_present: false,
            media_published: false,
            billing: None,
            finalized: None,
        }
    }
}

/// Final numbers for a call
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeOutcome {
    pub call_id: String,
    pub found: bool,
    /// Another finalize got there first; no side effects were performed
    pub already_finalized: bool,
    pub status: Option<CallStatus>,
    pub elapsed_seconds: u64,
    pub accrued_amount: Decimal,
    pub provider_earning: Decimal,
    /// Amount actually debited from the user's wallet
    pub charged_amount: Decimal,
    pub end_reason: Option<FinalizeReason>,
    pub settlement: Option<SettlementStatus>,
}

impl FinalizeOutcome {
    pub fn from_call(call: &Call, already_finalized: bool) -> Self {
        let charged_amount = match call.settlement {
            Some(SettlementStatus::Settled) | Some(SettlementStatus::CreditFailed { .. }) => {
                to_money(call.accrued_amount)
            }
            _ => Decimal::ZERO,
        };
        Self {
            call_id: call.call_id.clone(),
            found: true,
            already_finalized,
            status: Some(call.status),
            elapsed_seconds: call.elapsed_seconds,
            accrued_amount: call.accrued_amount,
            provider_earning: call.provider_earning,
            charged_amount,
            end_reason: call.end_reason,
            settlement: call.settlement.clone(),
        }
    }

    pub fn not_found(call_id: &str) -> Self {
        Self {
            call_id: call_id.to_string(),
            found: false,
            already_finalized: false,
            status: None,
            elapsed_seconds: 0,
            accrued_amount: Decimal::ZERO,
            provider_earning: Decimal::ZERO,
            charged_amount: Decimal::ZERO,
            end_reason: None,
            settlement: None,
        }
    }
}

/// Current billing state of a call
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingSnapshot {
    pub call_id: String,
    pub status: CallStatus,
    pub billing_started: bool,
    pub billing_finalized: bool,
    /// True when read from a running ticker rather than storage
    pub live: bool,
    pub rate_per_second: Option<Decimal>,
    pub elapsed_seconds: u64,
    pub accrued_amount: Decimal,
    pub provider_earning: Decimal,
}

impl BillingSnapshot {
    pub fn new(call: &Call, meter: MeterSnapshot, live: bool) -> Self {
        Self {
            call_id: call.call_id.clone(),
            status: call.status,
            billing_started: call.billing_started,
            billing_finalized: call.billing_finalized,
            live,
            rate_per_second: call.rate_per_second,
            elapsed_seconds: meter.elapsed_seconds,
            accrued_amount: meter.accrued_amount,
            provider_earning: meter.provider_earning,
        }
    }
}
