//! Call model
//!
//! A call between a paying user and a provider, together with the billing
//! meter that runs while both sides are present.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Call lifecycle status
///
/// `created -> connected -> billing_active -> completed`, or
/// `created|connected -> failed` when both parties leave before billing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    #[default]
    Created,
    Connected,
    BillingActive,
    Completed,
    Failed,
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Created => "created",
            CallStatus::Connected => "connected",
            CallStatus::BillingActive => "billing_active",
            CallStatus::Completed => "completed",
            CallStatus::Failed => "failed",
        }
    }

    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "created" => Some(CallStatus::Created),
            "connected" => Some(CallStatus::Connected),
            "billing_active" => Some(CallStatus::BillingActive),
            "completed" => Some(CallStatus::Completed),
            "failed" => Some(CallStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CallStatus::Completed | CallStatus::Failed)
    }
}

/// Media kind of the call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    #[default]
    Voice,
    Video,
}

impl fmt::Display for CallType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallType::Voice => write!(f, "voice"),
            CallType::Video => write!(f, "video"),
        }
    }
}

impl CallType {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "voice" | "audio" => Some(CallType::Voice),
            "video" => Some(CallType::Video),
            _ => None,
        }
    }
}

/// Which side of the call a presence signal refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    User,
    Provider,
}

impl fmt::Display for ParticipantRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParticipantRole::User => write!(f, "user"),
            ParticipantRole::Provider => write!(f, "provider"),
        }
    }
}

impl ParticipantRole {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "user" => Some(ParticipantRole::User),
            "provider" => Some(ParticipantRole::Provider),
            _ => None,
        }
    }

    /// Derive the role from a media-room identity such as `user-42`.
    pub fn from_identity(identity: &str) -> Option<Self> {
        if identity.starts_with("user-") {
            Some(ParticipantRole::User)
        } else if identity.starts_with("provider-") {
            Some(ParticipantRole::Provider)
        } else {
            None
        }
    }
}

/// Why billing was finalized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalizeReason {
    ParticipantLeft,
    CallEnded,
    GraceTimeout,
    AdminForceEnd,
    BalanceExhausted,
}

impl fmt::Display for FinalizeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FinalizeReason::ParticipantLeft => "participant_left",
            FinalizeReason::CallEnded => "call_ended",
            FinalizeReason::GraceTimeout => "grace_timeout",
            FinalizeReason::AdminForceEnd => "admin_force_end",
            FinalizeReason::BalanceExhausted => "balance_exhausted",
        };
        f.write_str(s)
    }
}

/// Outcome of the post-call money movement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SettlementStatus {
    /// User debited and provider credited
    Settled,
    /// Nothing accrued, no ledger movement
    NoCharge,
    /// The user debit was rejected; the call still completed
    DebitFailed { reason: String },
    /// The user was debited but the provider credit failed
    CreditFailed { reason: String },
}

impl SettlementStatus {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            SettlementStatus::DebitFailed { .. } | SettlementStatus::CreditFailed { .. }
        )
    }
}

/// Billed time and money at a point in the call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterSnapshot {
    pub elapsed_seconds: u64,
    pub accrued_amount: Decimal,
    pub provider_earning: Decimal,
}

/// Values fixed at the moment billing starts
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BillingStart {
    pub started_at: DateTime<Utc>,
    pub rate_per_minute: Decimal,
    pub rate_per_second: Decimal,
}

/// Call entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Call {
    pub call_id: String,
    pub user_id: String,
    pub provider_id: String,
    pub call_type: CallType,

    pub status: CallStatus,
    pub user_joined: bool,
    pub provider_joined: bool,
    pub media_published: bool,

    /// Set once, never reset
    pub billing_started: bool,
    /// Set once, only after `billing_started`
    pub billing_finalized: bool,

    pub rate_per_minute: Option<Decimal>,
    pub rate_per_second: Option<Decimal>,

    pub elapsed_seconds: u64,
    pub accrued_amount: Decimal,
    pub provider_earning: Decimal,

    pub created_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
    pub call_start_time: Option<DateTime<Utc>>,
    pub call_end_time: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,

    pub end_reason: Option<FinalizeReason>,
    pub settlement: Option<SettlementStatus>,
}

impl Call {
    pub fn new(
        call_id: impl Into<String>,
        user_id: impl Into<String>,
        provider_id: impl Into<String>,
        call_type: CallType,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            user_id: user_id.into(),
            provider_id: provider_id.into(),
            call_type,
            status: CallStatus::Created,
            user_joined: false,
            provider_joined: false,
            media_published: false,
            billing_started: false,
            billing_finalized: false,
            rate_per_minute: None,
            rate_per_second: None,
            elapsed_seconds: 0,
            accrued_amount: Decimal::ZERO,
            provider_earning: Decimal::ZERO,
            created_at: now,
            connected_at: None,
            call_start_time: None,
            call_end_time: None,
            updated_at: now,
            end_reason: None,
            settlement: None,
        }
    }

    pub fn both_joined(&self) -> bool {
        self.user_joined && self.provider_joined
    }

    pub fn is_present(&self, role: ParticipantRole) -> bool {
        match role {
            ParticipantRole::User => self.user_joined,
            ParticipantRole::Provider => self.provider_joined,
        }
    }

    pub fn meter(&self) -> MeterSnapshot {
        MeterSnapshot {
            elapsed_seconds: self.elapsed_seconds,
            accrued_amount: self.accrued_amount,
            provider_earning: self.provider_earning,
        }
    }

    /// Billing is running and has not been settled.
    pub fn is_billing_live(&self) -> bool {
        self.status == CallStatus::BillingActive && !self.billing_finalized
    }

    /// Merge the fields present in `patch`.
    pub fn apply(&mut self, patch: &CallPatch, now: DateTime<Utc>) {
        if let Some(v) = patch.user_joined {
            self.user_joined = v;
        }
        if let Some(v) = patch.provider_joined {
            self.provider_joined = v;
        }
        if let Some(v) = patch.media_published {
            self.media_published = v;
        }
        if let Some(v) = patch.status {
            self.status = v;
        }
        if let Some(v) = patch.connected_at {
            self.connected_at = Some(v);
        }
        if let Some(v) = patch.call_end_time {
            self.call_end_time = Some(v);
        }
        if let Some(meter) = patch.meter {
            self.elapsed_seconds = meter.elapsed_seconds;
            self.accrued_amount = meter.accrued_amount;
            self.provider_earning = meter.provider_earning;
        }
        if let Some(v) = patch.end_reason {
            self.end_reason = Some(v);
        }
        if let Some(v) = &patch.settlement {
            self.settlement = Some(v.clone());
        }
        self.updated_at = now;
    }

    /// Flip `billing_started`. Returns false if it was already set or the
    /// call is not in a state that can bill.
    pub fn begin_billing(&mut self, start: &BillingStart) -> bool {
        if self.billing_started
            || !matches!(self.status, CallStatus::Connected | CallStatus::BillingActive)
        {
            return false;
        }
        self.billing_started = true;
        self.status = CallStatus::BillingActive;
        self.call_start_time = Some(start.started_at);
        self.rate_per_minute = Some(start.rate_per_minute);
        self.rate_per_second = Some(start.rate_per_second);
        self.elapsed_seconds = 0;
        self.accrued_amount = Decimal::ZERO;
        self.provider_earning = Decimal::ZERO;
        self.updated_at = start.started_at;
        true
    }

    /// Flip `billing_finalized`. Returns false if billing never started or
    /// the flag was already set.
    pub fn claim_finalization(&mut self, now: DateTime<Utc>) -> bool {
        if !self.billing_started || self.billing_finalized {
            return false;
        }
        self.billing_finalized = true;
        self.updated_at = now;
        true
    }
}

/// Partial update of a call record. `None` leaves a field untouched.
///
/// The monotonic billing flags are deliberately absent; they only move
/// through [`Call::begin_billing`] and [`Call::claim_finalization`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallPatch {
    pub user_joined: Option<bool>,
    pub provider_joined: Option<bool>,
    pub media_published: Option<bool>,
    pub status: Option<CallStatus>,
    pub connected_at: Option<DateTime<Utc>>,
    pub call_end_time: Option<DateTime<Utc>>,
    pub meter: Option<MeterSnapshot>,
    pub end_reason: Option<FinalizeReason>,
    pub settlement: Option<SettlementStatus>,
}

impl CallPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn presence(role: ParticipantRole, present: bool) -> Self {
        match role {
            ParticipantRole::User => Self {
                user_joined: Some(present),
                ..Self::default()
            },
            ParticipantRole::Provider => Self {
                provider_joined: Some(present),
                ..Self::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn call() -> Call {
        Call::new("call-1", "user-1", "provider-1", CallType::Voice, Utc::now())
    }

    fn start() -> BillingStart {
        BillingStart {
            started_at: Utc::now(),
            rate_per_minute: dec!(60),
            rate_per_second: dec!(1),
        }
    }

    #[test]
    fn test_status_parse_round_trip() {
        for status in [
            CallStatus::Created,
            CallStatus::Connected,
            CallStatus::BillingActive,
            CallStatus::Completed,
            CallStatus::Failed,
        ] {
            assert_eq!(CallStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(CallStatus::from_str("ringing"), None);
        assert!(CallStatus::Failed.is_terminal());
        assert!(!CallStatus::BillingActive.is_terminal());
    }

    #[test]
    fn test_role_from_identity() {
        assert_eq!(
            ParticipantRole::from_identity("user-42"),
            Some(ParticipantRole::User)
        );
        assert_eq!(
            ParticipantRole::from_identity("provider-7"),
            Some(ParticipantRole::Provider)
        );
        assert_eq!(ParticipantRole::from_identity("bot-1"), None);
    }

    #[test]
    fn test_begin_billing_requires_connected() {
        let mut c = call();
        assert!(!c.begin_billing(&start()));
        assert!(!c.billing_started);

        c.status = CallStatus::Connected;
        assert!(c.begin_billing(&start()));
        assert_eq!(c.status, CallStatus::BillingActive);
        assert_eq!(c.rate_per_second, Some(dec!(1)));

        // second attempt is refused
        assert!(!c.begin_billing(&start()));
    }

    #[test]
    fn test_claim_finalization_once() {
        let mut c = call();
        assert!(!c.claim_finalization(Utc::now()));

        c.status = CallStatus::Connected;
        c.begin_billing(&start());
        assert!(c.claim_finalization(Utc::now()));
        assert!(!c.claim_finalization(Utc::now()));
        assert!(c.billing_finalized);
    }

    #[test]
    fn test_apply_patch_only_touches_present_fields() {
        let mut c = call();
        c.provider_joined = true;
        c.apply(&CallPatch::presence(ParticipantRole::User, true), Utc::now());
        assert!(c.user_joined);
        assert!(c.provider_joined);
        assert_eq!(c.status, CallStatus::Created);
        assert!(CallPatch::default().is_empty());
    }

    #[test]
    fn test_settlement_serialization() {
        let json = serde_json::to_value(SettlementStatus::DebitFailed {
            reason: "insufficient".into(),
        })
        .unwrap();
        assert_eq!(json["status"], "debit_failed");
        assert_eq!(json["reason"], "insufficient");
    }
}
