//! Storage abstractions
//!
//! The engine only needs single-record atomic updates: conditional writes
//! on a call, and read-check-append on one wallet. Implementations must
//! make each method atomic with respect to the record it touches.

use crate::error::AppError;
use crate::models::{
    BillingStart, Call, CallPatch, CallStatus, EarningRecord, LedgerEntry, MeterSnapshot, Pricing,
    ProviderProfile, ProviderStatus, Wallet,
};
use async_trait::async_trait;

/// Result of trying to claim a call for settlement
#[derive(Debug, Clone, PartialEq)]
pub enum FinalizationClaim {
    /// This caller flipped `billing_finalized` and must settle
    Claimed(Call),
    /// Someone else already settled; the stored record is returned
    AlreadyFinalized(Call),
    /// Billing never started, so there is nothing to settle
    NotStarted(Call),
    NotFound,
}

/// Call repository
#[async_trait]
pub trait CallRepository: Send + Sync {
    /// Create a call. Fails with `Conflict` if the id is taken.
    async fn insert(&self, call: &Call) -> Result<(), AppError>;

    /// Load and normalize a call document.
    async fn find(&self, call_id: &str) -> Result<Option<Call>, AppError>;

    /// Merge `patch` into the stored call and return the result.
    async fn merge(&self, call_id: &str, patch: &CallPatch) -> Result<Call, AppError>;

    /// Persist ticker progress, only while billing is live. Returns false
    /// when the call is no longer billing and the ticker should stop.
    async fn record_snapshot(&self, call_id: &str, snapshot: &MeterSnapshot)
        -> Result<bool, AppError>;

    /// Set `billing_started` once. `None` when already started or the call
    /// is not connected.
    async fn claim_billing_start(
        &self,
        call_id: &str,
        start: &BillingStart,
    ) -> Result<Option<Call>, AppError>;

    /// Set `billing_finalized` once.
    async fn claim_finalization(&self, call_id: &str) -> Result<FinalizationClaim, AppError>;

    async fn list_by_status(&self, status: CallStatus) -> Result<Vec<Call>, AppError>;

    /// Completed calls whose settlement recorded a failure.
    async fn list_settlement_failures(&self) -> Result<Vec<Call>, AppError>;
}

/// Plans a ledger entry against the wallet as it is at apply time.
/// Returning `Ok(None)` means there is nothing to append.
pub type LedgerPlan =
    Box<dyn FnOnce(&Wallet) -> Result<Option<LedgerEntry>, AppError> + Send + 'static>;

/// A ledger entry together with the wallet it was written to
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEntry {
    pub account_id: String,
    pub entry: LedgerEntry,
}

/// Result of applying a ledger plan
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerOutcome {
    Applied(LedgerEntry),
    /// An entry with the same id already exists, possibly on another wallet
    Duplicate(RecordedEntry),
    /// The plan produced no entry
    Skipped,
}

/// Wallet repository
#[async_trait]
pub trait WalletRepository: Send + Sync {
    async fn find(&self, account_id: &str) -> Result<Option<Wallet>, AppError>;

    /// Load the wallet, creating an empty one on first access.
    async fn find_or_create(&self, account_id: &str) -> Result<Wallet, AppError>;

    /// Look up an entry by idempotency key across all wallets.
    async fn find_entry(&self, tx_id: &str) -> Result<Option<RecordedEntry>, AppError>;

    /// Atomically: run `plan`, reject duplicate ids, reject a balance that
    /// would go negative, then append the entry.
    async fn apply(&self, account_id: &str, plan: LedgerPlan) -> Result<LedgerOutcome, AppError>;
}

/// Pricing repository
#[async_trait]
pub trait PricingRepository: Send + Sync {
    async fn find(&self, provider_id: &str) -> Result<Option<Pricing>, AppError>;

    async fn upsert(&self, pricing: &Pricing) -> Result<Pricing, AppError>;

    async fn list(&self) -> Result<Vec<Pricing>, AppError>;
}

/// Result of an earnings credit
#[derive(Debug, Clone, PartialEq)]
pub enum CreditOutcome {
    Credited(EarningRecord),
    AlreadyCredited(EarningRecord),
}

/// Earnings ledger
#[async_trait]
pub trait EarningsRepository: Send + Sync {
    /// Record the earning and bump the provider's running total, unless
    /// the `(provider, call)` record is already credited.
    async fn credit_once(&self, record: EarningRecord) -> Result<CreditOutcome, AppError>;

    async fn find(&self, provider_id: &str, call_id: &str)
        -> Result<Option<EarningRecord>, AppError>;

    async fn list_for_provider(&self, provider_id: &str) -> Result<Vec<EarningRecord>, AppError>;
}

/// Provider availability directory
#[async_trait]
pub trait ProviderDirectory: Send + Sync {
    async fn profile(&self, provider_id: &str) -> Result<Option<ProviderProfile>, AppError>;

    async fn set_status(&self, provider_id: &str, status: ProviderStatus)
        -> Result<ProviderProfile, AppError>;

    /// Move `busy` back to `online`; other states are left alone.
    async fn release_if_busy(&self, provider_id: &str) -> Result<bool, AppError>;
}
