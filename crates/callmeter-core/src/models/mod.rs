//! Domain models for CallMeter
//!
//! This module contains all the core domain models used throughout the engine.

pub mod call;
pub mod earning;
pub mod pricing;
pub mod schema;
pub mod wallet;

pub use call::{
    BillingStart, Call, CallPatch, CallStatus, CallType, FinalizeReason, MeterSnapshot,
    ParticipantRole, SettlementStatus,
};
pub use earning::{EarningRecord, ProviderProfile, ProviderStatus};
pub use pricing::{Pricing, RatingModel, ResolvedRate, DEFAULT_INCLUDED_MINUTES};
pub use schema::{migrate, CallDocument, CURRENT_SCHEMA_VERSION};
pub use wallet::{LedgerEntry, TransactionType, Wallet};
