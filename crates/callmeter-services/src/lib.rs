//! Billing services for CallMeter
//!
//! This crate holds the engine that meters calls between users and
//! providers in real time:
//!
//! - `CallStateMachine` - presence, media, and eligibility transitions
//! - `BillingTicker` - per-second metering with periodic snapshots
//! - `WalletLedger` - idempotent, append-only balance changes
//! - `PricingService` - provider pricing and quotes
//! - `SettlementService` - post-call debit and provider credit
//! - `CallSupervisor` - one actor per call, serializing its commands
//! - `BillingService` - the facade tying it together
//!
//! # Architecture
//!
//! Each call is owned by an actor task. Signals for a call are queued on
//! its mailbox and handled one at a time, and the actor is the only owner
//! of the call's ticker. Money moves only at finalization, keyed by
//! deterministic transaction ids, so retries never double charge.

mod actor;
pub mod billing;
pub mod context;
pub mod ledger;
pub mod outcomes;
pub mod pricing;
pub mod settlement;
pub mod state_machine;
pub mod supervisor;
pub mod ticker;

pub use billing::{BillingService, NewCall, Repositories};
pub use ledger::{LedgerReceipt, WalletLedger};
pub use outcomes::{AutoStart, BillingSnapshot, BillingStarted, FinalizeOutcome, SignalOutcome};
pub use pricing::{PricingService, PricingUpdate};
pub use settlement::SettlementService;
pub use state_machine::{BillingEligibility, CallStateMachine, GracePeriodPolicy, LeaveOutcome};
pub use supervisor::CallSupervisor;
pub use ticker::{BillingTicker, Meter, TickerExit, TickerSettings};

/// Business logic constants
pub mod constants {
    /// Transaction id prefix for the end-of-call user debit
    pub const CALL_CHARGE_PREFIX: &str = "call-charge-";

    /// Transaction id prefixes for holds
    pub const HOLD_PREFIX: &str = "hold-";
    pub const RELEASE_PREFIX: &str = "release-";
    pub const HOLD_COMPLETE_PREFIX: &str = "hold-complete-";

    /// Decimal places for amounts moved through the ledger
    pub const MONEY_SCALE: u32 = 2;

    /// Attempts to reach a call actor before giving up
    pub const MAX_DISPATCH_ATTEMPTS: usize = 3;
}
