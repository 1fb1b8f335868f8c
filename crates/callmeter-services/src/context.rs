//! Shared dependencies for the call actors

use callmeter_core::{
    traits::{CallRepository, ProviderDirectory},
    BillingConfig,
};
use std::sync::Arc;

use crate::ledger::WalletLedger;
use crate::pricing::PricingService;
use crate::settlement::SettlementService;
use crate::state_machine::CallStateMachine;

/// Everything a call actor needs, shared by all of them
pub struct BillingContext {
    pub calls: Arc<dyn CallRepository>,
    pub providers: Arc<dyn ProviderDirectory>,
    pub ledger: Arc<WalletLedger>,
    pub pricing: Arc<PricingService>,
    pub settlement: Arc<SettlementService>,
    pub machine: CallStateMachine,
    pub config: BillingConfig,
}
