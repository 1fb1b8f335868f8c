//! Billing service facade
//!
//! The single entry point used by the HTTP layer and by media-room
//! webhooks. Reads go straight to storage; anything that can change a
//! call is routed through that call's actor.

use callmeter_core::{
    models::{Call, CallType, FinalizeReason, ParticipantRole, ProviderProfile},
    traits::{
        CallRepository, EarningsRepository, PricingRepository, ProviderDirectory, WalletRepository,
    },
    AppError, AppResult, BillingConfig,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::actor::CallCommand;
use crate::context::BillingContext;
use crate::ledger::WalletLedger;
use crate::outcomes::{BillingSnapshot, BillingStarted, FinalizeOutcome, SignalOutcome};
use crate::pricing::PricingService;
use crate::settlement::SettlementService;
use crate::state_machine::{BillingEligibility, CallStateMachine, GracePeriodPolicy};
use crate::supervisor::CallSupervisor;

/// Storage backends the engine runs on
#[derive(Clone)]
pub struct Repositories {
    pub calls: Arc<dyn CallRepository>,
    pub wallets: Arc<dyn WalletRepository>,
    pub pricing: Arc<dyn PricingRepository>,
    pub earnings: Arc<dyn EarningsRepository>,
    pub providers: Arc<dyn ProviderDirectory>,
}

/// Request to open a new call
#[derive(Debug, Clone)]
pub struct NewCall {
    pub call_id: Option<String>,
    pub user_id: String,
    pub provider_id: String,
    pub call_type: CallType,
}

/// Billing service
pub struct BillingService {
    ctx: Arc<BillingContext>,
    supervisor: CallSupervisor,
}

impl BillingService {
    /// Wire the engine. Must be called from within a Tokio runtime.
    pub fn new(repos: Repositories, config: BillingConfig) -> AppResult<Self> {
        config.validate()?;

        let ledger = Arc::new(WalletLedger::new(repos.wallets.clone()));
        let pricing = Arc::new(PricingService::new(repos.pricing.clone(), config.default_rate()));
        let settlement = Arc::new(SettlementService::new(
            ledger.clone(),
            repos.earnings.clone(),
            repos.providers.clone(),
        ));
        let machine = CallStateMachine::new(GracePeriodPolicy::from_config(&config));

        let ctx = Arc::new(BillingContext {
            calls: repos.calls,
            providers: repos.providers,
            ledger,
            pricing,
            settlement,
            machine,
            config,
        });
        let supervisor = CallSupervisor::new(ctx.clone())?;

        Ok(Self { ctx, supervisor })
    }

    pub fn ledger(&self) -> &WalletLedger {
        &self.ctx.ledger
    }

    pub fn pricing(&self) -> &PricingService {
        &self.ctx.pricing
    }

    pub fn supervisor(&self) -> &CallSupervisor {
        &self.supervisor
    }

    pub fn config(&self) -> &BillingConfig {
        &self.ctx.config
    }

    // ==================== Calls ====================

    #[instrument(skip(self))]
    pub async fn create_call(&self, request: NewCall) -> AppResult<Call> {
        if request.user_id.trim().is_empty() || request.provider_id.trim().is_empty() {
            return Err(AppError::InvalidInput(
                "userId and providerId are required".into(),
            ));
        }
        if request.user_id == request.provider_id {
            return Err(AppError::InvalidInput(
                "a user cannot call themselves".into(),
            ));
        }

        let call_id = request
            .call_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let call = Call::new(
            call_id,
            request.user_id,
            request.provider_id,
            request.call_type,
            Utc::now(),
        );
        self.ctx.calls.insert(&call).await?;

        info!(
            "Created {} call {} from {} to {}",
            call.call_type, call.call_id, call.user_id, call.provider_id
        );
        Ok(call)
    }

    pub async fn get_call(&self, call_id: &str) -> AppResult<Call> {
        self.ctx
            .calls
            .find(call_id)
            .await?
            .ok_or_else(|| AppError::call_not_found(call_id))
    }

    pub async fn list_settlement_failures(&self) -> AppResult<Vec<Call>> {
        self.ctx.calls.list_settlement_failures().await
    }

    // ==================== Signals ====================

    /// A participant entered the media room. Starts billing when this
    /// completes the eligibility conditions.
    pub async fn participant_joined(
        &self,
        call_id: &str,
        role: ParticipantRole,
    ) -> AppResult<SignalOutcome> {
        self.supervisor
            .request(call_id, |reply| CallCommand::Join { role, reply })
            .await
    }

    /// A participant left. Finalizes billing if it was running; an unknown
    /// call is ignored.
    pub async fn participant_left(
        &self,
        call_id: &str,
        role: ParticipantRole,
    ) -> AppResult<SignalOutcome> {
        self.supervisor
            .request(call_id, |reply| CallCommand::Leave { role, reply })
            .await
    }

    pub async fn media_track_published(&self, call_id: &str) -> AppResult<SignalOutcome> {
        self.supervisor
            .request(call_id, |reply| CallCommand::MediaPublished { reply })
            .await
    }

    // ==================== Billing ====================

    pub async fn check_eligibility(&self, call_id: &str) -> AppResult<BillingEligibility> {
        let call = self.get_call(call_id).await?;
        Ok(self.ctx.machine.can_start_billing(&call, Utc::now()))
    }

    pub async fn start_billing(&self, call_id: &str) -> AppResult<BillingStarted> {
        self.supervisor
            .request(call_id, |reply| CallCommand::StartBilling { reply })
            .await
    }

    /// Idempotent. Concurrent or repeated calls settle exactly once.
    pub async fn finalize_billing(
        &self,
        call_id: &str,
        reason: FinalizeReason,
    ) -> AppResult<FinalizeOutcome> {
        self.supervisor
            .request(call_id, |reply| CallCommand::Finalize { reason, reply })
            .await
    }

    /// Live meter when a ticker is running, otherwise the stored values.
    pub async fn billing_snapshot(&self, call_id: &str) -> AppResult<BillingSnapshot> {
        if self.supervisor.has_actor(call_id) {
            return self
                .supervisor
                .request(call_id, |reply| CallCommand::Snapshot { reply })
                .await;
        }
        let call = self.get_call(call_id).await?;
        Ok(BillingSnapshot::new(&call, call.meter(), false))
    }

    // ==================== Providers ====================

    pub async fn provider_profile(&self, provider_id: &str) -> AppResult<ProviderProfile> {
        self.ctx
            .providers
            .profile(provider_id)
            .await?
            .ok_or_else(|| AppError::RecordNotFound {
                kind: "Provider",
                id: provider_id.to_string(),
            })
    }

    /// Stop all actors. Running meters are persisted; their calls stay
    /// `billing_active` and can be finalized after restart.
    pub async fn shutdown(&self) {
        self.supervisor.shutdown().await;
    }
}
