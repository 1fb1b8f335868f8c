//! Per-call actor
//!
//! Every command for a call goes through that call's mailbox and is
//! handled to completion before the next one starts. The actor owns the
//! call's ticker and grace timer, so at most one ticker can exist per call.

use callmeter_core::{
    models::{
        BillingStart, Call, CallPatch, CallStatus, FinalizeReason, ParticipantRole,
        ProviderStatus, SettlementStatus,
    },
    traits::FinalizationClaim,
    AppError, AppResult,
};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::context::BillingContext;
use crate::outcomes::{AutoStart, BillingSnapshot, BillingStarted, FinalizeOutcome, SignalOutcome};
use crate::state_machine::{BillingEligibility, LeaveOutcome};
use crate::supervisor::ActorRegistry;
use crate::ticker::{BillingTicker, Meter, TickerExit, TickerSettings};

pub(crate) type Reply<T> = oneshot::Sender<AppResult<T>>;

pub(crate) enum CallCommand {
    Join {
        role: ParticipantRole,
        reply: Reply<SignalOutcome>,
    },
    Leave {
        role: ParticipantRole,
        reply: Reply<SignalOutcome>,
    },
    MediaPublished {
        reply: Reply<SignalOutcome>,
    },
    StartBilling {
        reply: Reply<BillingStarted>,
    },
    Finalize {
        reason: FinalizeReason,
        reply: Reply<FinalizeOutcome>,
    },
    Snapshot {
        reply: Reply<BillingSnapshot>,
    },
}

/// Grace timer armed when a call connects without media
#[derive(Debug, Clone, Copy)]
struct GraceTimer {
    fires_at: Instant,
    /// Wall-clock deadline used when re-checking eligibility
    deadline: DateTime<Utc>,
}

pub(crate) struct CallActor {
    call_id: String,
    generation: u64,
    ctx: Arc<BillingContext>,
    mailbox: mpsc::Receiver<CallCommand>,
    registry: Arc<ActorRegistry>,
    shutdown: CancellationToken,
    ticker: Option<BillingTicker>,
    grace: Option<GraceTimer>,
    last_status: Option<CallStatus>,
    missing: bool,
}

async fn ticker_exit(ticker: &mut Option<BillingTicker>) -> TickerExit {
    match ticker {
        Some(ticker) => ticker.exited().await,
        None => std::future::pending().await,
    }
}

async fn grace_elapsed(grace: Option<GraceTimer>) {
    match grace {
        Some(timer) => sleep_until(timer.fires_at).await,
        None => std::future::pending().await,
    }
}

impl CallActor {
    pub(crate) fn new(
        call_id: String,
        generation: u64,
        ctx: Arc<BillingContext>,
        mailbox: mpsc::Receiver<CallCommand>,
        registry: Arc<ActorRegistry>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            call_id,
            generation,
            ctx,
            mailbox,
            registry,
            shutdown,
            ticker: None,
            grace: None,
            last_status: None,
            missing: false,
        }
    }

    pub(crate) async fn run(mut self) {
        debug!(call_id = %self.call_id, generation = self.generation, "Call actor started");
        let idle_timeout = self.ctx.config.actor_idle_timeout();

        loop {
            let idle = self.ticker.is_none() && self.grace.is_none();
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    self.persist_on_shutdown().await;
                    break;
                }
                // Ticker exit is handled ahead of queued commands.
                exit = ticker_exit(&mut self.ticker) => self.on_ticker_exit(exit).await,
                command = self.mailbox.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                _ = grace_elapsed(self.grace) => self.on_grace_elapsed().await,
                _ = sleep(idle_timeout), if idle => {
                    debug!(call_id = %self.call_id, "Call actor idle, retiring");
                    break;
                }
            }

            if self.is_done() {
                break;
            }
        }

        self.registry
            .retire(&self.call_id, self.generation, &mut self.mailbox);
        // Anything still queued is dropped unanswered; senders retry on a
        // fresh actor.
        while self.mailbox.try_recv().is_ok() {}
        debug!(call_id = %self.call_id, "Call actor stopped");
    }

    fn is_done(&self) -> bool {
        self.ticker.is_none()
            && (self.missing || self.last_status.is_some_and(|s| s.is_terminal()))
    }

    async fn handle(&mut self, command: CallCommand) {
        match command {
            CallCommand::Join { role, reply } => {
                let result = self.on_join(role).await;
                let _ = reply.send(result);
            }
            CallCommand::Leave { role, reply } => {
                let result = self.on_leave(role).await;
                let _ = reply.send(result);
            }
            CallCommand::MediaPublished { reply } => {
                let result = self.on_media_published().await;
                let _ = reply.send(result);
            }
            CallCommand::StartBilling { reply } => {
                let result = self.on_start_billing().await;
                let _ = reply.send(result);
            }
            CallCommand::Finalize { reason, reply } => {
                let result = self.finalize(reason).await;
                let _ = reply.send(result);
            }
            CallCommand::Snapshot { reply } => {
                let result = self.on_snapshot().await;
                let _ = reply.send(result);
            }
        }
    }

    // ==================== Storage helpers ====================

    fn observe(&mut self, call: &Call) {
        self.missing = false;
        self.last_status = Some(call.status);
    }

    async fn load(&mut self) -> AppResult<Call> {
        let found = self.ctx.calls.find(&self.call_id).await?;
        match found {
            Some(call) => {
                self.observe(&call);
                Ok(call)
            }
            None => {
                self.missing = true;
                Err(AppError::call_not_found(&self.call_id))
            }
        }
    }

    async fn persist(&mut self, call: Call, patch: &CallPatch) -> AppResult<Call> {
        if patch.is_empty() {
            return Ok(call);
        }
        let call = self.ctx.calls.merge(&self.call_id, patch).await?;
        self.observe(&call);
        Ok(call)
    }

    // ==================== Signals ====================

    #[instrument(skip(self), fields(call_id = %self.call_id))]
    async fn on_join(&mut self, role: ParticipantRole) -> AppResult<SignalOutcome> {
        let call = self.load().await?;
        let transition = self.ctx.machine.mark_joined(&call, role, Utc::now());
        let call = self.persist(call, &transition.patch).await?;

        if transition.outcome.became_connected {
            info!("Call {} connected", self.call_id);
            self.arm_grace_timer(&call);
        }

        let mut outcome = SignalOutcome::from_call(&call);
        if transition.outcome.should_check_billing {
            outcome.billing = Some(self.try_auto_start(call).await);
            outcome.status = self.last_status;
        }
        Ok(outcome)
    }

    #[instrument(skip(self), fields(call_id = %self.call_id))]
    async fn on_media_published(&mut self) -> AppResult<SignalOutcome> {
        let call = self.load().await?;
        let transition = self.ctx.machine.mark_media_published(&call);
        let call = self.persist(call, &transition.patch).await?;

        if transition.outcome.first_publish {
            info!("Media published on call {}", self.call_id);
        }

        let mut outcome = SignalOutcome::from_call(&call);
        if transition.outcome.should_check_billing {
            outcome.billing = Some(self.try_auto_start(call).await);
            outcome.status = self.last_status;
        }
        Ok(outcome)
    }

    #[instrument(skip(self), fields(call_id = %self.call_id))]
    async fn on_leave(&mut self, role: ParticipantRole) -> AppResult<SignalOutcome> {
        let call = match self.load().await {
            Ok(call) => call,
            Err(e) if e.is_not_found() => {
                debug!("Leave for unknown call {}, ignoring", self.call_id);
                return Ok(SignalOutcome::unknown(&self.call_id));
            }
            Err(e) => return Err(e),
        };

        let now = Utc::now();
        let transition = self.ctx.machine.mark_left(&call, role, now);
        let call = self.persist(call, &transition.patch).await?;
        let mut outcome = SignalOutcome::from_call(&call);

        match transition.outcome {
            LeaveOutcome::FinalizeRequired => {
                info!("{} left call {} during billing, finalizing", role, self.call_id);
                let finalized = self.finalize(FinalizeReason::ParticipantLeft).await?;
                outcome.status = finalized.status;
                outcome.finalized = Some(finalized);
            }
            LeaveOutcome::Failed => {
                self.grace = None;
                info!("Both parties left call {} before billing, marked failed", self.call_id);
            }
            LeaveOutcome::Waiting | LeaveOutcome::Terminal => {}
        }

        Ok(outcome)
    }

    #[instrument(skip(self), fields(call_id = %self.call_id))]
    async fn on_snapshot(&mut self) -> AppResult<BillingSnapshot> {
        let call = self.load().await?;
        Ok(match &self.ticker {
            Some(ticker) => BillingSnapshot::new(&call, ticker.latest(), true),
            None => BillingSnapshot::new(&call, call.meter(), false),
        })
    }

    // ==================== Billing start ====================

    fn arm_grace_timer(&mut self, call: &Call) {
        if call.billing_started || call.media_published {
            return;
        }
        let Some(deadline) = self.ctx.machine.grace().deadline(call) else {
            return;
        };
        let remaining = (deadline - Utc::now()).to_std().unwrap_or_default();
        debug!("Grace timer armed for {:?}", remaining);
        self.grace = Some(GraceTimer {
            fires_at: Instant::now() + remaining,
            deadline,
        });
    }

    async fn on_grace_elapsed(&mut self) {
        let Some(timer) = self.grace.take() else {
            return;
        };
        let call = match self.load().await {
            Ok(call) => call,
            Err(e) => {
                warn!(call_id = %self.call_id, error = %e, "Grace timer fired for unreadable call");
                return;
            }
        };
        if call.billing_started || call.status.is_terminal() {
            return;
        }

        let now = Utc::now().max(timer.deadline);
        let eligibility = self.ctx.machine.can_start_billing(&call, now);
        if !eligibility.can_start {
            info!(
                call_id = %self.call_id,
                reason = eligibility.reason.as_deref().unwrap_or_default(),
                "Grace period elapsed, billing still not eligible"
            );
            return;
        }

        match self.begin_billing(call, now, &eligibility).await {
            Ok(started) => info!(
                call_id = %self.call_id,
                rate = %started.rate_per_second,
                "Billing started after grace period"
            ),
            Err(e) => warn!(call_id = %self.call_id, error = %e, "Grace period start rejected"),
        }
    }

    async fn try_auto_start(&mut self, call: Call) -> AutoStart {
        let now = Utc::now();
        let eligibility = self.ctx.machine.can_start_billing(&call, now);
        if !eligibility.can_start {
            return AutoStart::NotEligible {
                reason: eligibility.reason.unwrap_or_default(),
            };
        }

        match self.begin_billing(call, now, &eligibility).await {
            Ok(started) => AutoStart::Started(started),
            Err(e) => {
                warn!(call_id = %self.call_id, error = %e, "Automatic billing start rejected");
                AutoStart::Rejected {
                    code: e.error_code().to_string(),
                    message: e.to_string(),
                }
            }
        }
    }

    #[instrument(skip(self), fields(call_id = %self.call_id))]
    async fn on_start_billing(&mut self) -> AppResult<BillingStarted> {
        let call = self.load().await?;
        let now = Utc::now();
        let eligibility = self.ctx.machine.can_start_billing(&call, now);
        if !eligibility.can_start {
            let reason = eligibility.reason.unwrap_or_default();
            info!("Billing not eligible for call {}: {}", self.call_id, reason);
            return Err(AppError::BillingNotEligible(reason));
        }
        self.begin_billing(call, now, &eligibility).await
    }

    async fn begin_billing(
        &mut self,
        call: Call,
        now: DateTime<Utc>,
        eligibility: &BillingEligibility,
    ) -> AppResult<BillingStarted> {
        let ctx = Arc::clone(&self.ctx);
        let config = &ctx.config;
        let pricing = ctx.pricing.resolve_pricing(&call.provider_id).await?;
        let rate = pricing.resolved_rate();
        let required = pricing.minimum_balance_required(config.min_balance_window_minutes);

        let wallet = ctx.ledger.get_wallet(&call.user_id).await?;
        if wallet.balance < required {
            warn!(
                "Insufficient balance for call {}: required {}, available {}",
                self.call_id, required, wallet.balance
            );
            return Err(AppError::InsufficientBalance {
                required: required.to_string(),
                available: wallet.balance.to_string(),
            });
        }

        let start = BillingStart {
            started_at: now,
            rate_per_minute: rate.rate_per_minute,
            rate_per_second: rate.rate_per_second,
        };
        let call = ctx
            .calls
            .claim_billing_start(&self.call_id, &start)
            .await?
            .ok_or_else(|| AppError::BillingNotEligible("billing already started".into()))?;
        self.observe(&call);

        if let Err(e) = ctx
            .providers
            .set_status(&call.provider_id, ProviderStatus::Busy)
            .await
        {
            warn!("Could not mark provider {} busy: {}", call.provider_id, e);
        }

        let stops_on_exhaustion =
            config.stop_on_balance_exhausted && rate.rate_per_second > Decimal::ZERO;
        let max_billable_seconds = if stops_on_exhaustion {
            (wallet.balance / rate.rate_per_second).floor().to_u64()
        } else {
            None
        };

        let settings = TickerSettings {
            tick_interval: config.tick_interval(),
            snapshot_every: config.snapshot_interval_secs,
            max_billable_seconds,
        };
        let meter = Meter::new(rate.rate_per_second, config.provider_share());
        self.ticker = Some(BillingTicker::spawn(
            self.call_id.clone(),
            meter,
            settings,
            ctx.calls.clone(),
            &self.shutdown,
        ));
        self.grace = None;

        info!(
            "Billing started for call {} at {}/min ({}/s){}",
            self.call_id,
            rate.rate_per_minute,
            rate.rate_per_second,
            if eligibility.via_grace_period { " via grace period" } else { "" }
        );

        Ok(BillingStarted {
            call_id: self.call_id.clone(),
            rate_per_minute: rate.rate_per_minute,
            rate_per_second: rate.rate_per_second,
            started_at: now,
            via_grace_period: eligibility.via_grace_period,
            max_billable_seconds,
        })
    }

    // ==================== Finalization ====================

    /// Stop metering and settle. Safe to call any number of times; only
    /// the caller that claims finalization moves money.
    #[instrument(skip(self), fields(call_id = %self.call_id))]
    async fn finalize(&mut self, reason: FinalizeReason) -> AppResult<FinalizeOutcome> {
        self.grace = None;

        let live = match self.ticker.take() {
            Some(ticker) => {
                let meter = ticker.stop().await;
                // Keep storage exact in case the claim below fails and is retried.
                if let Err(e) = self.ctx.calls.record_snapshot(&self.call_id, &meter).await {
                    warn!("Could not persist final meter for call {}: {}", self.call_id, e);
                }
                Some(meter)
            }
            None => None,
        };

        let now = Utc::now();
        let claim = self.ctx.calls.claim_finalization(&self.call_id).await?;
        match claim {
            FinalizationClaim::NotFound => {
                self.missing = true;
                info!("Finalize for unknown call {}, nothing to do", self.call_id);
                Ok(FinalizeOutcome::not_found(&self.call_id))
            }
            FinalizationClaim::AlreadyFinalized(call) => {
                self.observe(&call);
                if !call.status.is_terminal() {
                    error!(
                        "Call {} is finalized but still {}; settlement may be incomplete",
                        self.call_id, call.status
                    );
                }
                info!("Call {} already finalized", self.call_id);
                Ok(FinalizeOutcome::from_call(&call, true))
            }
            FinalizationClaim::NotStarted(call) => {
                if call.status.is_terminal() {
                    self.observe(&call);
                    return Ok(FinalizeOutcome::from_call(&call, false));
                }
                let patch = CallPatch {
                    status: Some(CallStatus::Failed),
                    call_end_time: Some(now),
                    end_reason: Some(reason),
                    settlement: Some(SettlementStatus::NoCharge),
                    ..CallPatch::default()
                };
                let call = self.persist(call, &patch).await?;
                info!("Call {} ended ({}) before billing started", self.call_id, reason);
                Ok(FinalizeOutcome::from_call(&call, false))
            }
            FinalizationClaim::Claimed(call) => {
                let meter = live.unwrap_or_else(|| call.meter());
                let settlement = self.ctx.settlement.settle(&call, &meter).await;

                let patch = CallPatch {
                    status: Some(CallStatus::Completed),
                    call_end_time: Some(now),
                    meter: Some(meter),
                    end_reason: Some(reason),
                    settlement: Some(settlement),
                    ..CallPatch::default()
                };
                let call = self.persist(call, &patch).await?;

                info!(
                    "Call {} finalized ({}): {}s, accrued {}, provider earning {}",
                    self.call_id,
                    reason,
                    call.elapsed_seconds,
                    call.accrued_amount,
                    call.provider_earning
                );
                Ok(FinalizeOutcome::from_call(&call, false))
            }
        }
    }

    async fn on_ticker_exit(&mut self, exit: TickerExit) {
        match exit {
            TickerExit::BalanceExhausted => {
                if let Err(e) = self.finalize(FinalizeReason::BalanceExhausted).await {
                    error!(
                        call_id = %self.call_id,
                        error = %e,
                        "Finalize after balance exhaustion failed"
                    );
                }
            }
            TickerExit::Detached | TickerExit::Cancelled => {
                if let Some(ticker) = self.ticker.take() {
                    let meter = ticker.stop().await;
                    debug!(
                        call_id = %self.call_id,
                        elapsed = meter.elapsed_seconds,
                        ?exit,
                        "Ticker ended outside finalization"
                    );
                }
                if let Err(e) = self.load().await {
                    debug!(
                        call_id = %self.call_id,
                        error = %e,
                        "Could not reload call after ticker exit"
                    );
                }
            }
        }
    }

    async fn persist_on_shutdown(&mut self) {
        self.grace = None;
        if let Some(ticker) = self.ticker.take() {
            let meter = ticker.stop().await;
            match self.ctx.calls.record_snapshot(&self.call_id, &meter).await {
                Ok(_) => info!(
                    call_id = %self.call_id,
                    elapsed = meter.elapsed_seconds,
                    "Persisted meter on shutdown"
                ),
                Err(e) => error!(
                    call_id = %self.call_id,
                    error = %e,
                    "Failed to persist meter on shutdown"
                ),
            }
        }
    }
}
