//! Per-second billing ticker
//!
//! One ticker task runs per billed call. Each tick adds one billed second;
//! every `snapshot_every` seconds the meter is written to the call record.
//! The write is conditional on the call still billing, so a ticker that
//! outlives its call stops itself.

use callmeter_core::{models::MeterSnapshot, traits::CallRepository};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Elapsed billed time for one call at a fixed rate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Meter {
    rate_per_second: Decimal,
    /// Fraction of the accrued amount owed to the provider
    provider_share: Decimal,
    elapsed_seconds: u64,
}

impl Meter {
    pub fn new(rate_per_second: Decimal, provider_share: Decimal) -> Self {
        Self {
            rate_per_second,
            provider_share,
            elapsed_seconds: 0,
        }
    }

    #[inline]
    pub fn advance(&mut self) {
        self.elapsed_seconds += 1;
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.elapsed_seconds
    }

    /// Amounts are derived from elapsed time on every read, so they never
    /// drift from `elapsed * rate`.
    pub fn snapshot(&self) -> MeterSnapshot {
        let accrued = Decimal::from(self.elapsed_seconds) * self.rate_per_second;
        MeterSnapshot {
            elapsed_seconds: self.elapsed_seconds,
            accrued_amount: accrued,
            provider_earning: accrued * self.provider_share,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickerSettings {
    pub tick_interval: Duration,
    /// Persist the meter every N billed seconds
    pub snapshot_every: u64,
    /// Stop once this many seconds are billed
    pub max_billable_seconds: Option<u64>,
}

/// Why a ticker stopped on its own or was stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickerExit {
    Cancelled,
    /// The wallet cannot cover another second
    BalanceExhausted,
    /// The call record no longer accepts snapshots
    Detached,
}

/// Handle to a running ticker task
pub struct BillingTicker {
    call_id: String,
    cancel: CancellationToken,
    meter: watch::Receiver<MeterSnapshot>,
    exit: Option<oneshot::Receiver<TickerExit>>,
    task: JoinHandle<MeterSnapshot>,
}

impl BillingTicker {
    /// Start ticking. The first tick lands one interval from now.
    pub fn spawn(
        call_id: String,
        meter: Meter,
        settings: TickerSettings,
        calls: Arc<dyn CallRepository>,
        parent: &CancellationToken,
    ) -> Self {
        let cancel = parent.child_token();
        let (meter_tx, meter_rx) = watch::channel(meter.snapshot());
        let (exit_tx, exit_rx) = oneshot::channel();

        let period = settings.tick_interval;
        let interval = interval_at(Instant::now() + period, period);

        let task = tokio::spawn(run(
            call_id.clone(),
            meter,
            settings,
            interval,
            calls,
            cancel.clone(),
            meter_tx,
            exit_tx,
        ));

        Self {
            call_id,
            cancel,
            meter: meter_rx,
            exit: Some(exit_rx),
            task,
        }
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    /// Most recent in-memory meter value.
    pub fn latest(&self) -> MeterSnapshot {
        *self.meter.borrow()
    }

    /// Resolves once when the ticker loop ends; pending forever afterwards.
    pub async fn exited(&mut self) -> TickerExit {
        match self.exit.as_mut() {
            Some(rx) => {
                let exit = rx.await.unwrap_or(TickerExit::Cancelled);
                self.exit = None;
                exit
            }
            None => std::future::pending().await,
        }
    }

    /// Cancel the task and wait for it, returning the final meter.
    pub async fn stop(self) -> MeterSnapshot {
        self.cancel.cancel();
        match self.task.await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(
                    call_id = %self.call_id,
                    error = %e,
                    "Ticker task failed, using last published meter"
                );
                *self.meter.borrow()
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run(
    call_id: String,
    mut meter: Meter,
    settings: TickerSettings,
    mut interval: tokio::time::Interval,
    calls: Arc<dyn CallRepository>,
    cancel: CancellationToken,
    meter_tx: watch::Sender<MeterSnapshot>,
    exit_tx: oneshot::Sender<TickerExit>,
) -> MeterSnapshot {
    let snapshot_every = settings.snapshot_every.max(1);
    debug!(call_id = %call_id, "Ticker started");

    let exit = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break TickerExit::Cancelled,
            _ = interval.tick() => {
                meter.advance();
                let snapshot = meter.snapshot();
                meter_tx.send_replace(snapshot);

                let exhausted = settings
                    .max_billable_seconds
                    .is_some_and(|max| meter.elapsed_seconds() >= max);

                if exhausted || meter.elapsed_seconds() % snapshot_every == 0 {
                    match calls.record_snapshot(&call_id, &snapshot).await {
                        Ok(true) => debug!(
                            call_id = %call_id,
                            elapsed = snapshot.elapsed_seconds,
                            accrued = %snapshot.accrued_amount,
                            "Persisted meter snapshot"
                        ),
                        Ok(false) => {
                            info!(call_id = %call_id, "Call no longer billing, stopping ticker");
                            break TickerExit::Detached;
                        }
                        Err(e) => warn!(
                            call_id = %call_id,
                            error = %e,
                            "Failed to persist meter snapshot"
                        ),
                    }
                }

                if exhausted {
                    warn!(
                        call_id = %call_id,
                        elapsed = meter.elapsed_seconds(),
                        "Wallet balance exhausted, stopping ticker"
                    );
                    break TickerExit::BalanceExhausted;
                }
            }
        }
    };

    let _ = exit_tx.send(exit);
    debug!(call_id = %call_id, ?exit, "Ticker stopped");
    meter.snapshot()
}

#[cfg(test)]
mod tests {
    use super::*;
    use callmeter_core::models::{BillingStart, Call, CallPatch, CallStatus, CallType};
    use callmeter_store::InMemoryCallRepository;
    use chrono::Utc;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn settings(max: Option<u64>) -> TickerSettings {
        TickerSettings {
            tick_interval: Duration::from_secs(1),
            snapshot_every: 5,
            max_billable_seconds: max,
        }
    }

    async fn billing_call(repo: &InMemoryCallRepository) {
        repo.insert(&Call::new("c1", "u1", "p1", CallType::Voice, Utc::now()))
            .await
            .unwrap();
        let patch = CallPatch {
            status: Some(CallStatus::Connected),
            ..CallPatch::default()
        };
        repo.merge("c1", &patch).await.unwrap();
        let start = BillingStart {
            started_at: Utc::now(),
            rate_per_minute: dec!(60),
            rate_per_second: dec!(1),
        };
        repo.claim_billing_start("c1", &start).await.unwrap();
    }

    #[test]
    fn test_meter_accrues_linearly() {
        let mut meter = Meter::new(dec!(0.5), dec!(0.7));
        for _ in 0..10 {
            meter.advance();
        }
        let snap = meter.snapshot();
        assert_eq!(snap.elapsed_seconds, 10);
        assert_eq!(snap.accrued_amount, dec!(5));
        assert_eq!(snap.provider_earning, dec!(3.5));
    }

    proptest! {
        #[test]
        fn prop_accrual_is_elapsed_times_rate(
            seconds in 0u64..7_200,
            cents_per_second in 1i64..10_000,
        ) {
            let rate = Decimal::new(cents_per_second, 2);
            let mut meter = Meter::new(rate, Decimal::ONE);
            for _ in 0..seconds {
                meter.advance();
            }
            let snap = meter.snapshot();
            prop_assert_eq!(snap.elapsed_seconds, seconds);
            prop_assert_eq!(snap.accrued_amount, Decimal::from(seconds) * rate);
            prop_assert_eq!(snap.provider_earning, snap.accrued_amount);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_persists_every_five_seconds() {
        let repo = Arc::new(InMemoryCallRepository::new());
        billing_call(&repo).await;
        let root = CancellationToken::new();

        let ticker = BillingTicker::spawn(
            "c1".into(),
            Meter::new(dec!(1), dec!(1)),
            settings(None),
            repo.clone(),
            &root,
        );

        tokio::time::sleep(Duration::from_millis(7_500)).await;
        assert_eq!(ticker.latest().elapsed_seconds, 7);
        let stored = repo.find("c1").await.unwrap().unwrap();
        assert_eq!(stored.elapsed_seconds, 5);
        assert_eq!(stored.accrued_amount, dec!(5));

        let last = ticker.stop().await;
        assert_eq!(last.elapsed_seconds, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_stops_when_balance_exhausted() {
        let repo = Arc::new(InMemoryCallRepository::new());
        billing_call(&repo).await;
        let root = CancellationToken::new();

        let mut ticker = BillingTicker::spawn(
            "c1".into(),
            Meter::new(dec!(1), dec!(1)),
            settings(Some(3)),
            repo.clone(),
            &root,
        );

        assert_eq!(ticker.exited().await, TickerExit::BalanceExhausted);
        let last = ticker.stop().await;
        assert_eq!(last.elapsed_seconds, 3);
        assert_eq!(repo.find("c1").await.unwrap().unwrap().elapsed_seconds, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_detaches_from_finalized_call() {
        let repo = Arc::new(InMemoryCallRepository::new());
        billing_call(&repo).await;
        let root = CancellationToken::new();

        let mut ticker = BillingTicker::spawn(
            "c1".into(),
            Meter::new(dec!(1), dec!(1)),
            settings(None),
            repo.clone(),
            &root,
        );
        repo.claim_finalization("c1").await.unwrap();

        assert_eq!(ticker.exited().await, TickerExit::Detached);
        assert_eq!(ticker.stop().await.elapsed_seconds, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_cancellation_stops_ticker() {
        let repo = Arc::new(InMemoryCallRepository::new());
        billing_call(&repo).await;
        let root = CancellationToken::new();

        let mut ticker = BillingTicker::spawn(
            "c1".into(),
            Meter::new(dec!(1), dec!(1)),
            settings(None),
            repo.clone(),
            &root,
        );
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        root.cancel();

        assert_eq!(ticker.exited().await, TickerExit::Cancelled);
        assert_eq!(ticker.stop().await.elapsed_seconds, 2);
    }
}
