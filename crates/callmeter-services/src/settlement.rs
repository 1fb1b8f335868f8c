//! Post-call settlement
//!
//! Moves money once a call's meter is final: debit the user, credit the
//! provider, and hand the provider back to the available pool. Each step
//! is idempotent on its own key, and a failure in one step is recorded on
//! the call rather than aborting the others.

use callmeter_core::{
    models::{Call, EarningRecord, MeterSnapshot, SettlementStatus},
    traits::{CreditOutcome, EarningsRepository, ProviderDirectory},
};
use rust_decimal::{Decimal, RoundingStrategy};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::constants::{CALL_CHARGE_PREFIX, MONEY_SCALE};
use crate::ledger::WalletLedger;

pub fn call_charge_id(call_id: &str) -> String {
    format!("{CALL_CHARGE_PREFIX}{call_id}")
}

/// Round to currency precision, half away from zero.
pub fn to_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Settlement service
pub struct SettlementService {
    ledger: Arc<WalletLedger>,
    earnings: Arc<dyn EarningsRepository>,
    providers: Arc<dyn ProviderDirectory>,
}

impl SettlementService {
    pub fn new(
        ledger: Arc<WalletLedger>,
        earnings: Arc<dyn EarningsRepository>,
        providers: Arc<dyn ProviderDirectory>,
    ) -> Self {
        Self {
            ledger,
            earnings,
            providers,
        }
    }

    /// Settle a finalized call. Never fails; the returned status says what
    /// happened to the money.
    #[instrument(skip(self, call, meter), fields(call_id = %call.call_id))]
    pub async fn settle(&self, call: &Call, meter: &MeterSnapshot) -> SettlementStatus {
        let charge = to_money(meter.accrued_amount);
        let earning = to_money(meter.provider_earning);
        let mut status = SettlementStatus::NoCharge;

        if charge > Decimal::ZERO {
            let note = format!("Call {} ({}s)", call.call_id, meter.elapsed_seconds);
            match self
                .ledger
                .debit(
                    &call.user_id,
                    charge,
                    &call_charge_id(&call.call_id),
                    Some(&call.call_id),
                    Some(note),
                )
                .await
            {
                Ok(receipt) => {
                    info!(
                        "Charged {} to {} for call {}{}",
                        charge,
                        call.user_id,
                        call.call_id,
                        if receipt.replayed { " (already recorded)" } else { "" }
                    );
                    status = SettlementStatus::Settled;
                }
                Err(e) => {
                    error!("Debit of {} from {} failed: {}", charge, call.user_id, e);
                    status = SettlementStatus::DebitFailed {
                        reason: e.to_string(),
                    };
                }
            }
        }

        if earning > Decimal::ZERO {
            let record =
                EarningRecord::new(call.provider_id.clone(), call.call_id.clone(), earning);
            match self.earnings.credit_once(record).await {
                Ok(CreditOutcome::Credited(record)) => {
                    info!("Credited {} to provider {}", record.amount, record.provider_id);
                }
                Ok(CreditOutcome::AlreadyCredited(record)) => {
                    info!(
                        "Earning for provider {} on call {} already credited",
                        record.provider_id, record.call_id
                    );
                }
                Err(e) => {
                    error!("Crediting provider {} failed: {}", call.provider_id, e);
                    if !status.is_failure() {
                        status = SettlementStatus::CreditFailed {
                            reason: e.to_string(),
                        };
                    }
                }
            }
        }

        match self.providers.release_if_busy(&call.provider_id).await {
            Ok(true) => info!("Provider {} is available again", call.provider_id),
            Ok(false) => {}
            Err(e) => warn!("Could not reset provider {} status: {}", call.provider_id, e),
        }

        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use callmeter_core::models::{CallType, ProviderStatus};
    use callmeter_core::{AppError, AppResult};
    use callmeter_store::{InMemoryProviderStore, InMemoryWalletRepository};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    struct FailingEarnings;

    #[async_trait]
    impl EarningsRepository for FailingEarnings {
        async fn credit_once(&self, _record: EarningRecord) -> AppResult<CreditOutcome> {
            Err(AppError::Unavailable("earnings store offline".into()))
        }

        async fn find(
            &self,
            _provider_id: &str,
            _call_id: &str,
        ) -> AppResult<Option<EarningRecord>> {
            Ok(None)
        }

        async fn list_for_provider(&self, _provider_id: &str) -> AppResult<Vec<EarningRecord>> {
            Ok(Vec::new())
        }
    }

    struct Fixture {
        ledger: Arc<WalletLedger>,
        providers: Arc<InMemoryProviderStore>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                ledger: Arc::new(WalletLedger::new(Arc::new(InMemoryWalletRepository::new()))),
                providers: Arc::new(InMemoryProviderStore::new()),
            }
        }

        fn service(&self) -> SettlementService {
            SettlementService::new(
                self.ledger.clone(),
                self.providers.clone(),
                self.providers.clone(),
            )
        }
    }

    fn call() -> Call {
        Call::new("c1", "u1", "p1", CallType::Voice, Utc::now())
    }

    fn meter(seconds: u64, rate: Decimal) -> MeterSnapshot {
        let accrued = Decimal::from(seconds) * rate;
        MeterSnapshot {
            elapsed_seconds: seconds,
            accrued_amount: accrued,
            provider_earning: accrued,
        }
    }

    #[test]
    fn test_to_money_rounds_half_up() {
        assert_eq!(to_money(dec!(0.125)), dec!(0.13));
        assert_eq!(to_money(dec!(0.8333333)), dec!(0.83));
    }

    #[tokio::test]
    async fn test_settle_charges_and_credits() {
        let fx = Fixture::new();
        fx.ledger.credit("u1", dec!(1000), "topup-1", None).await.unwrap();
        fx.providers.set_status("p1", ProviderStatus::Busy).await.unwrap();

        let status = fx.service().settle(&call(), &meter(95, dec!(1))).await;
        assert_eq!(status, SettlementStatus::Settled);

        assert_eq!(fx.ledger.get_wallet("u1").await.unwrap().balance, dec!(905));
        let profile = fx.providers.profile("p1").await.unwrap().unwrap();
        assert_eq!(profile.total_earnings, dec!(95));
        assert_eq!(profile.status, ProviderStatus::Online);
    }

    #[tokio::test]
    async fn test_settle_twice_moves_money_once() {
        let fx = Fixture::new();
        fx.ledger.credit("u1", dec!(1000), "topup-1", None).await.unwrap();
        let svc = fx.service();

        svc.settle(&call(), &meter(95, dec!(1))).await;
        let again = svc.settle(&call(), &meter(95, dec!(1))).await;
        assert_eq!(again, SettlementStatus::Settled);

        assert_eq!(fx.ledger.get_wallet("u1").await.unwrap().balance, dec!(905));
        let profile = fx.providers.profile("p1").await.unwrap().unwrap();
        assert_eq!(profile.total_earnings, dec!(95));
    }

    #[tokio::test]
    async fn test_zero_meter_is_no_charge() {
        let fx = Fixture::new();
        let status = fx.service().settle(&call(), &meter(0, dec!(1))).await;
        assert_eq!(status, SettlementStatus::NoCharge);
        assert!(fx.ledger.find_transaction("call-charge-c1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_debit_failure_is_recorded() {
        let fx = Fixture::new();
        fx.ledger.credit("u1", dec!(10), "topup-1", None).await.unwrap();

        let status = fx.service().settle(&call(), &meter(95, dec!(1))).await;
        assert!(matches!(status, SettlementStatus::DebitFailed { .. }));
        assert_eq!(fx.ledger.get_wallet("u1").await.unwrap().balance, dec!(10));
    }

    #[tokio::test]
    async fn test_credit_failure_is_recorded() {
        let fx = Fixture::new();
        fx.ledger.credit("u1", dec!(1000), "topup-1", None).await.unwrap();
        let svc = SettlementService::new(
            fx.ledger.clone(),
            Arc::new(FailingEarnings),
            fx.providers.clone(),
        );

        let status = svc.settle(&call(), &meter(10, dec!(1))).await;
        assert!(matches!(status, SettlementStatus::CreditFailed { .. }));
        assert_eq!(fx.ledger.get_wallet("u1").await.unwrap().balance, dec!(990));
    }
}
