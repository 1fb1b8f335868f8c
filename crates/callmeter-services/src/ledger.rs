//! Wallet ledger
//!
//! Every balance change is an append-only entry keyed by a caller-supplied
//! transaction id. Replaying an id with the same operation returns the
//! original entry; replaying it with a different amount is reported as a
//! ledger inconsistency and nothing is applied.

use callmeter_core::{
    models::{LedgerEntry, TransactionType, Wallet},
    traits::{LedgerOutcome, LedgerPlan, RecordedEntry, WalletRepository},
    AppError, AppResult,
};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::constants::{HOLD_COMPLETE_PREFIX, HOLD_PREFIX, RELEASE_PREFIX};

pub fn hold_id(call_id: &str) -> String {
    format!("{HOLD_PREFIX}{call_id}")
}

pub fn release_id(call_id: &str) -> String {
    format!("{RELEASE_PREFIX}{call_id}")
}

pub fn hold_complete_id(call_id: &str) -> String {
    format!("{HOLD_COMPLETE_PREFIX}{call_id}")
}

/// Result of a ledger write
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerReceipt {
    pub entry: LedgerEntry,
    /// True when the id was already recorded and nothing new was applied
    pub replayed: bool,
}

/// Wallet ledger service
pub struct WalletLedger {
    wallets: Arc<dyn WalletRepository>,
}

impl WalletLedger {
    pub fn new(wallets: Arc<dyn WalletRepository>) -> Self {
        Self { wallets }
    }

    /// Wallet for the account, created empty on first access.
    pub async fn get_wallet(&self, account_id: &str) -> AppResult<Wallet> {
        self.wallets.find_or_create(account_id).await
    }

    /// Entries newest first, optionally truncated.
    pub async fn transaction_history(
        &self,
        account_id: &str,
        limit: Option<usize>,
    ) -> AppResult<Vec<LedgerEntry>> {
        let wallet = self
            .wallets
            .find(account_id)
            .await?
            .ok_or_else(|| AppError::wallet_not_found(account_id))?;
        let limit = limit.unwrap_or(usize::MAX);
        Ok(wallet.transactions.into_iter().rev().take(limit).collect())
    }

    pub async fn find_transaction(&self, tx_id: &str) -> AppResult<Option<LedgerEntry>> {
        Ok(self.wallets.find_entry(tx_id).await?.map(|recorded| recorded.entry))
    }

    #[instrument(skip(self, note))]
    pub async fn credit(
        &self,
        account_id: &str,
        amount: Decimal,
        tx_id: &str,
        note: Option<String>,
    ) -> AppResult<LedgerReceipt> {
        ensure_positive(amount)?;
        let mut entry =
            LedgerEntry::new(tx_id, TransactionType::Credit, amount, amount, Utc::now());
        entry.note = note;
        self.record_fixed(account_id, entry).await
    }

    /// Debit a wallet. Fails with `InsufficientBalance` rather than letting
    /// the balance go negative.
    #[instrument(skip(self, note))]
    pub async fn debit(
        &self,
        account_id: &str,
        amount: Decimal,
        tx_id: &str,
        call_id: Option<&str>,
        note: Option<String>,
    ) -> AppResult<LedgerReceipt> {
        ensure_positive(amount)?;
        let mut entry =
            LedgerEntry::new(tx_id, TransactionType::Debit, amount, -amount, Utc::now());
        entry.call_id = call_id.map(str::to_string);
        entry.note = note;
        self.record_fixed(account_id, entry).await
    }

    /// Reserve `amount` for a call.
    #[instrument(skip(self))]
    pub async fn hold(
        &self,
        account_id: &str,
        call_id: &str,
        amount: Decimal,
    ) -> AppResult<LedgerReceipt> {
        ensure_positive(amount)?;
        let tx_id = hold_id(call_id);
        let entry = LedgerEntry::new(tx_id, TransactionType::Hold, amount, -amount, Utc::now())
            .with_call(call_id)
            .with_note(format!("Hold for call {call_id}"));
        self.record_fixed(account_id, entry).await
    }

    /// Return an open hold to the balance. `None` when there is no hold to
    /// release.
    #[instrument(skip(self))]
    pub async fn release_hold(
        &self,
        account_id: &str,
        call_id: &str,
    ) -> AppResult<Option<LedgerReceipt>> {
        let tx_id = release_id(call_id);
        if let Some(recorded) = self.wallets.find_entry(&tx_id).await? {
            let entry = same_account(recorded, account_id)?;
            return Ok(Some(LedgerReceipt { entry, replayed: true }));
        }

        let owned_call = call_id.to_string();
        let plan: LedgerPlan = Box::new(move |wallet: &Wallet| {
            Ok(wallet.active_hold(&owned_call).map(|hold| {
                let refund = hold.amount;
                LedgerEntry::new(tx_id, TransactionType::HoldRelease, refund, refund, Utc::now())
                    .with_call(owned_call.as_str())
                    .with_note(format!("Released hold for call {owned_call}"))
            }))
        });

        match self.wallets.apply(account_id, plan).await? {
            LedgerOutcome::Applied(entry) => {
                info!("Released hold of {} for call {}", entry.amount, call_id);
                Ok(Some(LedgerReceipt { entry, replayed: false }))
            }
            LedgerOutcome::Duplicate(recorded) => {
                let entry = same_account(recorded, account_id)?;
                Ok(Some(LedgerReceipt { entry, replayed: true }))
            }
            LedgerOutcome::Skipped => {
                warn!("No open hold to release for call {}", call_id);
                Ok(None)
            }
        }
    }

    /// Settle an open hold at `final_amount`, refunding or charging the
    /// difference.
    #[instrument(skip(self))]
    pub async fn complete_hold(
        &self,
        account_id: &str,
        call_id: &str,
        final_amount: Decimal,
    ) -> AppResult<LedgerReceipt> {
        if final_amount < Decimal::ZERO {
            return Err(AppError::Validation("amount must not be negative".into()));
        }

        let tx_id = hold_complete_id(call_id);
        if let Some(existing) = self.wallets.find_entry(&tx_id).await? {
            return replay_or_conflict(
                existing,
                account_id,
                TransactionType::HoldComplete,
                final_amount,
            );
        }

        let owned_call = call_id.to_string();
        let plan_tx = tx_id.clone();
        let plan: LedgerPlan = Box::new(move |wallet: &Wallet| {
            let hold = wallet.active_hold(&owned_call).ok_or_else(|| AppError::RecordNotFound {
                kind: "Hold",
                id: hold_id(&owned_call),
            })?;
            let delta = hold.amount - final_amount;
            let entry = LedgerEntry::new(
                plan_tx,
                TransactionType::HoldComplete,
                final_amount,
                delta,
                Utc::now(),
            );
            Ok(Some(
                entry
                    .with_call(owned_call.as_str())
                    .with_note(format!("Completed hold of {} at {}", hold.amount, final_amount)),
            ))
        });

        match self.wallets.apply(account_id, plan).await? {
            LedgerOutcome::Applied(entry) => {
                info!(
                    "Completed hold for call {}: charged {}, balance change {}",
                    call_id, entry.amount, entry.balance_delta
                );
                Ok(LedgerReceipt { entry, replayed: false })
            }
            LedgerOutcome::Duplicate(existing) => replay_or_conflict(
                existing,
                account_id,
                TransactionType::HoldComplete,
                final_amount,
            ),
            LedgerOutcome::Skipped => Err(AppError::Internal(format!(
                "hold completion for call {call_id} produced no entry"
            ))),
        }
    }

    async fn record_fixed(&self, account_id: &str, entry: LedgerEntry) -> AppResult<LedgerReceipt> {
        let intended = entry.clone();
        let plan: LedgerPlan = Box::new(move |_wallet: &Wallet| Ok(Some(entry)));

        match self.wallets.apply(account_id, plan).await {
            Ok(LedgerOutcome::Applied(entry)) => {
                info!(
                    "Applied {} {} to {} (tx {}), balance {}",
                    entry.tx_type, entry.amount, account_id, entry.id, entry.balance_after
                );
                Ok(LedgerReceipt { entry, replayed: false })
            }
            Ok(LedgerOutcome::Duplicate(existing)) => {
                replay_or_conflict(existing, account_id, intended.tx_type, intended.amount)
            }
            Ok(LedgerOutcome::Skipped) => Err(AppError::Internal(format!(
                "ledger entry {} was not applied",
                intended.id
            ))),
            Err(e @ AppError::InsufficientBalance { .. }) => {
                warn!(
                    "Rejected {} {} for {} (tx {}): {}",
                    intended.tx_type, intended.amount, account_id, intended.id, e
                );
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}

fn ensure_positive(amount: Decimal) -> AppResult<()> {
    if amount <= Decimal::ZERO {
        return Err(AppError::Validation("amount must be greater than 0".into()));
    }
    Ok(())
}

/// An id is global across wallets; a replay must target the wallet that
/// recorded it.
fn same_account(recorded: RecordedEntry, account_id: &str) -> AppResult<LedgerEntry> {
    if recorded.account_id == account_id {
        return Ok(recorded.entry);
    }

    error!(
        "Ledger inconsistency on {}: recorded on {}, attempted on {}",
        recorded.entry.id, recorded.account_id, account_id
    );
    Err(AppError::LedgerInconsistency {
        tx_id: recorded.entry.id,
        recorded: format!("{} on {}", recorded.entry.amount, recorded.account_id),
        attempted: format!("replay on {account_id}"),
    })
}

fn replay_or_conflict(
    existing: RecordedEntry,
    account_id: &str,
    tx_type: TransactionType,
    amount: Decimal,
) -> AppResult<LedgerReceipt> {
    let existing = same_account(existing, account_id)?;
    if existing.tx_type == tx_type && existing.amount == amount {
        info!("Transaction {} already recorded, skipping", existing.id);
        return Ok(LedgerReceipt {
            entry: existing,
            replayed: true,
        });
    }

    error!(
        "Ledger inconsistency on {}: recorded {} {}, attempted {} {}",
        existing.id, existing.tx_type, existing.amount, tx_type, amount
    );
    Err(AppError::LedgerInconsistency {
        tx_id: existing.id,
        recorded: existing.amount.to_string(),
        attempted: amount.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use callmeter_store::InMemoryWalletRepository;
    use rust_decimal_macros::dec;

    fn ledger() -> WalletLedger {
        WalletLedger::new(Arc::new(InMemoryWalletRepository::new()))
    }

    #[tokio::test]
    async fn test_credit_is_idempotent() {
        let ledger = ledger();
        let first = ledger.credit("u1", dec!(100), "topup-1", None).await.unwrap();
        let second = ledger.credit("u1", dec!(100), "topup-1", None).await.unwrap();
        assert!(!first.replayed);
        assert!(second.replayed);

        let wallet = ledger.get_wallet("u1").await.unwrap();
        assert_eq!(wallet.balance, dec!(100));
        assert_eq!(wallet.transactions.len(), 1);
    }

    #[tokio::test]
    async fn test_replay_with_other_amount_is_inconsistent() {
        let ledger = ledger();
        ledger.credit("u1", dec!(100), "topup-1", None).await.unwrap();
        let err = ledger.credit("u1", dec!(150), "topup-1", None).await.unwrap_err();
        assert!(matches!(err, AppError::LedgerInconsistency { .. }));
        assert_eq!(ledger.get_wallet("u1").await.unwrap().balance, dec!(100));
    }

    #[tokio::test]
    async fn test_replay_on_other_account_is_inconsistent() {
        let ledger = ledger();
        ledger.credit("u1", dec!(100), "topup-1", None).await.unwrap();
        let err = ledger.credit("u2", dec!(100), "topup-1", None).await.unwrap_err();
        assert!(matches!(err, AppError::LedgerInconsistency { .. }));

        assert_eq!(ledger.get_wallet("u1").await.unwrap().balance, dec!(100));
        let other = ledger.get_wallet("u2").await.unwrap();
        assert_eq!(other.balance, dec!(0));
        assert!(other.transactions.is_empty());
    }

    #[tokio::test]
    async fn test_release_replay_on_other_account_is_inconsistent() {
        let ledger = ledger();
        ledger.credit("u1", dec!(100), "topup-1", None).await.unwrap();
        ledger.hold("u1", "c1", dec!(40)).await.unwrap();
        ledger.release_hold("u1", "c1").await.unwrap().unwrap();

        let err = ledger.release_hold("u2", "c1").await.unwrap_err();
        assert!(matches!(err, AppError::LedgerInconsistency { .. }));
    }

    #[tokio::test]
    async fn test_debit_never_overdraws() {
        let ledger = ledger();
        ledger.credit("u1", dec!(10), "topup-1", None).await.unwrap();
        let err = ledger
            .debit("u1", dec!(25), "call-charge-c1", Some("c1"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InsufficientBalance { .. }));

        let wallet = ledger.get_wallet("u1").await.unwrap();
        assert_eq!(wallet.balance, dec!(10));
        assert!(ledger.find_transaction("call-charge-c1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejects_non_positive_amounts() {
        let ledger = ledger();
        assert!(matches!(
            ledger.credit("u1", dec!(0), "t", None).await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            ledger.debit("u1", dec!(-1), "t", None, None).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_history_newest_first() {
        let ledger = ledger();
        ledger.credit("u1", dec!(10), "t1", None).await.unwrap();
        ledger.credit("u1", dec!(20), "t2", None).await.unwrap();
        ledger.debit("u1", dec!(5), "t3", None, None).await.unwrap();

        let history = ledger.transaction_history("u1", Some(2)).await.unwrap();
        let ids: Vec<&str> = history.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["t3", "t2"]);
        assert!(ledger.transaction_history("nobody", None).await.is_err());
    }

    #[tokio::test]
    async fn test_hold_then_release() {
        let ledger = ledger();
        ledger.credit("u1", dec!(100), "topup-1", None).await.unwrap();
        ledger.hold("u1", "c1", dec!(40)).await.unwrap();
        assert_eq!(ledger.get_wallet("u1").await.unwrap().balance, dec!(60));

        let released = ledger.release_hold("u1", "c1").await.unwrap().unwrap();
        assert_eq!(released.entry.id, "release-c1");
        assert_eq!(ledger.get_wallet("u1").await.unwrap().balance, dec!(100));

        let again = ledger.release_hold("u1", "c1").await.unwrap().unwrap();
        assert!(again.replayed);
        assert_eq!(ledger.get_wallet("u1").await.unwrap().balance, dec!(100));
    }

    #[tokio::test]
    async fn test_hold_requires_balance() {
        let ledger = ledger();
        ledger.credit("u1", dec!(10), "topup-1", None).await.unwrap();
        let err = ledger.hold("u1", "c1", dec!(40)).await.unwrap_err();
        assert!(matches!(err, AppError::InsufficientBalance { .. }));
        assert!(ledger.release_hold("u1", "c1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_complete_hold_refunds_difference() {
        let ledger = ledger();
        ledger.credit("u1", dec!(100), "topup-1", None).await.unwrap();
        ledger.hold("u1", "c1", dec!(40)).await.unwrap();

        let receipt = ledger.complete_hold("u1", "c1", dec!(25)).await.unwrap();
        assert_eq!(receipt.entry.balance_delta, dec!(15));
        assert_eq!(ledger.get_wallet("u1").await.unwrap().balance, dec!(75));

        let replay = ledger.complete_hold("u1", "c1", dec!(25)).await.unwrap();
        assert!(replay.replayed);
        assert!(ledger.complete_hold("u1", "c1", dec!(30)).await.is_err());
        assert_eq!(ledger.get_wallet("u1").await.unwrap().balance, dec!(75));
    }

    #[tokio::test]
    async fn test_complete_hold_charges_extra() {
        let ledger = ledger();
        ledger.credit("u1", dec!(100), "topup-1", None).await.unwrap();
        ledger.hold("u1", "c1", dec!(40)).await.unwrap();
        ledger.complete_hold("u1", "c1", dec!(55)).await.unwrap();
        assert_eq!(ledger.get_wallet("u1").await.unwrap().balance, dec!(45));
    }

    #[tokio::test]
    async fn test_complete_without_hold_fails() {
        let ledger = ledger();
        let err = ledger.complete_hold("u1", "c1", dec!(10)).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
