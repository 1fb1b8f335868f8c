//! Wallet and ledger entry models
//!
//! A wallet holds a user's balance and an append-only list of ledger
//! entries. Every entry carries a caller-chosen id that doubles as its
//! idempotency key.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ledger entry type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Credit,
    Debit,
    Hold,
    HoldRelease,
    HoldComplete,
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionType::Credit => "credit",
            TransactionType::Debit => "debit",
            TransactionType::Hold => "hold",
            TransactionType::HoldRelease => "hold_release",
            TransactionType::HoldComplete => "hold_complete",
        };
        f.write_str(s)
    }
}

/// Immutable ledger entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    /// Idempotency key, unique across all wallets
    pub id: String,
    #[serde(rename = "type")]
    pub tx_type: TransactionType,
    /// Non-negative magnitude of the operation
    pub amount: Decimal,
    /// Signed effect on the balance
    pub balance_delta: Decimal,
    /// Balance right after this entry was applied
    pub balance_after: Decimal,
    pub call_id: Option<String>,
    pub note: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn new(
        id: impl Into<String>,
        tx_type: TransactionType,
        amount: Decimal,
        balance_delta: Decimal,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            tx_type,
            amount,
            balance_delta,
            balance_after: Decimal::ZERO,
            call_id: None,
            note: None,
            timestamp: now,
        }
    }

    pub fn with_call(mut self, call_id: impl Into<String>) -> Self {
        self.call_id = Some(call_id.into());
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Whether a replay with `other` describes the same operation.
    pub fn same_operation(&self, other: &LedgerEntry) -> bool {
        self.tx_type == other.tx_type && self.amount == other.amount
    }
}

/// User wallet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wallet {
    pub account_id: String,
    pub balance: Decimal,
    pub transactions: Vec<LedgerEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn new(account_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            account_id: account_id.into(),
            balance: Decimal::ZERO,
            transactions: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Hold placed for `call_id` that has been neither released nor completed.
    pub fn active_hold(&self, call_id: &str) -> Option<&LedgerEntry> {
        let for_call = |e: &&LedgerEntry| e.call_id.as_deref() == Some(call_id);
        let closed = self
            .transactions
            .iter()
            .filter(for_call)
            .any(|e| {
                matches!(
                    e.tx_type,
                    TransactionType::HoldRelease | TransactionType::HoldComplete
                )
            });
        if closed {
            return None;
        }
        self.transactions
            .iter()
            .filter(for_call)
            .find(|e| e.tx_type == TransactionType::Hold)
    }

    /// Total amount currently reserved by open holds.
    pub fn held_amount(&self) -> Decimal {
        self.transactions
            .iter()
            .filter(|e| e.tx_type == TransactionType::Hold)
            .filter_map(|e| e.call_id.as_deref())
            .filter_map(|call_id| self.active_hold(call_id))
            .map(|e| e.amount)
            .sum()
    }

    /// Append an entry, updating the balance. The caller has already
    /// checked idempotency and the non-negative balance rule.
    pub fn push(&mut self, mut entry: LedgerEntry) -> LedgerEntry {
        self.balance += entry.balance_delta;
        entry.balance_after = self.balance;
        self.updated_at = entry.timestamp;
        self.transactions.push(entry.clone());
        entry
    }

    pub fn can_cover(&self, delta: Decimal) -> bool {
        delta >= Decimal::ZERO || self.balance + delta >= Decimal::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_push_tracks_balance_after() {
        let now = Utc::now();
        let mut wallet = Wallet::new("user-1", now);
        let credit =
            wallet.push(LedgerEntry::new("c1", TransactionType::Credit, dec!(100), dec!(100), now));
        assert_eq!(credit.balance_after, dec!(100));
        let debit =
            wallet.push(LedgerEntry::new("d1", TransactionType::Debit, dec!(30), dec!(-30), now));
        assert_eq!(debit.balance_after, dec!(70));
        assert_eq!(wallet.balance, dec!(70));
        assert!(wallet.can_cover(dec!(-70)));
        assert!(!wallet.can_cover(dec!(-70.01)));
    }

    #[test]
    fn test_active_hold_closes_on_release() {
        let now = Utc::now();
        let mut wallet = Wallet::new("user-1", now);
        wallet.push(LedgerEntry::new("c1", TransactionType::Credit, dec!(100), dec!(100), now));
        wallet.push(
            LedgerEntry::new("hold-call-1", TransactionType::Hold, dec!(40), dec!(-40), now)
                .with_call("call-1"),
        );
        assert_eq!(wallet.held_amount(), dec!(40));
        assert!(wallet.active_hold("call-1").is_some());

        let release_id = "release-call-1";
        wallet.push(
            LedgerEntry::new(release_id, TransactionType::HoldRelease, dec!(40), dec!(40), now)
                .with_call("call-1"),
        );
        assert!(wallet.active_hold("call-1").is_none());
        assert_eq!(wallet.held_amount(), Decimal::ZERO);
        assert_eq!(wallet.balance, dec!(100));
    }
}
