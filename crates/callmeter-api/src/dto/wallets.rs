//! Wallet DTOs
//!
//! Request and response types for wallet endpoints.

use callmeter_core::models::{LedgerEntry, Wallet};
use callmeter_services::LedgerReceipt;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// Wallet top-up request
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreditRequest {
    #[validate(custom(function = "validate_positive"))]
    pub amount: Decimal,

    /// Idempotency key; a retried top-up with the same id is applied once
    #[validate(length(min = 1, max = 128, message = "transactionId is required"))]
    pub transaction_id: String,

    #[validate(length(max = 256))]
    pub note: Option<String>,
}

fn validate_positive(amount: &Decimal) -> Result<(), ValidationError> {
    if amount.is_sign_positive() && !amount.is_zero() {
        Ok(())
    } else {
        Err(ValidationError::new("amount_must_be_positive"))
    }
}

/// Query parameters for transaction history
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct HistoryParams {
    #[serde(default = "default_limit")]
    #[validate(range(min = 1, max = 500))]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

/// Wallet response
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletResponse {
    pub account_id: String,
    pub balance: Decimal,
    /// Amount reserved by open holds
    pub held_amount: Decimal,
    pub transaction_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Wallet> for WalletResponse {
    fn from(wallet: Wallet) -> Self {
        Self {
            held_amount: wallet.held_amount(),
            transaction_count: wallet.transactions.len(),
            account_id: wallet.account_id,
            balance: wallet.balance,
            created_at: wallet.created_at,
            updated_at: wallet.updated_at,
        }
    }
}

/// Result of a ledger write
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerReceiptResponse {
    pub transaction: LedgerEntry,
    pub replayed: bool,
}

impl From<LedgerReceipt> for LedgerReceiptResponse {
    fn from(receipt: LedgerReceipt) -> Self {
        Self {
            transaction: receipt.entry,
            replayed: receipt.replayed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn credit(amount: Decimal) -> CreditRequest {
        CreditRequest {
            amount,
            transaction_id: "topup-1".into(),
            note: None,
        }
    }

    #[test]
    fn test_credit_amount_must_be_positive() {
        assert!(credit(dec!(10.50)).validate().is_ok());
        assert!(credit(dec!(0)).validate().is_err());
        assert!(credit(dec!(-5)).validate().is_err());
    }

    #[test]
    fn test_history_limit_bounds() {
        assert!(HistoryParams { limit: 50 }.validate().is_ok());
        assert!(HistoryParams { limit: 0 }.validate().is_err());
        assert!(HistoryParams { limit: 501 }.validate().is_err());
    }
}
