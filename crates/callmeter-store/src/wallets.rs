//! Wallets with an append-only ledger
//!
//! Entry ids are indexed globally so an idempotency lookup never scans a
//! wallet's history.

use async_trait::async_trait;
use callmeter_core::models::Wallet;
use callmeter_core::traits::{LedgerOutcome, LedgerPlan, RecordedEntry, WalletRepository};
use callmeter_core::{AppError, AppResult};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct WalletBook {
    wallets: HashMap<String, Wallet>,
    /// entry id -> (account id, position in that wallet's transactions)
    index: HashMap<String, (String, usize)>,
}

impl WalletBook {
    fn entry(&self, tx_id: &str) -> Option<RecordedEntry> {
        let (account_id, position) = self.index.get(tx_id)?;
        let entry = self.wallets.get(account_id)?.transactions.get(*position)?;
        Some(RecordedEntry {
            account_id: account_id.clone(),
            entry: entry.clone(),
        })
    }
}

/// A thread-safe in-memory wallet store.
#[derive(Default, Clone)]
pub struct InMemoryWalletRepository {
    book: Arc<RwLock<WalletBook>>,
}

impl InMemoryWalletRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WalletRepository for InMemoryWalletRepository {
    async fn find(&self, account_id: &str) -> AppResult<Option<Wallet>> {
        let book = self.book.read().await;
        Ok(book.wallets.get(account_id).cloned())
    }

    async fn find_or_create(&self, account_id: &str) -> AppResult<Wallet> {
        let mut book = self.book.write().await;
        let wallet = book
            .wallets
            .entry(account_id.to_string())
            .or_insert_with(|| Wallet::new(account_id, Utc::now()));
        Ok(wallet.clone())
    }

    async fn find_entry(&self, tx_id: &str) -> AppResult<Option<RecordedEntry>> {
        let book = self.book.read().await;
        Ok(book.entry(tx_id))
    }

    async fn apply(&self, account_id: &str, plan: LedgerPlan) -> AppResult<LedgerOutcome> {
        let mut book = self.book.write().await;

        let wallet = book
            .wallets
            .entry(account_id.to_string())
            .or_insert_with(|| Wallet::new(account_id, Utc::now()))
            .clone();

        let Some(entry) = plan(&wallet)? else {
            return Ok(LedgerOutcome::Skipped);
        };

        if let Some(existing) = book.entry(&entry.id) {
            return Ok(LedgerOutcome::Duplicate(existing));
        }

        if !wallet.can_cover(entry.balance_delta) {
            return Err(AppError::InsufficientBalance {
                required: (-entry.balance_delta).to_string(),
                available: wallet.balance.to_string(),
            });
        }

        let wallet = book
            .wallets
            .get_mut(account_id)
            .ok_or_else(|| AppError::wallet_not_found(account_id))?;
        let applied = wallet.push(entry);
        let position = wallet.transactions.len() - 1;
        book.index
            .insert(applied.id.clone(), (account_id.to_string(), position));

        Ok(LedgerOutcome::Applied(applied))
    }
}
