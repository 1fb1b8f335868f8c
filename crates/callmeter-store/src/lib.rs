//! CallMeter Store Library
//!
//! Thread-safe in-memory implementations of the repository traits in
//! `callmeter-core`. Each repository keeps its records behind a
//! `tokio::sync::RwLock` and performs every conditional update while
//! holding the write lock, which gives single-record atomicity.

pub mod calls;
pub mod pricing;
pub mod providers;
pub mod wallets;

pub use calls::InMemoryCallRepository;
pub use pricing::InMemoryPricingRepository;
pub use providers::InMemoryProviderStore;
pub use wallets::InMemoryWalletRepository;

use callmeter_core::traits::{
    CallRepository, EarningsRepository, PricingRepository, ProviderDirectory, WalletRepository,
};
use std::sync::Arc;

/// Every repository the engine needs, wired to one in-memory backend.
#[derive(Clone)]
pub struct InMemoryStores {
    pub calls: Arc<InMemoryCallRepository>,
    pub wallets: Arc<InMemoryWalletRepository>,
    pub pricing: Arc<InMemoryPricingRepository>,
    pub providers: Arc<InMemoryProviderStore>,
}

impl InMemoryStores {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(InMemoryCallRepository::new()),
            wallets: Arc::new(InMemoryWalletRepository::new()),
            pricing: Arc::new(InMemoryPricingRepository::new()),
            providers: Arc::new(InMemoryProviderStore::new()),
        }
    }

    pub fn call_repository(&self) -> Arc<dyn CallRepository> {
        self.calls.clone()
    }

    pub fn wallet_repository(&self) -> Arc<dyn WalletRepository> {
        self.wallets.clone()
    }

    pub fn pricing_repository(&self) -> Arc<dyn PricingRepository> {
        self.pricing.clone()
    }

    pub fn earnings_repository(&self) -> Arc<dyn EarningsRepository> {
        self.providers.clone()
    }

    pub fn provider_directory(&self) -> Arc<dyn ProviderDirectory> {
        self.providers.clone()
    }
}

impl Default for InMemoryStores {
    fn default() -> Self {
        Self::new()
    }
}
