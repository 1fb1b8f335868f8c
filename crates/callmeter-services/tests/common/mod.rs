#![allow(dead_code)]

use callmeter_core::models::{CallType, ParticipantRole, RatingModel, TransactionType};
use callmeter_core::BillingConfig;
use callmeter_services::{BillingService, NewCall, PricingUpdate, Repositories};
use callmeter_store::InMemoryStores;
use rust_decimal::Decimal;

pub const USER: &str = "user-1";
pub const PROVIDER: &str = "provider-1";

pub struct Harness {
    pub stores: InMemoryStores,
    pub service: BillingService,
}

pub fn repositories(stores: &InMemoryStores) -> Repositories {
    Repositories {
        calls: stores.call_repository(),
        wallets: stores.wallet_repository(),
        pricing: stores.pricing_repository(),
        earnings: stores.earnings_repository(),
        providers: stores.provider_directory(),
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(BillingConfig::default())
    }

    pub fn with_config(config: BillingConfig) -> Self {
        let stores = InMemoryStores::new();
        let service = BillingService::new(repositories(&stores), config).unwrap();
        Self { stores, service }
    }

    /// A second engine over the same storage, as after a restart.
    pub fn restarted(&self) -> BillingService {
        BillingService::new(repositories(&self.stores), BillingConfig::default()).unwrap()
    }

    pub async fn price_per_minute(&self, provider: &str, rate: Decimal) {
        self.service
            .pricing()
            .set_pricing(
                provider,
                PricingUpdate {
                    rating_model: RatingModel::PerMinute,
                    base_price: rate,
                    discount_percent: Decimal::ZERO,
                    included_minutes: None,
                    is_active: true,
                },
            )
            .await
            .unwrap();
    }

    pub async fn fund(&self, user: &str, amount: Decimal) {
        self.service
            .ledger()
            .credit(user, amount, &format!("topup-{user}-{amount}"), None)
            .await
            .unwrap();
    }

    pub async fn open_call(&self, call_id: &str) {
        self.service
            .create_call(NewCall {
                call_id: Some(call_id.to_string()),
                user_id: USER.to_string(),
                provider_id: PROVIDER.to_string(),
                call_type: CallType::Voice,
            })
            .await
            .unwrap();
    }

    pub async fn join_both(&self, call_id: &str) {
        self.service
            .participant_joined(call_id, ParticipantRole::User)
            .await
            .unwrap();
        self.service
            .participant_joined(call_id, ParticipantRole::Provider)
            .await
            .unwrap();
    }

    pub async fn balance(&self, user: &str) -> Decimal {
        self.service.ledger().get_wallet(user).await.unwrap().balance
    }

    pub async fn debit_count(&self, user: &str) -> usize {
        self.service
            .ledger()
            .get_wallet(user)
            .await
            .unwrap()
            .transactions
            .iter()
            .filter(|e| e.tx_type == TransactionType::Debit)
            .count()
    }
}
