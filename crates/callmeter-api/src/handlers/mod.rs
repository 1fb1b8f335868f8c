//! HTTP request handlers

pub mod billing;
pub mod calls;
pub mod health;
pub mod pricing;
pub mod providers;
pub mod wallets;

use actix_web::web;

pub use billing::configure as configure_billing;
pub use calls::configure as configure_calls;
pub use pricing::configure as configure_pricing;
pub use providers::configure as configure_providers;
pub use wallets::configure as configure_wallets;

/// Mount every route under `/api/v1`.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/health", web::get().to(health::health_check))
            // Billing routes live under /calls/{id}/billing and must be
            // registered before the generic call routes
            .configure(configure_billing)
            .configure(configure_calls)
            .configure(configure_wallets)
            .configure(configure_pricing)
            .configure(configure_providers),
    );
}
