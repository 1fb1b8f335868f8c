//! API layer for CallMeter
//!
//! HTTP handlers for call signalling, billing control, wallets, and
//! provider pricing. Every handler takes the shared
//! [`BillingService`](callmeter_services::BillingService) from app data.

#![forbid(unsafe_code)]

pub mod dto;
pub mod handlers;

pub use dto::ApiResponse;
pub use handlers::configure_routes;
