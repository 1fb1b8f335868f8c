//! CallMeter Core Library
//!
//! This crate provides the foundational types, traits, and error handling
//! for the CallMeter billing engine. It includes:
//!
//! - Domain models (Call, Wallet, Pricing, EarningRecord)
//! - Call document schema versioning and legacy migration
//! - Repository traits implemented by the storage layer
//! - Unified error handling with HTTP response mapping
//! - Application configuration

pub mod config;
pub mod error;
pub mod models;
pub mod traits;

pub use config::{AppConfig, BillingConfig};
pub use error::AppError;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
