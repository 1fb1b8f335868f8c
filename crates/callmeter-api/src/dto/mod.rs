//! Data Transfer Objects (DTOs) for API requests and responses

pub mod billing;
pub mod calls;
pub mod common;
pub mod pricing;
pub mod wallets;

pub use billing::*;
pub use calls::*;
pub use common::*;
pub use pricing::*;
pub use wallets::*;
