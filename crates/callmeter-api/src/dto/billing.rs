//! Billing DTOs

use callmeter_core::models::FinalizeReason;
use serde::Deserialize;

/// Finalize request; the body is optional
#[derive(Debug, Clone, Deserialize)]
pub struct FinalizeRequest {
    #[serde(default = "default_reason")]
    pub reason: FinalizeReason,
}

fn default_reason() -> FinalizeReason {
    FinalizeReason::CallEnded
}

impl Default for FinalizeRequest {
    fn default() -> Self {
        Self {
            reason: default_reason(),
        }
    }
}
