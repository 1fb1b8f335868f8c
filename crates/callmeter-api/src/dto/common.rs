//! Common DTOs used across the API

use callmeter_core::AppError;
use serde::Serialize;
use tracing::warn;
use validator::Validate;

/// Standard API response wrapper
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T> {
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            data,
            message: None,
        }
    }

    pub fn with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            data,
            message: Some(message.into()),
        }
    }
}

/// Health check payload
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    /// Calls that currently have a live actor
    pub active_calls: usize,
}

/// Validate a request body, logging what failed.
pub fn validate_request<T: Validate>(request: &T, what: &str) -> Result<(), AppError> {
    request.validate().map_err(|e| {
        warn!("{} validation failed: {}", what, e);
        AppError::from(e)
    })
}
