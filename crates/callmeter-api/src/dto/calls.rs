//! Call DTOs
//!
//! Request types for creating calls and for the presence and media
//! signals forwarded from the media room.

use callmeter_core::models::{CallType, ParticipantRole};
use callmeter_core::AppError;
use callmeter_services::NewCall;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Call creation request
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateCallRequest {
    /// Caller-chosen id; generated when absent
    #[validate(length(min = 1, max = 128))]
    pub call_id: Option<String>,

    #[validate(length(min = 1, max = 128, message = "userId is required"))]
    pub user_id: String,

    #[validate(length(min = 1, max = 128, message = "providerId is required"))]
    pub provider_id: String,

    #[serde(default)]
    pub call_type: CallType,
}

impl From<CreateCallRequest> for NewCall {
    fn from(req: CreateCallRequest) -> Self {
        NewCall {
            call_id: req.call_id,
            user_id: req.user_id,
            provider_id: req.provider_id,
            call_type: req.call_type,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantAction {
    Join,
    Leave,
}

/// Presence signal. The side is taken from `role`, or derived from a
/// media-room `identity` such as `provider-17`.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantEventRequest {
    pub action: ParticipantAction,
    pub role: Option<ParticipantRole>,
    #[validate(length(min = 1, max = 256))]
    pub identity: Option<String>,
}

impl ParticipantEventRequest {
    pub fn resolve_role(&self) -> Result<ParticipantRole, AppError> {
        if let Some(role) = self.role {
            return Ok(role);
        }
        match self.identity.as_deref() {
            Some(identity) => ParticipantRole::from_identity(identity).ok_or_else(|| {
                AppError::InvalidInput(format!("cannot derive a role from identity '{identity}'"))
            }),
            None => Err(AppError::InvalidInput(
                "either role or identity is required".into(),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
    Data,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackEvent {
    Published,
    Unpublished,
}

/// Media track signal
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaEventRequest {
    pub track_kind: TrackKind,
    pub event: TrackEvent,
}

impl MediaEventRequest {
    /// Only a published audio or video track makes media flow.
    pub fn counts_as_media(&self) -> bool {
        self.event == TrackEvent::Published
            && matches!(self.track_kind, TrackKind::Audio | TrackKind::Video)
    }
}

/// Reply for a signal that was accepted but had no effect
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IgnoredSignal {
    pub call_id: String,
    pub ignored: bool,
    pub reason: String,
}

impl IgnoredSignal {
    pub fn new(call_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            ignored: true,
            reason: reason.into(),
        }
    }
}
