//! Call handlers
//!
//! Call creation and lookup, plus the presence and media signals the
//! media room forwards for each call.

use crate::dto::calls::{
    CreateCallRequest, IgnoredSignal, MediaEventRequest, ParticipantAction,
    ParticipantEventRequest,
};
use crate::dto::{validate_request, ApiResponse};
use actix_web::{web, HttpResponse};
use callmeter_core::AppError;
use callmeter_services::BillingService;
use tracing::{debug, info, instrument};

/// Create a call
///
/// POST /api/v1/calls
#[instrument(skip(billing, req))]
pub async fn create_call(
    billing: web::Data<BillingService>,
    req: web::Json<CreateCallRequest>,
) -> Result<HttpResponse, AppError> {
    validate_request(&*req, "Call creation")?;

    let call = billing.create_call(req.into_inner().into()).await?;
    info!(call_id = %call.call_id, "Call created via API");

    Ok(HttpResponse::Created().json(ApiResponse::with_message(call, "Call created")))
}

/// GET /api/v1/calls/{id}
#[instrument(skip(billing))]
pub async fn get_call(
    billing: web::Data<BillingService>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let call = billing.get_call(&path).await?;
    Ok(HttpResponse::Ok().json(call))
}

/// Calls whose settlement did not complete cleanly
///
/// GET /api/v1/calls/settlement-failures
#[instrument(skip(billing))]
pub async fn list_settlement_failures(
    billing: web::Data<BillingService>,
) -> Result<HttpResponse, AppError> {
    let calls = billing.list_settlement_failures().await?;
    debug!(count = calls.len(), "Listing settlement failures");
    Ok(HttpResponse::Ok().json(calls))
}

/// Participant joined or left the media room
///
/// POST /api/v1/calls/{id}/participants
#[instrument(skip(billing, req))]
pub async fn participant_event(
    billing: web::Data<BillingService>,
    path: web::Path<String>,
    req: web::Json<ParticipantEventRequest>,
) -> Result<HttpResponse, AppError> {
    validate_request(&*req, "Participant event")?;
    let role = req.resolve_role()?;
    let call_id = path.into_inner();

    let outcome = match req.action {
        ParticipantAction::Join => billing.participant_joined(&call_id, role).await?,
        ParticipantAction::Leave => billing.participant_left(&call_id, role).await?,
    };
    Ok(HttpResponse::Ok().json(outcome))
}

/// Media track published or unpublished
///
/// POST /api/v1/calls/{id}/media
#[instrument(skip(billing, req))]
pub async fn media_event(
    billing: web::Data<BillingService>,
    path: web::Path<String>,
    req: web::Json<MediaEventRequest>,
) -> Result<HttpResponse, AppError> {
    let call_id = path.into_inner();
    if !req.counts_as_media() {
        debug!(
            call_id = %call_id,
            track_kind = ?req.track_kind,
            event = ?req.event,
            "Ignoring media event"
        );
        return Ok(HttpResponse::Ok().json(IgnoredSignal::new(
            call_id,
            "only published audio or video tracks affect billing",
        )));
    }

    let outcome = billing.media_track_published(&call_id).await?;
    Ok(HttpResponse::Ok().json(outcome))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/calls")
            .route("", web::post().to(create_call))
            .route("/settlement-failures", web::get().to(list_settlement_failures))
            .route("/{id}", web::get().to(get_call))
            .route("/{id}/participants", web::post().to(participant_event))
            .route("/{id}/media", web::post().to(media_event)),
    );
}
