//! Billing handlers

use crate::dto::billing::FinalizeRequest;
use actix_web::{web, HttpResponse};
use callmeter_core::AppError;
use callmeter_services::BillingService;
use tracing::{info, instrument};

/// GET /api/v1/calls/{id}/billing/eligibility
#[instrument(skip(billing))]
pub async fn check_eligibility(
    billing: web::Data<BillingService>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let eligibility = billing.check_eligibility(&path).await?;
    Ok(HttpResponse::Ok().json(eligibility))
}

/// Start billing explicitly
///
/// POST /api/v1/calls/{id}/billing/start
#[instrument(skip(billing))]
pub async fn start_billing(
    billing: web::Data<BillingService>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let started = billing.start_billing(&path).await?;
    Ok(HttpResponse::Ok().json(started))
}

/// Finalize billing. Repeating the request is harmless.
///
/// POST /api/v1/calls/{id}/billing/finalize
#[instrument(skip(billing, body))]
pub async fn finalize_billing(
    billing: web::Data<BillingService>,
    path: web::Path<String>,
    body: Option<web::Json<FinalizeRequest>>,
) -> Result<HttpResponse, AppError> {
    let reason = body.map(|b| b.into_inner()).unwrap_or_default().reason;
    info!(call_id = %path, %reason, "Finalize requested via API");

    let outcome = billing.finalize_billing(&path, reason).await?;
    Ok(HttpResponse::Ok().json(outcome))
}

/// GET /api/v1/calls/{id}/billing
#[instrument(skip(billing))]
pub async fn get_billing(
    billing: web::Data<BillingService>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let snapshot = billing.billing_snapshot(&path).await?;
    Ok(HttpResponse::Ok().json(snapshot))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/calls/{id}/billing")
            .route("", web::get().to(get_billing))
            .route("/eligibility", web::get().to(check_eligibility))
            .route("/start", web::post().to(start_billing))
            .route("/finalize", web::post().to(finalize_billing)),
    );
}
