//! Provider handlers

use actix_web::{web, HttpResponse};
use callmeter_core::AppError;
use callmeter_services::BillingService;
use tracing::instrument;

/// Presence status and running earnings
///
/// GET /api/v1/providers/{id}
#[instrument(skip(billing))]
pub async fn get_provider(
    billing: web::Data<BillingService>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let profile = billing.provider_profile(&path).await?;
    Ok(HttpResponse::Ok().json(profile))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::scope("/providers").route("/{id}", web::get().to(get_provider)));
}
