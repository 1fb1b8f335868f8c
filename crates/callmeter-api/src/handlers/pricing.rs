//! Provider pricing handlers

use crate::dto::pricing::PricingRequest;
use crate::dto::{validate_request, ApiResponse};
use actix_web::{web, HttpResponse};
use callmeter_core::AppError;
use callmeter_services::BillingService;
use tracing::instrument;

/// GET /api/v1/pricing
#[instrument(skip(billing))]
pub async fn list_pricing(billing: web::Data<BillingService>) -> Result<HttpResponse, AppError> {
    let pricing = billing.pricing().list_pricing().await?;
    Ok(HttpResponse::Ok().json(pricing))
}

/// Effective pricing for a provider; `isDefault` marks the fallback
///
/// GET /api/v1/pricing/{providerId}
#[instrument(skip(billing))]
pub async fn get_pricing(
    billing: web::Data<BillingService>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let pricing = billing.pricing().resolve_pricing(&path).await?;
    Ok(HttpResponse::Ok().json(pricing))
}

/// PUT /api/v1/pricing/{providerId}
#[instrument(skip(billing, req))]
pub async fn set_pricing(
    billing: web::Data<BillingService>,
    path: web::Path<String>,
    req: web::Json<PricingRequest>,
) -> Result<HttpResponse, AppError> {
    validate_request(&*req, "Pricing")?;

    let pricing = billing
        .pricing()
        .set_pricing(&path, req.into_inner().into())
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::with_message(pricing, "Pricing updated")))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/pricing")
            .route("", web::get().to(list_pricing))
            .route("/{provider_id}", web::get().to(get_pricing))
            .route("/{provider_id}", web::put().to(set_pricing)),
    );
}
