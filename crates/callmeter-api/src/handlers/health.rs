//! Health check handler

use crate::dto::HealthResponse;
use actix_web::{web, HttpResponse};
use callmeter_services::BillingService;

/// GET /api/v1/health
pub async fn health_check(billing: web::Data<BillingService>) -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "healthy",
        service: "callmeter",
        version: env!("CARGO_PKG_VERSION"),
        active_calls: billing.supervisor().active_actors(),
    })
}
