//! Wallet handlers
//!
//! HTTP handlers for balance lookup, transaction history and top-ups.

use crate::dto::wallets::{CreditRequest, HistoryParams, LedgerReceiptResponse, WalletResponse};
use crate::dto::{validate_request, ApiResponse};
use actix_web::{web, HttpResponse};
use callmeter_core::AppError;
use callmeter_services::BillingService;
use tracing::{debug, info, instrument};

/// Wallet for an account; unknown accounts get an empty wallet
///
/// GET /api/v1/wallets/{id}
#[instrument(skip(billing))]
pub async fn get_wallet(
    billing: web::Data<BillingService>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let wallet = billing.ledger().get_wallet(&path).await?;
    Ok(HttpResponse::Ok().json(WalletResponse::from(wallet)))
}

/// Newest entries first
///
/// GET /api/v1/wallets/{id}/transactions
#[instrument(skip(billing))]
pub async fn transaction_history(
    billing: web::Data<BillingService>,
    path: web::Path<String>,
    query: web::Query<HistoryParams>,
) -> Result<HttpResponse, AppError> {
    validate_request(&*query, "History query")?;
    debug!(account_id = %path, limit = query.limit, "Listing transactions");

    let entries = billing
        .ledger()
        .transaction_history(&path, Some(query.limit))
        .await?;
    Ok(HttpResponse::Ok().json(entries))
}

/// Top up a wallet
///
/// POST /api/v1/wallets/{id}/credit
#[instrument(skip(billing, req))]
pub async fn credit_wallet(
    billing: web::Data<BillingService>,
    path: web::Path<String>,
    req: web::Json<CreditRequest>,
) -> Result<HttpResponse, AppError> {
    validate_request(&*req, "Credit")?;
    let req = req.into_inner();

    let receipt = billing
        .ledger()
        .credit(&path, req.amount, &req.transaction_id, req.note)
        .await?;

    let message = if receipt.replayed {
        "Credit already applied"
    } else {
        info!(
            account_id = %path,
            amount = %req.amount,
            tx_id = %req.transaction_id,
            "Wallet credited via API"
        );
        "Wallet credited"
    };
    Ok(HttpResponse::Ok().json(ApiResponse::with_message(
        LedgerReceiptResponse::from(receipt),
        message,
    )))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/wallets")
            .route("/{id}", web::get().to(get_wallet))
            .route("/{id}/transactions", web::get().to(transaction_history))
            .route("/{id}/credit", web::post().to(credit_wallet)),
    );
}
