//! CallMeter server
//!
//! Real-time per-call billing engine: receives media-room presence and
//! media signals over HTTP, meters each call per second, and settles the
//! payer's wallet and the provider's earnings when the call ends.

use actix_cors::Cors;
use actix_web::{http::header, middleware, web, App, HttpResponse, HttpServer};
use anyhow::Context;
use callmeter_api::configure_routes;
use callmeter_core::AppConfig;
use callmeter_services::{BillingService, Repositories};
use callmeter_store::InMemoryStores;
use std::env;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing/logging
fn init_tracing() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "callmeter={lvl},callmeter_api={lvl},callmeter_services={lvl},\
             callmeter_store={lvl},actix_web=info",
            lvl = log_level
        ))
    });

    let json = env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_line_number(true),
            )
            .init();
    }
}

fn repositories(stores: &InMemoryStores) -> Repositories {
    Repositories {
        calls: stores.call_repository(),
        wallets: stores.wallet_repository(),
        pricing: stores.pricing_repository(),
        earnings: stores.earnings_repository(),
        providers: stores.provider_directory(),
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    init_tracing();

    info!("Starting CallMeter v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load().context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;

    info!(
        grace_period_secs = config.billing.grace_period_secs,
        grace_period_enabled = config.billing.grace_period_enabled,
        snapshot_interval_secs = config.billing.snapshot_interval_secs,
        "Billing configuration loaded"
    );

    let stores = InMemoryStores::new();
    // Actors and tickers run on this runtime; HTTP workers only message them.
    let billing = web::Data::new(
        BillingService::new(repositories(&stores), config.billing.clone())
            .context("failed to start billing engine")?,
    );

    let bind_addr = config.server_addr();
    let workers = config.server.workers.max(1);
    let cors_origins = config.server.cors_origins.clone();
    info!("Starting HTTP server on {} with {} workers", bind_addr, workers);

    let server_billing = billing.clone();
    HttpServer::new(move || {
        let origins = cors_origins.clone();
        let cors = Cors::default()
            .allowed_origin_fn(move |origin, _req_head| {
                origin
                    .to_str()
                    .map(|o| origins.split(',').any(|allowed| allowed.trim() == o))
                    .unwrap_or(false)
            })
            .allowed_methods(vec!["GET", "POST", "PUT", "OPTIONS"])
            .allowed_headers(vec![header::ACCEPT, header::CONTENT_TYPE])
            .max_age(3600);

        App::new()
            .app_data(server_billing.clone())
            .app_data(web::JsonConfig::default().error_handler(|err, _req| {
                let message = err.to_string();
                actix_web::error::InternalError::from_response(
                    err,
                    HttpResponse::BadRequest().json(serde_json::json!({
                        "error": "invalid_body",
                        "message": message,
                        "status": 400
                    })),
                )
                .into()
            }))
            .wrap(cors)
            .wrap(middleware::Logger::new("%a \"%r\" %s %b %Dms"))
            .wrap(tracing_actix_web::TracingLogger::default())
            .configure(configure_routes)
    })
    .workers(workers)
    .bind(&bind_addr)
    .with_context(|| format!("failed to bind {bind_addr}"))?
    .run()
    .await
    .context("HTTP server failed")?;

    info!("HTTP server stopped, persisting live meters");
    billing.shutdown().await;
    info!("CallMeter stopped");
    Ok(())
}
