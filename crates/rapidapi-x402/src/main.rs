use actix_web::{middleware::from_fn, middleware::Logger, web, App, HttpServer};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rapidapi_x402::{
    config::GatewayConfig,
    ledger::UsageLedger,
    metrics::register_metrics,
    middleware::payment_gate,
    payment::FacilitatorClient,
    proxy::UpstreamClient,
    routes::{self, services::build_request_handlers},
    services::load_app_config,
    state::AppState,
};

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match GatewayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    let catalog = match load_app_config(&config.services_path) {
        Ok(catalog) => Arc::new(catalog),
        Err(e) => {
            tracing::error!(path = %config.services_path, "Failed to load service catalog: {e}");
            std::process::exit(1);
        }
    };

    let port = config.port;
    let allowed_origins = config.allowed_origins.clone();

    tracing::info!("Starting rapidapi-x402 on port {}", port);
    tracing::info!("Pay to: {} on {}", catalog.pay_to, catalog.network);
    for service in &catalog.services {
        tracing::info!(
            "  {} {} ({}) -> {}{}",
            service.method,
            service.route(),
            service.price,
            service.backend.host,
            service.backend.path
        );
    }

    let http = reqwest::Client::new();
    let mut upstream = UpstreamClient::new(http.clone(), config.rapidapi_key.clone());
    if config.upstream_plain_http {
        tracing::warn!("UPSTREAM_INSECURE_HTTP set, backends are called over plain HTTP");
        upstream = upstream.with_plain_http();
    }

    let ledger = Arc::new(UsageLedger::new());
    let facilitator = Arc::new(FacilitatorClient::new(http, &config.facilitator_url));
    tracing::info!("Facilitator URL: {}", facilitator.base_url());
    let handlers = build_request_handlers(&catalog, upstream, Arc::clone(&ledger));

    register_metrics();

    let state_data = web::Data::new(AppState::new(config, catalog, ledger, facilitator));

    HttpServer::new(move || {
        let cors = rapidapi_x402::cors::build_cors(&allowed_origins);
        let handlers = handlers.clone();

        App::new()
            .app_data(state_data.clone())
            .wrap(from_fn(payment_gate))
            .wrap(cors)
            .wrap(Logger::default())
            .configure(routes::health::configure)
            .configure(routes::catalog::configure)
            .configure(routes::usage::configure)
            .configure(routes::discovery::configure)
            .configure(move |cfg| handlers.configure(cfg))
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
