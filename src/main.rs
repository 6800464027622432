use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use slotbook::config::AppConfig;
use slotbook::db;
use slotbook::handlers;
use slotbook::scheduler::Scheduler;
use slotbook::services::clock::SystemClock;
use slotbook::services::events::EventBus;
use slotbook::services::notify::webhook::WebhookNotifier;
use slotbook::services::notify::{LogNotifier, Notifier};
use slotbook::services::payments::http::HttpPaymentGateway;
use slotbook::services::payments::{OfflineGateway, PaymentGateway};
use slotbook::services::sweeper;
use slotbook::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();
    anyhow::ensure!(!config.admin_token.is_empty(), "ADMIN_TOKEN must not be empty");

    let conn = db::init_db_with_timeout(&config.database_url, config.store_timeout)?;
    let clock = Arc::new(SystemClock::new(config.business_offset()?));
    let events = EventBus::new();
    let scheduler = Arc::new(
        Scheduler::new(conn, clock, config.policy.clone(), events)
            .with_currency(config.currency.clone()),
    );

    let gateway: Box<dyn PaymentGateway> = if config.payment_gateway_url.is_empty() {
        tracing::warn!("PAYMENT_GATEWAY_URL not set, using offline payment orders");
        Box::new(OfflineGateway)
    } else {
        tracing::info!("using payment gateway at {}", config.payment_gateway_url);
        Box::new(HttpPaymentGateway::new(
            config.payment_gateway_url.clone(),
            config.payment_gateway_key.clone(),
            config.payment_gateway_secret.clone(),
            config.request_timeout,
        )?)
    };
    let notifier: Arc<dyn Notifier> = if config.notify_webhook_url.is_empty() {
        Arc::new(LogNotifier)
    } else {
        tracing::info!("forwarding notifications to {}", config.notify_webhook_url);
        Arc::new(WebhookNotifier::new(
            config.notify_webhook_url.clone(),
            config.request_timeout,
        )?)
    };
    if config.payment_webhook_secret.is_empty() {
        tracing::warn!("PAYMENT_WEBHOOK_SECRET not set, payment webhook signatures are not checked");
    }

    let state = Arc::new(AppState {
        scheduler,
        config: config.clone(),
        gateway,
        notifier,
    });
    state.spawn_notifications();
    tokio::spawn(sweeper::run_sweeper(state.scheduler.clone(), config.sweep_interval));

    let app = handlers::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
