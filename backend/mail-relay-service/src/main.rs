use actix_web::{web, App, HttpServer};
use mail_relay_service::{
    config, db,
    directory::{IdentityDirectory, PgIdentityDirectory},
    error::AppError,
    handlers, logging, metrics,
    parser::MimeMessageParser,
    relay::ResendRelay,
    repository::{MailStore, PgMailStore},
    services::{InboundPipeline, MailService, OutboundRouter, SignatureVerifier, WebhookReconciler},
    state::AppState,
    websocket::{ChannelRegistry, RealtimeNotifier},
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_actix_web::TracingLogger;

#[actix_web::main]
async fn main() -> Result<(), AppError> {
    logging::init_tracing();
    let cfg = config::Config::from_env()?;

    let pool = db::init_pool(&cfg.database)
        .await
        .map_err(|e| AppError::StartServer(format!("db: {e}")))?;

    let store: Arc<dyn MailStore> = Arc::new(PgMailStore::new(pool.clone()));
    let directory: Arc<dyn IdentityDirectory> = Arc::new(PgIdentityDirectory::new(pool));
    let registry = ChannelRegistry::new();
    let notifier: Arc<dyn RealtimeNotifier> = Arc::new(registry.clone());

    let relay = ResendRelay::new(
        &cfg.relay.api_url,
        &cfg.relay.api_key,
        Duration::from_secs(cfg.relay.timeout_secs),
    )?;

    let router = Arc::new(OutboundRouter::new(
        store.clone(),
        directory.clone(),
        notifier.clone(),
        Arc::new(relay),
        cfg.relay.default_from.clone(),
    ));

    let verifier = SignatureVerifier::new(&cfg.webhook.secret, cfg.webhook.tolerance_secs)?;

    let state = AppState {
        mail: Arc::new(MailService::new(store.clone(), router)),
        inbound: Arc::new(InboundPipeline::new(
            store.clone(),
            directory.clone(),
            notifier,
            Arc::new(MimeMessageParser),
        )),
        reconciler: Arc::new(WebhookReconciler::new(store, directory, verifier)),
        registry,
    };

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    info!(addr = %bind_addr, "starting mail-relay-service");

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(metrics::MetricsMiddleware)
            .wrap(TracingLogger::default())
            .route("/health", web::get().to(handlers::health))
            .route("/metrics", web::get().to(metrics::serve_metrics))
            .configure(handlers::register_routes)
    })
    .bind(&bind_addr)
    .map_err(|e| AppError::StartServer(format!("bind {bind_addr}: {e}")))?
    .run()
    .await
    .map_err(|e| AppError::StartServer(e.to_string()))
}
