use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use fluxpay::cache::RedisCache;
use fluxpay::config::Config;
use fluxpay::credit::CreditService;
use fluxpay::db::Database;
use fluxpay::event_bus::NatsEventBus;
use fluxpay::handlers;
use fluxpay::idempotency::IdempotencyGate;
use fluxpay::middleware::{TenantRateLimiter, TenantResolver};
use fluxpay::outbox::{OutboxJanitor, OutboxPublisher};
use fluxpay::payment::{HttpPgClient, PgClient, ResilientPgClient, WebhookVerifier};
use fluxpay::saga::{SagaOrchestrator, SagaResumer, SagaSweeper};
use fluxpay::services::{OrderService, PaymentService, RefundService};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();

    let _subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_target(false)
        .json()
        .init();

    info!("starting FluxPay...");

    let config = Config::from_env().expect("failed to load configuration");
    config.validate().expect("invalid configuration");
    info!("configuration loaded");

    let db = Arc::new(
        Database::connect(&config.database.url, config.database.max_connections)
            .await
            .expect("failed to connect to database"),
    );
    info!("database connected");

    let cache = Arc::new(
        RedisCache::connect(&config.redis.url)
            .await
            .expect("failed to connect to redis"),
    );
    info!("redis connected");

    let bus = Arc::new(
        NatsEventBus::connect(&config.nats.url, config.nats.subject_prefix.clone())
            .await
            .expect("failed to connect to nats"),
    );
    info!("nats connected");

    let gate = Arc::new(IdempotencyGate::new(
        cache.clone(),
        db.clone(),
        Duration::from_secs((config.idempotency.ttl_hours * 3600) as u64),
    ));

    let pg_http = HttpPgClient::new(&config.pg).expect("failed to build payment gateway client");
    let pg: Arc<dyn PgClient> = Arc::new(ResilientPgClient::new(pg_http, config.pg.clone()));

    let credit = Arc::new(CreditService::new(db.clone()));
    let orchestrator = Arc::new(SagaOrchestrator::new(db.clone(), config.saga.max_compensation_retries));

    let order_service = Arc::new(OrderService::new(db.clone(), bus.clone()));
    let payment_service = Arc::new(PaymentService::new(
        db.clone(),
        bus.clone(),
        pg.clone(),
        credit.clone(),
        orchestrator.clone(),
        config.saga.lease_seconds,
    ));
    let refund_service = Arc::new(RefundService::new(db.clone(), bus.clone(), pg.clone(), credit.clone()));
    let webhook_verifier = Arc::new(WebhookVerifier::new(
        config.pg.webhook_hmac_secret.clone(),
        config.pg.webhook_timestamp_tolerance_secs,
    ));

    info!("services initialized");

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let publisher = Arc::new(OutboxPublisher::new(
        db.clone(),
        bus.clone(),
        config.outbox.clone(),
        config.nats.dlq_prefix.clone(),
    ));
    let janitor = Arc::new(OutboxJanitor::new(db.clone(), config.outbox.clone()));
    let saga_resumers: Vec<Arc<dyn SagaResumer>> = vec![payment_service.clone()];
    let sweeper = Arc::new(SagaSweeper::new(db.clone(), config.saga.clone(), saga_resumers));

    let publisher_handle = tokio::spawn(publisher.run(shutdown_rx.clone()));
    let janitor_handle = tokio::spawn(janitor.run(shutdown_rx.clone()));
    let sweeper_handle = tokio::spawn(sweeper.run(shutdown_rx.clone()));
    info!("background workers started: outbox publisher, outbox janitor, saga sweeper");

    let server_config = config.server.clone();
    let request_budget = Duration::from_secs(server_config.request_budget_secs);
    let rate_limit = config.rate_limit.clone();

    let order_data = web::Data::new(order_service);
    let payment_data = web::Data::new(payment_service);
    let refund_data = web::Data::new(refund_service);
    let gate_data = web::Data::new(gate);
    let db_data = web::Data::new(db.clone());
    let webhook_verifier_data = web::Data::new(webhook_verifier);

    info!("starting HTTP server on {}:{}", server_config.host, server_config.port);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(order_data.clone())
            .app_data(payment_data.clone())
            .app_data(refund_data.clone())
            .app_data(gate_data.clone())
            .app_data(db_data.clone())
            .app_data(webhook_verifier_data.clone())
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allow_any_method()
                    .allow_any_header()
                    .max_age(3600),
            )
            .wrap(actix_web::middleware::Logger::default())
            .wrap(actix_web::middleware::NormalizePath::trim())
            .wrap(TenantRateLimiter::new(rate_limit.requests_per_second, rate_limit.burst))
            .wrap(TenantResolver::new(request_budget))
            .configure(handlers::configure)
    })
    .workers(server_config.workers)
    .bind((server_config.host.as_str(), server_config.port))?
    .run();

    let result = server.await;

    info!("HTTP server stopped, draining background workers");
    let _ = shutdown_tx.send(true);
    let drain = tokio::time::timeout(
        Duration::from_secs(server_config.drain_timeout_secs),
        futures_util::future::join3(publisher_handle, janitor_handle, sweeper_handle),
    )
    .await;
    match drain {
        Ok(_) => info!("background workers drained cleanly"),
        Err(_) => error!("background worker drain timed out, exiting anyway"),
    }

    result
}
