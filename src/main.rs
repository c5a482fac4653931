// src/main.rs
use actix_web::{web, App, HttpServer, middleware};
use std::sync::Arc;
use tracing::info;

use upepo_billing_engine::api;
use upepo_billing_engine::cache::RedisClient;
use upepo_billing_engine::config::Config;
use upepo_billing_engine::database::create_pool;
use upepo_billing_engine::radius::{
    RadiusClient, RadiusProvisioner, SessionController, SessionRegistry,
};
use upepo_billing_engine::routers::ComplianceWorker;
use upepo_billing_engine::services::{
    AllocationEngine, DunningScheduler, FairUseEngine, ServiceLifecycle, WalletLedger,
};
use upepo_billing_engine::workers::Sweeps;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
        )
        .json()
        .init();

    info!("🚀 Starting Upepo Billing Engine");

    // Load configuration
    let config = Config::from_env()
        .expect("Failed to load configuration");

    info!("Environment: {}", config.environment);

    // Create database pool
    let db_pool = create_pool(&config.database_url)
        .await
        .expect("Failed to create database pool");

    info!("✅ Database pool created");

    // Create Redis client
    let redis_client = RedisClient::new(&config.redis_url)
        .await
        .expect("Failed to create Redis client");

    info!("✅ Redis client connected");

    // Protocol layer
    let registry = Arc::new(SessionRegistry::new(db_pool.clone()));
    let controller = Arc::new(SessionController::new(
        db_pool.clone(),
        registry.clone(),
        RadiusClient::new(config.radius.request_timeout_ms),
        config.radius.coa_port,
    ));
    let provisioner = Arc::new(RadiusProvisioner::new(db_pool.clone()));

    // Billing services
    let allocation = Arc::new(AllocationEngine::new(
        db_pool.clone(),
        redis_client.clone(),
    ));

    let wallet = Arc::new(WalletLedger::new(
        db_pool.clone(),
        redis_client.clone(),
        allocation.clone(),
    ));

    let lifecycle = Arc::new(ServiceLifecycle::new(
        db_pool.clone(),
        controller.clone(),
        provisioner.clone(),
        config.radius.grace_hours,
    ));

    let fair_use = Arc::new(FairUseEngine::new(
        db_pool.clone(),
        redis_client.clone(),
        controller.clone(),
    ));

    let dunning = Arc::new(DunningScheduler::new(db_pool.clone(), config.sms.clone()));

    let compliance = Arc::new(ComplianceWorker::new(
        db_pool.clone(),
        redis_client.clone(),
        &config.radius,
    ));

    // Periodic sweeps: expiry, provisioning, compliance, dunning, burst
    let sweeps = Sweeps {
        lifecycle: lifecycle.clone(),
        fair_use: fair_use.clone(),
        dunning: dunning.clone(),
        compliance: compliance.clone(),
    };
    sweeps.spawn_all(&config.sweeps);

    info!("✅ Background sweeps scheduled");

    // HTTP Server
    let bind_address = format!("{}:{}", config.host, config.port);
    info!("🌐 Starting HTTP server on {}", bind_address);

    let app_config = config.clone();
    HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::default())
            .wrap(tracing_actix_web::TracingLogger::default())
            .app_data(web::Data::new(app_config.clone()))
            .app_data(web::Data::new(wallet.clone()))
            .app_data(web::Data::new(lifecycle.clone()))
            .app_data(web::Data::new(fair_use.clone()))
            .app_data(web::Data::new(dunning.clone()))
            .app_data(web::Data::new(controller.clone()))
            .app_data(web::Data::new(registry.clone()))
            .app_data(web::Data::new(compliance.clone()))
            .app_data(web::Data::new(sweeps.clone()))
            .configure(api::routes::configure)
    })
    .workers(8)
    .bind(&bind_address)?
    .run()
    .await
}
