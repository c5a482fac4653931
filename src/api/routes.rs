// src/api/routes.rs
use actix_web::web;
use crate::api::handlers;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/health", web::get().to(handlers::health_check))
            // Payment ingestion
            .route(
                "/payments/webhook/mpesa",
                web::post().to(handlers::mpesa_webhook),
            )
            // RADIUS front-end hooks (GET with query params for the policy hook)
            .route("/radius/authorize", web::get().to(handlers::radius_authorize))
            .route(
                "/radius/accounting",
                web::post().to(handlers::radius_accounting),
            )
            // Manual session control
            .route("/radius/coa", web::post().to(handlers::send_coa))
            .route("/radius/disconnect", web::post().to(handlers::send_disconnect))
            .route("/radius/test", web::post().to(handlers::radius_test))
            // Wallet
            .route(
                "/wallet/{customer_id}/balance",
                web::get().to(handlers::wallet_balance),
            )
            .route(
                "/wallet/{customer_id}/allocate",
                web::post().to(handlers::allocate),
            )
            .route(
                "/wallet/{customer_id}/services/{service_id}/allocate",
                web::post().to(handlers::allocate_to_service),
            )
            // Fair use
            .route(
                "/fair-use/{customer_id}/{service_id}",
                web::get().to(handlers::fair_use_status),
            )
            .route("/fair-use/usage", web::post().to(handlers::record_usage))
            .route("/fair-use/burst", web::post().to(handlers::activate_burst))
            // Lifecycle
            .route(
                "/services/{service_id}/activate",
                web::post().to(handlers::activate_service),
            )
            .route(
                "/services/{service_id}/terminate",
                web::post().to(handlers::terminate_service),
            )
            // Router compliance
            .route("/compliance/run", web::post().to(handlers::compliance_run))
            .route(
                "/compliance/{router_id}",
                web::get().to(handlers::compliance_get),
            )
            // Scheduled jobs, manually triggerable
            .route("/sweeps/{name}/run", web::post().to(handlers::run_sweep)),
    );
}
