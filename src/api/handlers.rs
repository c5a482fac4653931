// src/api/handlers.rs
use actix_web::{web, HttpRequest, HttpResponse};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::BillingError;
use crate::models::{
    AccountingEvent, BurstRequest, CoaApiRequest, DisconnectApiRequest, HealthResponse,
    MpesaCallback, RadiusTestRequest, SessionTarget, UsageReport, WebhookAck,
};
use crate::radius::attributes::SpeedProfile;
use crate::radius::{CoaChanges, SessionController, SessionRegistry};
use crate::routers::ComplianceWorker;
use crate::services::{
    AllocationPolicy, DunningScheduler, FairUseEngine, ServiceLifecycle, WalletLedger,
};
use crate::workers::{SweepKind, Sweeps};

/// Every manual-control route requires the operator/cron credential.
fn require_operator(req: &HttpRequest, config: &Config) -> Result<(), BillingError> {
    let presented = req
        .headers()
        .get("X-Api-Key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if !config.operator_api_key.is_empty() && presented == config.operator_api_key {
        Ok(())
    } else {
        Err(BillingError::Unauthorized)
    }
}

fn target_from(
    customer_id: Option<Uuid>,
    username: Option<String>,
    session_id: Option<String>,
) -> Result<SessionTarget, BillingError> {
    if let Some(id) = customer_id {
        Ok(SessionTarget::Customer(id))
    } else if let Some(username) = username {
        Ok(SessionTarget::Username(username))
    } else if let Some(session) = session_id {
        Ok(SessionTarget::Session(session))
    } else {
        Err(BillingError::InvalidRequest(
            "customer_id, username, or session_id required".to_string(),
        ))
    }
}

pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "healthy".to_string(),
        service: "upepo-billing-engine".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// M-Pesa STK callback. Safe to receive any number of times for the same
/// transaction; the acknowledgement tells the gateway whether to retry.
pub async fn mpesa_webhook(
    payload: web::Json<serde_json::Value>,
    wallet: web::Data<Arc<WalletLedger>>,
    lifecycle: web::Data<Arc<ServiceLifecycle>>,
    dunning: web::Data<Arc<DunningScheduler>>,
) -> HttpResponse {
    let raw = payload.into_inner();

    let callback: MpesaCallback = match serde_json::from_value(raw.clone()) {
        Ok(cb) => cb,
        Err(e) => {
            warn!("Webhook payload malformed: {}", e);
            return HttpResponse::Ok().json(WebhookAck::unprocessable("Invalid transaction"));
        }
    };

    if callback.body.stk_callback.result_code != 0 {
        // Failed or cancelled on the provider side; nothing to ingest
        return HttpResponse::Ok().json(WebhookAck::unprocessable("Accepted"));
    }

    let event = match callback.extract_payment() {
        Some(event) => event,
        None => {
            warn!("Webhook payload missing amount/receipt/payer");
            return HttpResponse::Ok().json(WebhookAck::unprocessable("Invalid transaction"));
        }
    };

    let customer_id = match wallet.find_customer_by_phone(&event.payer).await {
        Ok(Some(id)) => id,
        Ok(None) => {
            // Permanent: this event will never succeed, stop the retries
            warn!("Payment {} from unknown payer {}", event.reference, event.payer);
            return HttpResponse::Ok().json(WebhookAck::unprocessable("Customer not found"));
        }
        Err(e) => {
            error!("Customer lookup failed: {}", e);
            return HttpResponse::InternalServerError().json(WebhookAck::retryable());
        }
    };

    match wallet
        .credit(customer_id, event.amount, &event.reference, "mpesa", &raw)
        .await
    {
        Ok((outcome, _)) if outcome.already_processed => {
            HttpResponse::Ok().json(WebhookAck::already_processed())
        }
        Ok((_, allocation)) => {
            lifecycle.apply_allocation_events(&allocation.events).await;
            for alloc in &allocation.events {
                if let Err(e) = dunning.schedule_for(alloc.service_id, alloc.new_expiry).await {
                    error!(
                        "Dunning scheduling failed for service {}: {}",
                        alloc.service_id, e
                    );
                }
            }
            info!("Payment {} processed", event.reference);
            HttpResponse::Ok().json(WebhookAck::processed())
        }
        Err(e) if e.is_transient() => {
            error!("Payment {} hit transient failure: {}", event.reference, e);
            HttpResponse::InternalServerError().json(WebhookAck::retryable())
        }
        Err(e) => {
            warn!("Payment {} unprocessable: {}", event.reference, e);
            HttpResponse::Ok().json(WebhookAck::unprocessable(&e.to_string()))
        }
    }
}

#[derive(Debug, serde::Deserialize)]
pub struct AuthorizeQuery {
    pub username: String,
}

/// Authorization decision for the RADIUS front end. Plain text for easy
/// parsing in the server's policy hook:
/// - "ACCEPT|attr=value;attr=value" on success
/// - "REJECT|reason" on refusal
pub async fn radius_authorize(
    query: web::Query<AuthorizeQuery>,
    controller: web::Data<Arc<SessionController>>,
) -> HttpResponse {
    match controller.authorize(&query.username).await {
        Ok(decision) => {
            let body = if decision.accepted {
                let attrs: Vec<String> = decision
                    .attributes
                    .iter()
                    .map(|(name, value)| format!("{}={}", name, value))
                    .collect();
                format!("ACCEPT|{}", attrs.join(";"))
            } else {
                format!("REJECT|{}", decision.reason)
            };
            HttpResponse::Ok().content_type("text/plain").body(body)
        }
        Err(e) => {
            error!("Authorization error for {}: {}", query.username, e);
            HttpResponse::Ok()
                .content_type("text/plain")
                .body(format!("REJECT|internal_error:{}", e.error_code()))
        }
    }
}

/// Accounting-Start/Interim/Stop feed that maintains the live-session
/// registry.
pub async fn radius_accounting(
    event: web::Json<AccountingEvent>,
    registry: web::Data<Arc<SessionRegistry>>,
) -> Result<HttpResponse, BillingError> {
    registry.handle_accounting(&event).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "success": true })))
}

pub async fn send_coa(
    req: HttpRequest,
    body: web::Json<CoaApiRequest>,
    controller: web::Data<Arc<SessionController>>,
    config: web::Data<Config>,
) -> Result<HttpResponse, BillingError> {
    require_operator(&req, &config)?;

    let body = body.into_inner();
    let target = target_from(body.customer_id, body.username, body.session_id)?;

    let profile = match (body.download_mbps, body.upload_mbps) {
        (Some(down), Some(up)) => Some(SpeedProfile::flat(down, up)),
        (None, None) => None,
        _ => {
            return Err(BillingError::InvalidRequest(
                "download_mbps and upload_mbps must be set together".to_string(),
            ))
        }
    };

    let outcome = controller
        .send_coa(
            &target,
            &CoaChanges {
                profile,
                session_timeout: body.session_timeout,
            },
        )
        .await?;

    Ok(HttpResponse::Ok().json(outcome))
}

pub async fn send_disconnect(
    req: HttpRequest,
    body: web::Json<DisconnectApiRequest>,
    controller: web::Data<Arc<SessionController>>,
    config: web::Data<Config>,
) -> Result<HttpResponse, BillingError> {
    require_operator(&req, &config)?;

    let body = body.into_inner();
    let target = target_from(body.customer_id, body.username, body.session_id)?;
    let reason = body.reason.unwrap_or_else(|| "Admin-Reset".to_string());

    let outcome = controller.send_disconnect(&target, &reason).await?;
    Ok(HttpResponse::Ok().json(outcome))
}

/// Diagnostic probe of an authorization server.
pub async fn radius_test(
    req: HttpRequest,
    body: web::Json<RadiusTestRequest>,
    controller: web::Data<Arc<SessionController>>,
    config: web::Data<Config>,
) -> Result<HttpResponse, BillingError> {
    require_operator(&req, &config)?;

    let result = controller
        .test_server(&body.host, body.port, &body.secret)
        .await?;
    Ok(HttpResponse::Ok().json(result))
}

pub async fn wallet_balance(
    req: HttpRequest,
    path: web::Path<Uuid>,
    wallet: web::Data<Arc<WalletLedger>>,
    config: web::Data<Config>,
) -> Result<HttpResponse, BillingError> {
    require_operator(&req, &config)?;

    let balance = wallet.get_balance(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(balance))
}

#[derive(Debug, serde::Deserialize)]
pub struct AllocateRequest {
    #[serde(default)]
    pub policy: Option<String>,
}

/// Manually trigger an allocation pass for a customer's wallet.
pub async fn allocate(
    req: HttpRequest,
    path: web::Path<Uuid>,
    body: web::Json<AllocateRequest>,
    wallet: web::Data<Arc<WalletLedger>>,
    lifecycle: web::Data<Arc<ServiceLifecycle>>,
    dunning: web::Data<Arc<DunningScheduler>>,
    config: web::Data<Config>,
) -> Result<HttpResponse, BillingError> {
    require_operator(&req, &config)?;

    let customer_id = path.into_inner();
    let policy = AllocationPolicy::from_str(body.policy.as_deref().unwrap_or_default());

    let outcome = wallet.allocation().allocate(customer_id, policy).await?;
    lifecycle.apply_allocation_events(&outcome.events).await;
    for event in &outcome.events {
        let _ = dunning.schedule_for(event.service_id, event.new_expiry).await;
    }

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "allocated_amount": outcome.allocated_amount,
        "services_extended": outcome.services_extended,
    })))
}

#[derive(Debug, serde::Deserialize)]
pub struct ManualAllocationRequest {
    pub amount: rust_decimal::Decimal,
    #[serde(default)]
    pub allocated_by: Option<String>,
}

/// Manually allocate a fixed amount from the wallet to one chosen service.
pub async fn allocate_to_service(
    req: HttpRequest,
    path: web::Path<(Uuid, Uuid)>,
    body: web::Json<ManualAllocationRequest>,
    wallet: web::Data<Arc<WalletLedger>>,
    lifecycle: web::Data<Arc<ServiceLifecycle>>,
    dunning: web::Data<Arc<DunningScheduler>>,
    config: web::Data<Config>,
) -> Result<HttpResponse, BillingError> {
    require_operator(&req, &config)?;

    let (customer_id, service_id) = path.into_inner();
    let allocated_by = body.allocated_by.clone().unwrap_or_else(|| "operator".to_string());

    let outcome = wallet
        .allocation()
        .allocate_to_service(customer_id, service_id, body.amount, &allocated_by)
        .await?;
    lifecycle.apply_allocation_events(&outcome.events).await;
    for event in &outcome.events {
        let _ = dunning.schedule_for(event.service_id, event.new_expiry).await;
    }

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "allocated_amount": outcome.allocated_amount,
        "days_added": outcome.events.first().map(|e| e.days_added).unwrap_or(0),
    })))
}

/// Manual activation of a pending service.
pub async fn activate_service(
    req: HttpRequest,
    path: web::Path<Uuid>,
    lifecycle: web::Data<Arc<ServiceLifecycle>>,
    config: web::Data<Config>,
) -> Result<HttpResponse, BillingError> {
    require_operator(&req, &config)?;

    let outcome = lifecycle.activate(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "activated": outcome == crate::services::TransitionOutcome::Applied,
    })))
}

pub async fn fair_use_status(
    req: HttpRequest,
    path: web::Path<(Uuid, Uuid)>,
    engine: web::Data<Arc<FairUseEngine>>,
    config: web::Data<Config>,
) -> Result<HttpResponse, BillingError> {
    require_operator(&req, &config)?;

    let (customer_id, service_id) = path.into_inner();
    let status = engine.check_status(customer_id, service_id).await?;
    Ok(HttpResponse::Ok().json(status))
}

/// Usage samples pushed by the metering collaborator.
pub async fn record_usage(
    req: HttpRequest,
    body: web::Json<UsageReport>,
    engine: web::Data<Arc<FairUseEngine>>,
    config: web::Data<Config>,
) -> Result<HttpResponse, BillingError> {
    require_operator(&req, &config)?;

    engine
        .record_usage(body.service_id, body.upload_mb, body.download_mb)
        .await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "success": true })))
}

pub async fn activate_burst(
    req: HttpRequest,
    body: web::Json<BurstRequest>,
    engine: web::Data<Arc<FairUseEngine>>,
    config: web::Data<Config>,
) -> Result<HttpResponse, BillingError> {
    require_operator(&req, &config)?;

    let activated = engine
        .activate_burst(body.customer_id, body.service_id)
        .await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "activated": activated })))
}

pub async fn terminate_service(
    req: HttpRequest,
    path: web::Path<Uuid>,
    lifecycle: web::Data<Arc<ServiceLifecycle>>,
    config: web::Data<Config>,
) -> Result<HttpResponse, BillingError> {
    require_operator(&req, &config)?;

    let outcome = lifecycle.terminate(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "terminated": outcome == crate::services::TransitionOutcome::Applied,
    })))
}

pub async fn compliance_run(
    req: HttpRequest,
    worker: web::Data<Arc<ComplianceWorker>>,
    config: web::Data<Config>,
) -> Result<HttpResponse, BillingError> {
    require_operator(&req, &config)?;

    let summary = worker.enforce_all().await?;
    Ok(HttpResponse::Ok().json(summary))
}

pub async fn compliance_get(
    req: HttpRequest,
    path: web::Path<Uuid>,
    worker: web::Data<Arc<ComplianceWorker>>,
    config: web::Data<Config>,
) -> Result<HttpResponse, BillingError> {
    require_operator(&req, &config)?;

    match worker.get_report(path.into_inner()).await? {
        Some(report) => Ok(HttpResponse::Ok().json(report)),
        None => Err(BillingError::RouterNotFound),
    }
}

pub async fn run_sweep(
    req: HttpRequest,
    path: web::Path<String>,
    sweeps: web::Data<Sweeps>,
    config: web::Data<Config>,
) -> Result<HttpResponse, BillingError> {
    require_operator(&req, &config)?;

    let kind = SweepKind::from_str(&path).ok_or_else(|| {
        BillingError::InvalidRequest(format!("unknown sweep '{}'", path))
    })?;

    let summary = sweeps.run(kind).await?;
    Ok(HttpResponse::Ok().json(summary))
}
