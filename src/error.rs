// src/error.rs
use thiserror::Error;
use actix_web::{http::StatusCode, ResponseError, HttpResponse};
use serde_json::json;

#[derive(Error, Debug)]
pub enum BillingError {
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Customer not found: {0}")]
    UnknownCustomer(String),

    #[error("Service not found")]
    ServiceNotFound,

    #[error("Router not found")]
    RouterNotFound,

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance {
        required: String,
        available: String,
    },

    #[error("Device unreachable: {target}")]
    DeviceUnreachable { target: String },

    #[error("Protocol timeout after {timeout_ms}ms: {target}")]
    ProtocolTimeout { target: String, timeout_ms: u64 },

    #[error("Permission denied on {target}: {detail}")]
    PermissionDenied { target: String, detail: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Missing or invalid operator credential")]
    Unauthorized,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ResponseError for BillingError {
    fn error_response(&self) -> HttpResponse {
        let status_code = self.status_code();

        HttpResponse::build(status_code).json(json!({
            "error": self.error_code(),
            "message": self.to_string(),
        }))
    }

    fn status_code(&self) -> StatusCode {
        match self {
            BillingError::UnknownCustomer(_) => StatusCode::NOT_FOUND,
            BillingError::ServiceNotFound => StatusCode::NOT_FOUND,
            BillingError::RouterNotFound => StatusCode::NOT_FOUND,
            BillingError::InsufficientBalance { .. } => StatusCode::FORBIDDEN,
            BillingError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            BillingError::Unauthorized => StatusCode::UNAUTHORIZED,
            BillingError::DeviceUnreachable { .. } => StatusCode::BAD_GATEWAY,
            BillingError::ProtocolTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl BillingError {
    pub fn error_code(&self) -> &str {
        match self {
            BillingError::Database(_) => "database_error",
            BillingError::Redis(_) => "cache_error",
            BillingError::Cache(_) => "cache_error",
            BillingError::UnknownCustomer(_) => "customer_not_found",
            BillingError::ServiceNotFound => "service_not_found",
            BillingError::RouterNotFound => "router_not_found",
            BillingError::InsufficientBalance { .. } => "insufficient_balance",
            BillingError::DeviceUnreachable { .. } => "device_unreachable",
            BillingError::ProtocolTimeout { .. } => "protocol_timeout",
            BillingError::PermissionDenied { .. } => "permission_denied",
            BillingError::InvalidRequest(_) => "invalid_request",
            BillingError::Unauthorized => "unauthorized",
            BillingError::Internal(_) => "internal_error",
        }
    }

    /// Whether the caller should retry. Drives the webhook acknowledgement:
    /// permanent failures get a non-retryable ack to stop pointless resends.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BillingError::Database(_)
                | BillingError::Redis(_)
                | BillingError::Cache(_)
                | BillingError::DeviceUnreachable { .. }
                | BillingError::ProtocolTimeout { .. }
                | BillingError::Internal(_)
        )
    }
}
