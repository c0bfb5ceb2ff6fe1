//! Top-level error taxonomy and the fixed code -> HTTP status mapping (spec §6/§7).

use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, AppError>;

/// Domain-prefixed error code, e.g. `ORD_001`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorCode(pub &'static str);

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("order not found: {0}")]
    OrderNotFound(Uuid),

    #[error("payment not found: {0}")]
    PaymentNotFound(Uuid),

    #[error("refund not found: {0}")]
    RefundNotFound(Uuid),

    #[error("webhook references unknown pg_transaction_id: {0}")]
    UnknownWebhookTransaction(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("missing idempotency key")]
    MissingIdempotencyKey,

    #[error("invalid idempotency key format")]
    InvalidIdempotencyKey,

    #[error("idempotency payload conflict")]
    IdempotencyConflict,

    #[error("request is already being processed, retry later")]
    IdempotencyInFlight,

    #[error("insufficient credit balance: required {required}, available {available}")]
    InsufficientBalance { required: String, available: String },

    #[error("invalid payment state transition: {0}")]
    InvalidPaymentState(String),

    #[error("payment gateway error: {0}")]
    PgError(String),

    #[error("circuit open for {endpoint}")]
    CircuitOpen { endpoint: String },

    #[error("tenant header missing")]
    MissingTenant,

    #[error("upstream timeout")]
    UpstreamTimeout,

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("event bus error: {0}")]
    EventBus(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invariant violation: {0}")]
    Invariant(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn code(&self) -> ErrorCode {
        use AppError::*;
        ErrorCode(match self {
            OrderNotFound(_) => "ORD_001",
            PaymentNotFound(_) => "PAY_001",
            RefundNotFound(_) => "PAY_007",
            UnknownWebhookTransaction(_) => "PAY_008",
            Validation(_) => "VAL_001",
            MissingIdempotencyKey => "VAL_002",
            InvalidIdempotencyKey => "VAL_003",
            IdempotencyConflict => "VAL_004",
            IdempotencyInFlight => "VAL_005",
            InsufficientBalance { .. } => "CRD_002",
            InvalidPaymentState(_) => "PAY_006",
            PgError(_) => "PAY_005",
            CircuitOpen { .. } => "PAY_005",
            MissingTenant => "TNT_001",
            UpstreamTimeout => "SYS_003",
            RateLimited => "SYS_004",
            ServiceUnavailable(_) => "SYS_002",
            Database(_) => "SYS_001",
            Cache(_) => "SYS_001",
            EventBus(_) => "SYS_001",
            Serialization(_) => "SYS_001",
            Invariant(_) => "SYS_005",
            Internal(_) => "SYS_001",
        })
    }

    fn status(&self) -> StatusCode {
        use AppError::*;
        match self {
            OrderNotFound(_) | PaymentNotFound(_) | RefundNotFound(_) => StatusCode::NOT_FOUND,
            UnknownWebhookTransaction(_) => StatusCode::NOT_FOUND,
            Validation(_) | MissingIdempotencyKey | InvalidIdempotencyKey => {
                StatusCode::BAD_REQUEST
            }
            IdempotencyConflict => StatusCode::UNPROCESSABLE_ENTITY,
            IdempotencyInFlight => StatusCode::CONFLICT,
            InsufficientBalance { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            InvalidPaymentState(_) => StatusCode::BAD_REQUEST,
            PgError(_) => StatusCode::BAD_GATEWAY,
            CircuitOpen { .. } => StatusCode::BAD_GATEWAY,
            MissingTenant => StatusCode::BAD_REQUEST,
            UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Database(_) | Cache(_) | EventBus(_) | Serialization(_) | Invariant(_) | Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// True for errors the resilience wrapper should retry (safe PG ops only, see payment::resilience).
    pub fn is_retryable_upstream(&self) -> bool {
        matches!(self, AppError::UpstreamTimeout | AppError::PgError(_))
    }
}

#[derive(Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    field_errors: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct Metadata {
    timestamp: chrono::DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_id: Option<String>,
}

/// Renders the fixed `{success, data, error, metadata}` response envelope (spec §6).
pub fn envelope_error(err: &AppError, request_id: Option<String>) -> serde_json::Value {
    json!({
        "success": false,
        "data": null,
        "error": ErrorBody {
            code: err.code().to_string(),
            message: err.to_string(),
            field_errors: None,
        },
        "metadata": Metadata {
            timestamp: Utc::now(),
            trace_id: None,
            request_id,
        }
    })
}

pub fn envelope_ok<T: Serialize>(data: T, request_id: Option<String>) -> serde_json::Value {
    json!({
        "success": true,
        "data": data,
        "error": null,
        "metadata": Metadata {
            timestamp: Utc::now(),
            trace_id: None,
            request_id,
        }
    })
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        self.status()
    }

    fn error_response(&self) -> HttpResponse {
        tracing::warn!(code = %self.code(), error = %self, "request failed");
        HttpResponse::build(self.status_code()).json(envelope_error(self, None))
    }
}
