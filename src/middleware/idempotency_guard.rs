//! Idempotency guard wiring (spec §4.1, SPEC_FULL.md §12): called directly by
//! guarded handlers rather than as actix middleware, since the gate needs the
//! parsed request body (actix middleware sees the body stream before
//! extraction, which would require buffering and re-injecting it anyway).

use std::time::Duration;
use uuid::Uuid;

use crate::context::RequestContext;
use crate::error::{AppError, Result};
use crate::idempotency::IdempotencyGate;
use crate::models::{AcquireOutcome, IdempotencyKey};

const IDEMPOTENCY_HEADER: &str = "X-Idempotency-Key";

pub enum GuardDecision {
    Proceed { key: IdempotencyKey, payload_hash: String },
    Cached { response: Vec<u8>, status: i32 },
}

/// Validates the `X-Idempotency-Key` header is a well-formed UUID, then
/// acquires the gate lock. Conflict/Processing map directly to the
/// corresponding `AppError`; a miss returns `Proceed` for the handler to run
/// the underlying operation and call `IdempotencyGate::store` on success.
pub async fn acquire(
    gate: &IdempotencyGate,
    ctx: &RequestContext,
    endpoint: &str,
    key_header: Option<&str>,
    body: &[u8],
    ttl: Duration,
) -> Result<GuardDecision> {
    let raw_key = key_header.ok_or(AppError::MissingIdempotencyKey)?;
    if Uuid::parse_str(raw_key).is_err() {
        return Err(AppError::InvalidIdempotencyKey);
    }

    let key = IdempotencyKey {
        tenant_id: ctx.tenant_id.as_str().to_string(),
        endpoint: endpoint.to_string(),
        client_key: raw_key.to_string(),
    };
    let payload_hash = IdempotencyGate::hash_payload(body);

    match gate.acquire_lock(&key, &payload_hash, ttl).await? {
        AcquireOutcome::Miss => Ok(GuardDecision::Proceed { key, payload_hash }),
        AcquireOutcome::Hit { response, status } => Ok(GuardDecision::Cached { response, status }),
        AcquireOutcome::Conflict => Err(AppError::IdempotencyConflict),
        AcquireOutcome::Processing => Err(AppError::IdempotencyInFlight),
    }
}

/// Endpoints guarded per SPEC_FULL.md §12: POST create-type endpoints only.
/// `approve`/`confirm` are state transitions on an existing resource and are
/// exempt; unknown paths fail closed (never silently skip the guard).
pub fn is_guarded_endpoint(method: &str, path_template: &str) -> bool {
    matches!(
        (method, path_template),
        ("POST", "/api/v1/orders") | ("POST", "/api/v1/payments") | ("POST", "/api/v1/refunds")
    )
}
