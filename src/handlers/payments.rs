//! Payment endpoints (spec §6). `create_payment` is idempotency-guarded;
//! `approve`/`confirm` are saga-driven state transitions on an existing
//! resource and are exempt (SPEC_FULL.md §12).

use actix_web::{web, HttpResponse};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::context::RequestContext;
use crate::error::{envelope_ok, Result};
use crate::idempotency::IdempotencyGate;
use crate::middleware::idempotency_guard::{acquire, GuardDecision};
use crate::services::PaymentService;

const IDEMPOTENCY_HEADER: &str = "X-Idempotency-Key";

#[derive(Debug, Deserialize)]
pub struct CreatePaymentRequest {
    pub order_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub payment_method: Option<String>,
}

pub async fn create_payment(
    ctx: RequestContext,
    service: web::Data<Arc<PaymentService>>,
    gate: web::Data<Arc<IdempotencyGate>>,
    req: actix_web::HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse> {
    let key_header = req
        .headers()
        .get(IDEMPOTENCY_HEADER)
        .and_then(|v| v.to_str().ok());
    let decision = acquire(&gate, &ctx, "POST /api/v1/payments", key_header, &body, gate.default_ttl()).await?;
    let (key, payload_hash) = match decision {
        GuardDecision::Cached { response, status } => {
            return Ok(HttpResponse::build(actix_web::http::StatusCode::from_u16(status as u16).unwrap())
                .content_type("application/json")
                .body(response));
        }
        GuardDecision::Proceed { key, payload_hash } => (key, payload_hash),
    };

    let payload: CreatePaymentRequest = serde_json::from_slice(&body)
        .map_err(|e| crate::error::AppError::Validation(format!("invalid request body: {}", e)))?;

    let result = service
        .create_payment(&ctx, payload.order_id, payload.amount, payload.currency, payload.payment_method)
        .await;

    match result {
        Ok(payment) => {
            let envelope = envelope_ok(&payment, Some(ctx.request_id.to_string()));
            let bytes = serde_json::to_vec(&envelope).unwrap_or_default();
            gate.store(&key, &payload_hash, &bytes, 201, gate.default_ttl()).await?;
            Ok(HttpResponse::Created().content_type("application/json").body(bytes))
        }
        Err(e) => {
            gate.release_lock(&key).await?;
            Err(e)
        }
    }
}

pub async fn approve_payment(
    ctx: RequestContext,
    service: web::Data<Arc<PaymentService>>,
    id: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let payment = service.approve(&ctx, *id).await?;
    Ok(HttpResponse::Ok().json(envelope_ok(payment, Some(ctx.request_id.to_string()))))
}

pub async fn confirm_payment(
    ctx: RequestContext,
    service: web::Data<Arc<PaymentService>>,
    id: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let payment = service.confirm(&ctx, *id).await?;
    Ok(HttpResponse::Ok().json(envelope_ok(payment, Some(ctx.request_id.to_string()))))
}

pub async fn get_payment(ctx: RequestContext, service: web::Data<Arc<PaymentService>>, id: web::Path<Uuid>) -> Result<HttpResponse> {
    let payment = service.get_payment(&ctx, *id).await?;
    Ok(HttpResponse::Ok().json(envelope_ok(payment, Some(ctx.request_id.to_string()))))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1/payments")
            .route("", web::post().to(create_payment))
            .route("/{id}", web::get().to(get_payment))
            .route("/{id}/approve", web::post().to(approve_payment))
            .route("/{id}/confirm", web::post().to(confirm_payment)),
    );
}
