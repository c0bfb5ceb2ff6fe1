//! Refund endpoints (spec §6).

use actix_web::{web, HttpResponse};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::context::RequestContext;
use crate::error::{envelope_ok, Result};
use crate::idempotency::IdempotencyGate;
use crate::middleware::idempotency_guard::{acquire, GuardDecision};
use crate::services::RefundService;

const IDEMPOTENCY_HEADER: &str = "X-Idempotency-Key";

#[derive(Debug, Deserialize)]
pub struct CreateRefundRequest {
    pub payment_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub reason: Option<String>,
}

pub async fn create_refund(
    ctx: RequestContext,
    service: web::Data<Arc<RefundService>>,
    gate: web::Data<Arc<IdempotencyGate>>,
    req: actix_web::HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse> {
    let key_header = req
        .headers()
        .get(IDEMPOTENCY_HEADER)
        .and_then(|v| v.to_str().ok());
    let decision = acquire(&gate, &ctx, "POST /api/v1/refunds", key_header, &body, gate.default_ttl()).await?;
    let (key, payload_hash) = match decision {
        GuardDecision::Cached { response, status } => {
            return Ok(HttpResponse::build(actix_web::http::StatusCode::from_u16(status as u16).unwrap())
                .content_type("application/json")
                .body(response));
        }
        GuardDecision::Proceed { key, payload_hash } => (key, payload_hash),
    };

    let payload: CreateRefundRequest = serde_json::from_slice(&body)
        .map_err(|e| crate::error::AppError::Validation(format!("invalid request body: {}", e)))?;

    let result = service
        .create_refund(&ctx, payload.payment_id, payload.amount, payload.currency, payload.reason)
        .await;

    match result {
        Ok(refund) => {
            let envelope = envelope_ok(&refund, Some(ctx.request_id.to_string()));
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

pub async fn get_refund(ctx: RequestContext, service: web::Data<Arc<RefundService>>, id: web::Path<Uuid>) -> Result<HttpResponse> {
    let refund = service.get_refund(&ctx, *id).await?;
    Ok(HttpResponse::Ok().json(envelope_ok(refund, Some(ctx.request_id.to_string()))))
}

pub async fn list_refunds_for_payment(
    ctx: RequestContext,
    service: web::Data<Arc<RefundService>>,
    payment_id: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let refunds = service.list_refunds_for_payment(&ctx, *payment_id).await?;
    Ok(HttpResponse::Ok().json(envelope_ok(refunds, Some(ctx.request_id.to_string()))))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1/refunds")
            .route("", web::post().to(create_refund))
            .route("/{id}", web::get().to(get_refund)),
    );
    cfg.service(
        web::scope("/api/v1/payments")
            .route("/{id}/refunds", web::get().to(list_refunds_for_payment)),
    );
}
