//! Order endpoints (spec §6).

use actix_web::{web, HttpResponse};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::context::RequestContext;
use crate::error::{envelope_ok, Result};
use crate::idempotency::IdempotencyGate;
use crate::middleware::idempotency_guard::{acquire, GuardDecision};
use crate::models::LineItem;
use crate::services::OrderService;

const IDEMPOTENCY_HEADER: &str = "X-Idempotency-Key";

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub user_id: String,
    pub currency: String,
    pub line_items: Vec<LineItem>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct ListOrdersQuery {
    #[serde(rename = "userId")]
    pub user_id: String,
}

pub async fn create_order(
    ctx: RequestContext,
    service: web::Data<Arc<OrderService>>,
    gate: web::Data<Arc<IdempotencyGate>>,
    req: actix_web::HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse> {
    let key_header = req
        .headers()
        .get(IDEMPOTENCY_HEADER)
        .and_then(|v| v.to_str().ok());
    let decision = acquire(&gate, &ctx, "POST /api/v1/orders", key_header, &body, gate.default_ttl()).await?;
    let (key, payload_hash) = match decision {
        GuardDecision::Cached { response, status } => {
            return Ok(HttpResponse::build(actix_web::http::StatusCode::from_u16(status as u16).unwrap())
                .content_type("application/json")
                .body(response));
        }
        GuardDecision::Proceed { key, payload_hash } => (key, payload_hash),
    };

    let payload: CreateOrderRequest = serde_json::from_slice(&body)
        .map_err(|e| crate::error::AppError::Validation(format!("invalid request body: {}", e)))?;

    let result = service
        .create_order(&ctx, payload.user_id, payload.currency, payload.line_items, payload.metadata)
        .await;

    match result {
        Ok(order) => {
            let envelope = envelope_ok(&order, Some(ctx.request_id.to_string()));
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

pub async fn get_order(ctx: RequestContext, service: web::Data<Arc<OrderService>>, id: web::Path<Uuid>) -> Result<HttpResponse> {
    let order = service.get_order(&ctx, *id).await?;
    Ok(HttpResponse::Ok().json(envelope_ok(order, Some(ctx.request_id.to_string()))))
}

pub async fn list_orders(
    ctx: RequestContext,
    service: web::Data<Arc<OrderService>>,
    query: web::Query<ListOrdersQuery>,
) -> Result<HttpResponse> {
    let orders = service.list_orders(&ctx, &query.user_id).await?;
    Ok(HttpResponse::Ok().json(envelope_ok(orders, Some(ctx.request_id.to_string()))))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1/orders")
            .route("", web::post().to(create_order))
            .route("", web::get().to(list_orders))
            .route("/{id}", web::get().to(get_order)),
    );
}
