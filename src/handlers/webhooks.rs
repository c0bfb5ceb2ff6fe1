//! Inbound PG webhook endpoint (spec §6, §7): `/webhooks/pg/{vendor}`.
//! Exempt from tenant scoping — the gateway authenticates via HMAC
//! signature, not `X-Tenant-Id`.

use actix_web::{web, HttpResponse};
use chrono::{TimeZone, Utc};
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::payment::{WebhookOutcome, WebhookPayload, WebhookProcessor, WebhookVerifier};

pub async fn receive_webhook(
    verifier: web::Data<Arc<WebhookVerifier>>,
    db: web::Data<Arc<crate::db::Database>>,
    vendor: web::Path<String>,
    req: actix_web::HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse> {
    let signature = header_str(&req, "X-Signature")?;
    let timestamp_raw = header_str(&req, "X-Timestamp")?;
    let nonce = header_str(&req, "X-Nonce")?;

    let timestamp_secs: i64 = timestamp_raw
        .parse()
        .map_err(|_| AppError::Validation("X-Timestamp must be a unix epoch seconds integer".into()))?;
    let timestamp = Utc
        .timestamp_opt(timestamp_secs, 0)
        .single()
        .ok_or_else(|| AppError::Validation("X-Timestamp out of range".into()))?;

    verifier.verify(&body, signature, timestamp, Utc::now())?;

    let processor = WebhookProcessor::new(db.get_ref().clone(), vendor.into_inner());
    let first_delivery = processor.check_nonce(nonce).await?;
    if !first_delivery {
        return Ok(HttpResponse::Ok().json(serde_json::json!({ "status": "duplicate_ignored" })));
    }

    let payload: WebhookPayload = serde_json::from_slice(&body)
        .map_err(|e| AppError::Validation(format!("invalid webhook body: {}", e)))?;
    let pg_transaction_id = payload.pg_transaction_id.clone();

    match processor.apply(payload).await? {
        WebhookOutcome::Applied => Ok(HttpResponse::Ok().json(serde_json::json!({ "status": "applied" }))),
        WebhookOutcome::StaleIgnored => Ok(HttpResponse::Ok().json(serde_json::json!({ "status": "stale_ignored" }))),
        // Not yet visible to this replica, or the payment doesn't exist;
        // NACK so the gateway retries (spec §7) rather than dropping it.
        WebhookOutcome::UnknownTransaction => Err(AppError::UnknownWebhookTransaction(pg_transaction_id)),
    }
}

fn header_str<'a>(req: &'a actix_web::HttpRequest, name: &str) -> Result<&'a str> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Validation(format!("missing {} header", name)))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::scope("/webhooks/pg").route("/{vendor}", web::post().to(receive_webhook)));
}
