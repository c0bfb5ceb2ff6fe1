//! Liveness/readiness probes (spec §9), exempt from tenant scoping and rate
//! limiting.

use actix_web::{web, HttpResponse};
use serde_json::json;
use std::sync::Arc;

use crate::db::Database;

pub async fn healthz() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "healthy", "service": "fluxpay" }))
}

/// Readiness additionally checks the database is reachable; an unhealthy
/// dependency should pull the instance out of the load balancer rotation
/// rather than accept traffic it cannot serve.
pub async fn readyz(db: web::Data<Arc<Database>>) -> HttpResponse {
    match sqlx::query("SELECT 1").execute(db.pool()).await {
        Ok(_) => HttpResponse::Ok().json(json!({ "status": "ready" })),
        Err(e) => {
            tracing::warn!(error = %e, "readiness check failed");
            HttpResponse::ServiceUnavailable().json(json!({ "status": "not_ready" }))
        }
    }
}

pub async fn metrics() -> HttpResponse {
    match crate::metrics::export() {
        Ok(body) => HttpResponse::Ok().content_type("text/plain; version=0.0.4").body(body),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            HttpResponse::InternalServerError().finish()
        }
    }
}
