//! Request-scoped context, threaded explicitly through every call instead of
//! relying on thread-locals or process globals (spec §9).

use actix_web::{dev::Payload, FromRequest, HttpRequest};
use std::future::{ready, Ready};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::error::AppError;

/// Sentinel tenant id for internal background work that has no caller.
/// Never returned by the tenant-extraction middleware for end-user requests —
/// see SPEC_FULL.md §12 for why this convention (not `"default"`) was chosen.
pub const INTERNAL_TENANT: &str = "__default__";

#[derive(Debug, Clone)]
pub struct TenantId(pub String);

impl TenantId {
    pub fn internal() -> Self {
        TenantId(INTERNAL_TENANT.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Carries the tenant, a correlation id for logging, and a deadline that
/// every suspension point (DB, cache, PG, event bus) must respect.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub tenant_id: TenantId,
    pub request_id: Uuid,
    pub trace_id: Option<String>,
    deadline: Instant,
}

impl RequestContext {
    pub fn new(tenant_id: TenantId, base_budget: Duration) -> Self {
        Self {
            tenant_id,
            request_id: Uuid::new_v4(),
            trace_id: None,
            deadline: Instant::now() + base_budget,
        }
    }

    pub fn internal(base_budget: Duration) -> Self {
        Self::new(TenantId::internal(), base_budget)
    }

    /// Remaining budget for the next suspension point; zero once expired.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Derive a child context for a spawned background task with the same
    /// deadline and tenant, per spec §4.6 ("including background tasks
    /// spawned on its behalf").
    pub fn child(&self) -> Self {
        Self {
            tenant_id: self.tenant_id.clone(),
            request_id: self.request_id,
            trace_id: self.trace_id.clone(),
            deadline: self.deadline,
        }
    }
}

/// Pulls the context stashed by `middleware::tenant::TenantResolver` out of
/// request extensions; missing means the route isn't behind that middleware.
impl FromRequest for RequestContext {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let ctx = req.extensions().get::<RequestContext>().cloned();
        ready(ctx.ok_or(AppError::MissingTenant))
    }
}
