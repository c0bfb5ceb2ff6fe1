//! Tenant resolution middleware (spec §4.6): extracts `X-Tenant-Id` and
//! stashes a fresh `RequestContext` in request extensions for handlers to
//! pull out, instead of a thread-local or process global. Modeled on the
//! `Transform`/`Service` middleware shape in `services/risk-engine/src/middleware/rate_limit.rs`.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpMessage,
};
use futures_util::future::LocalBoxFuture;
use std::future::{ready, Ready};
use std::rc::Rc;
use std::time::Duration;

use crate::context::{RequestContext, TenantId};
use crate::error::AppError;

const TENANT_HEADER: &str = "X-Tenant-Id";

/// Paths that operate without end-user tenant scoping (health checks,
/// inbound webhooks authenticate via signature instead).
fn is_tenant_exempt(path: &str) -> bool {
    path == "/healthz" || path == "/readyz" || path == "/metrics" || path.starts_with("/webhooks/")
}

pub struct TenantResolver {
    request_budget: Duration,
}

impl TenantResolver {
    pub fn new(request_budget: Duration) -> Self {
        Self { request_budget }
    }
}

impl<S, B> Transform<S, ServiceRequest> for TenantResolver
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = TenantResolverMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(TenantResolverMiddleware {
            service: Rc::new(service),
            request_budget: self.request_budget,
        }))
    }
}

pub struct TenantResolverMiddleware<S> {
    service: Rc<S>,
    request_budget: Duration,
}

impl<S, B> Service<ServiceRequest> for TenantResolverMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        if is_tenant_exempt(req.path()) {
            let fut = self.service.call(req);
            return Box::pin(async move { fut.await });
        }

        let tenant_header = req
            .headers()
            .get(TENANT_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());

        let budget = self.request_budget;
        let service = self.service.clone();
        Box::pin(async move {
            let Some(tenant_id) = tenant_header else {
                return Err(AppError::MissingTenant.into());
            };
            let ctx = RequestContext::new(TenantId(tenant_id), budget);
            req.extensions_mut().insert(ctx);
            service.call(req).await
        })
    }
}
