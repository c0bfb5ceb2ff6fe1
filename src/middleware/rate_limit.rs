//! Per-tenant request rate limiting (spec §4.6), modeled on the
//! `Transform`/`Service` shape of `services/risk-engine/src/middleware/rate_limit.rs`,
//! generalized from that teacher's single global limiter to one bucket per
//! tenant via `governor`'s keyed rate limiter.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpMessage,
};
use futures_util::future::LocalBoxFuture;
use governor::{clock::DefaultClock, state::keyed::DefaultKeyedStateStore, Quota, RateLimiter as GovernorRateLimiter};
use std::future::{ready, Ready};
use std::num::NonZeroU32;
use std::rc::Rc;
use std::sync::Arc;

use crate::context::{RequestContext, TenantId};
use crate::error::AppError;

type TenantLimiter = GovernorRateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

pub struct TenantRateLimiter {
    limiter: Arc<TenantLimiter>,
}

impl TenantRateLimiter {
    pub fn new(requests_per_second: u32, burst: u32) -> Self {
        let per_second = NonZeroU32::new(requests_per_second.max(1)).unwrap();
        let burst = NonZeroU32::new(burst.max(1)).unwrap();
        let quota = Quota::per_second(per_second).allow_burst(burst);
        Self {
            limiter: Arc::new(GovernorRateLimiter::keyed(quota)),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for TenantRateLimiter
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = TenantRateLimiterMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(TenantRateLimiterMiddleware {
            service: Rc::new(service),
            limiter: self.limiter.clone(),
        }))
    }
}

pub struct TenantRateLimiterMiddleware<S> {
    service: Rc<S>,
    limiter: Arc<TenantLimiter>,
}

impl<S, B> Service<ServiceRequest> for TenantRateLimiterMiddleware<S>
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
        if req.path() == "/healthz" || req.path() == "/readyz" || req.path() == "/metrics" {
            let fut = self.service.call(req);
            return Box::pin(async move { fut.await });
        }

        // The tenant-resolver middleware runs before this one and has already
        // stashed the context; fall back to the raw header for requests on
        // exempt-from-tenant paths (e.g. webhooks) where no context exists.
        let key = req
            .extensions()
            .get::<RequestContext>()
            .map(|ctx| ctx.tenant_id.as_str().to_string())
            .unwrap_or_else(|| TenantId::internal().as_str().to_string());

        match self.limiter.check_key(&key) {
            Ok(_) => {
                let fut = self.service.call(req);
                Box::pin(async move { fut.await })
            }
            Err(_) => {
                tracing::warn!(tenant = %key, path = %req.path(), "rate limit exceeded");
                Box::pin(async { Err(AppError::RateLimited.into()) })
            }
        }
    }
}
