//! Circuit breaker + retry + bulkhead + timeout wrapper around `PgClient`
//! (spec §4.6). Grounded on `adapters/src/circuit_breaker.rs`'s state
//! machine and `services/settlement-engine/src/retry_strategy.rs`'s
//! exponential-backoff-with-jitter loop.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, Semaphore};
use tracing::{info, warn};

use crate::config::PgConfig;
use crate::error::{AppError, Result};
use crate::payment::pg_client::{ApprovalRequest, ApprovalResponse, PgClient, RefundResponse};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct CircuitBreaker {
    state: CircuitState,
    window: Vec<bool>,
    window_cap: usize,
    last_opened_at: Option<DateTime<Utc>>,
    config: PgConfig,
}

impl CircuitBreaker {
    fn new(config: PgConfig) -> Self {
        Self {
            state: CircuitState::Closed,
            window: Vec::new(),
            window_cap: (config.cb_min_calls as usize).max(1) * 2,
            last_opened_at: None,
            config,
        }
    }

    fn is_request_allowed(&mut self) -> Result<()> {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let opened = self.last_opened_at.expect("Open state always sets last_opened_at");
                let elapsed = (Utc::now() - opened).num_seconds() as u64;
                if elapsed >= self.config.cb_open_seconds {
                    info!("payment gateway circuit half-opening");
                    self.state = CircuitState::HalfOpen;
                    Ok(())
                } else {
                    Err(AppError::CircuitOpen { endpoint: "payment-gateway".into() })
                }
            }
        }
    }

    fn record(&mut self, success: bool) {
        match self.state {
            CircuitState::HalfOpen => {
                if success {
                    info!("payment gateway circuit closing after half-open probe succeeded");
                    self.state = CircuitState::Closed;
                    self.window.clear();
                } else {
                    warn!("payment gateway circuit re-opening after half-open probe failed");
                    self.state = CircuitState::Open;
                    self.last_opened_at = Some(Utc::now());
                    self.window.clear();
                }
            }
            CircuitState::Closed => {
                self.window.push(success);
                if self.window.len() > self.window_cap {
                    self.window.remove(0);
                }
                if self.window.len() as u32 >= self.config.cb_min_calls {
                    let failures = self.window.iter().filter(|s| !**s).count();
                    let rate = failures as f64 / self.window.len() as f64;
                    if rate >= self.config.cb_failure_rate_threshold {
                        warn!(rate, "payment gateway circuit opening");
                        self.state = CircuitState::Open;
                        self.last_opened_at = Some(Utc::now());
                        self.window.clear();
                    }
                }
            }
            CircuitState::Open => {}
        }
        Self::report_state(self.state);
    }

    fn state(&self) -> CircuitState {
        self.state
    }

    fn report_state(state: CircuitState) {
        let value = match state {
            CircuitState::Closed => 0,
            CircuitState::HalfOpen => 1,
            CircuitState::Open => 2,
        };
        crate::metrics::CIRCUIT_BREAKER_STATE
            .with_label_values(&["payment-gateway"])
            .set(value);
    }
}

/// Wraps any `PgClient` with circuit breaking, bounded concurrency (bulkhead),
/// and bounded retry with exponential backoff + jitter for idempotent calls.
pub struct ResilientPgClient<C: PgClient> {
    inner: C,
    breaker: RwLock<CircuitBreaker>,
    bulkhead: Semaphore,
    max_retries: u32,
}

impl<C: PgClient> ResilientPgClient<C> {
    pub fn new(inner: C, config: PgConfig) -> Self {
        let bulkhead = Semaphore::new(config.bulkhead_max_concurrent);
        Self {
            inner,
            breaker: RwLock::new(CircuitBreaker::new(config)),
            bulkhead,
            max_retries: 3,
        }
    }

    pub async fn circuit_state(&self) -> CircuitState {
        self.breaker.read().await.state()
    }

    /// 1s / 2s / 4s exponential backoff with jitter (spec §4.4).
    fn backoff_delay(attempt: u32) -> Duration {
        let base_ms = 1_000u64 * 2u64.saturating_pow(attempt);
        let capped = base_ms.min(4_000);
        let jitter = (rand::random::<f64>() * 0.2 - 0.1) * capped as f64;
        Duration::from_millis((capped as f64 + jitter).max(0.0) as u64)
    }

    /// Runs `op` under the bulkhead, the circuit breaker, and (only for
    /// `retryable` calls) an exponential-backoff retry loop.
    async fn guarded<T, F, Fut>(&self, operation: &str, retryable: bool, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let _permit = self
            .bulkhead
            .acquire()
            .await
            .map_err(|_| AppError::ServiceUnavailable("bulkhead closed".into()))?;

        self.breaker.write().await.is_request_allowed()?;

        let started = std::time::Instant::now();
        let attempts = if retryable { self.max_retries } else { 0 };
        let mut last_err = None;
        let result = 'attempts: {
            for attempt in 0..=attempts {
                if attempt > 0 {
                    tokio::time::sleep(Self::backoff_delay(attempt - 1)).await;
                }
                match op().await {
                    Ok(v) => {
                        self.breaker.write().await.record(true);
                        break 'attempts Ok(v);
                    }
                    Err(e) => {
                        let retry_this = retryable && e.is_retryable_upstream();
                        self.breaker.write().await.record(false);
                        if !retry_this {
                            break 'attempts Err(e);
                        }
                        warn!(attempt, error = %e, "payment gateway call failed, retrying");
                        last_err = Some(e);
                    }
                }
            }
            Err(last_err.unwrap_or_else(|| AppError::Internal("retry loop exited without result".into())))
        };
        crate::metrics::PG_CALL_LATENCY
            .with_label_values(&[operation])
            .observe(started.elapsed().as_secs_f64());
        result
    }
}

#[async_trait]
impl<C: PgClient> PgClient for ResilientPgClient<C> {
    /// Approval is not retried automatically: a timed-out approval may have
    /// actually succeeded at the gateway, and blindly retrying risks a
    /// second hold. The caller reconciles via webhook/status lookup instead.
    async fn request_approval(&self, req: ApprovalRequest) -> Result<ApprovalResponse> {
        self.guarded("request_approval", false, || self.inner.request_approval(req.clone())).await
    }

    async fn confirm(&self, pg_transaction_id: &str) -> Result<()> {
        self.guarded("confirm", true, || self.inner.confirm(pg_transaction_id)).await
    }

    async fn cancel(&self, pg_transaction_id: &str) -> Result<()> {
        self.guarded("cancel", true, || self.inner.cancel(pg_transaction_id)).await
    }

    async fn refund(&self, pg_transaction_id: &str, amount: Decimal) -> Result<RefundResponse> {
        self.guarded("refund", true, || self.inner.refund(pg_transaction_id, amount)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payment::pg_client::mock::MockPgClient;

    fn config() -> PgConfig {
        PgConfig {
            base_url: "http://localhost".into(),
            connect_timeout_ms: 100,
            read_timeout_ms: 100,
            total_timeout_ms: 100,
            cb_failure_rate_threshold: 0.5,
            cb_min_calls: 2,
            cb_open_seconds: 30,
            bulkhead_max_concurrent: 4,
            approval_max_age_hours: 24,
            webhook_hmac_secret: "s".into(),
            webhook_timestamp_tolerance_secs: 300,
        }
    }

    #[tokio::test]
    async fn circuit_opens_after_failure_rate_exceeded() {
        let client = ResilientPgClient::new(MockPgClient::new(true), config());
        for _ in 0..2 {
            let _ = client
                .request_approval(ApprovalRequest {
                    order_id: "o1".into(),
                    amount: Decimal::new(1000, 0),
                    currency: "KRW".into(),
                    payment_method: None,
                })
                .await;
        }
        assert_eq!(client.circuit_state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn confirm_retries_on_timeout_then_succeeds() {
        let client = ResilientPgClient::new(MockPgClient::new(false), config());
        let result = client.confirm("mock-txn-0").await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn confirm_retries_transient_timeouts_up_to_max_then_succeeds() {
        use crate::payment::pg_client::MockPgClient as AutoMockPgClient;
        use std::sync::atomic::{AtomicU32, Ordering};

        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_in_mock = attempts.clone();
        let mut mock = AutoMockPgClient::new();
        mock.expect_confirm().returning(move |_| {
            let n = attempts_in_mock.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(AppError::UpstreamTimeout)
            } else {
                Ok(())
            }
        });

        let client = ResilientPgClient::new(mock, config());
        let result = client.confirm("txn-retry").await;
        assert!(result.is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn request_approval_is_never_retried_on_timeout() {
        use crate::payment::pg_client::MockPgClient as AutoMockPgClient;

        let mut mock = AutoMockPgClient::new();
        mock.expect_request_approval()
            .times(1)
            .returning(|_| Err(AppError::UpstreamTimeout));

        let client = ResilientPgClient::new(mock, config());
        let result = client
            .request_approval(ApprovalRequest {
                order_id: "o1".into(),
                amount: Decimal::new(1000, 0),
                currency: "KRW".into(),
                payment_method: None,
            })
            .await;
        assert!(result.is_err());
    }
}
