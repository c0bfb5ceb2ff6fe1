//! Payment gateway adapter collaborator (spec §4.4, §6). Two-phase
//! approve/confirm over HTTP, modeled on `adapters/src/connector.rs`'s
//! request/response shapes.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::PgConfig;
use crate::error::{AppError, Result};

#[derive(Debug, Clone, Serialize)]
pub struct ApprovalRequest {
    pub order_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub payment_method: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApprovalResponse {
    pub pg_transaction_id: String,
    pub pg_payment_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefundResponse {
    pub pg_refund_id: String,
}

/// Hold (approve), settle (confirm), release (cancel), and reverse (refund)
/// against the gateway. Implementations need not be idempotent themselves —
/// the resilience wrapper and the caller's outer retry loop only re-invoke
/// `confirm`/`cancel`/`refund`, which the reference gateway treats as safe
/// to repeat for the same `pg_transaction_id`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PgClient: Send + Sync {
    async fn request_approval(&self, req: ApprovalRequest) -> Result<ApprovalResponse>;
    async fn confirm(&self, pg_transaction_id: &str) -> Result<()>;
    async fn cancel(&self, pg_transaction_id: &str) -> Result<()>;
    async fn refund(&self, pg_transaction_id: &str, amount: Decimal) -> Result<RefundResponse>;
}

pub struct HttpPgClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpPgClient {
    pub fn new(config: &PgConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .timeout(Duration::from_millis(config.total_timeout_ms))
            .build()
            .map_err(|e| AppError::Internal(e.to_string()))?;
        Ok(Self { http, base_url: config.base_url.clone() })
    }

    fn map_err(e: reqwest::Error) -> AppError {
        if e.is_timeout() {
            AppError::UpstreamTimeout
        } else {
            AppError::PgError(e.to_string())
        }
    }
}

#[async_trait]
impl PgClient for HttpPgClient {
    async fn request_approval(&self, req: ApprovalRequest) -> Result<ApprovalResponse> {
        let resp = self
            .http
            .post(format!("{}/v1/approvals", self.base_url))
            .json(&req)
            .send()
            .await
            .map_err(Self::map_err)?;
        if !resp.status().is_success() {
            return Err(AppError::PgError(format!("approval rejected: {}", resp.status())));
        }
        resp.json().await.map_err(Self::map_err)
    }

    async fn confirm(&self, pg_transaction_id: &str) -> Result<()> {
        let resp = self
            .http
            .post(format!("{}/v1/approvals/{}/confirm", self.base_url, pg_transaction_id))
            .send()
            .await
            .map_err(Self::map_err)?;
        if !resp.status().is_success() {
            return Err(AppError::PgError(format!("confirm rejected: {}", resp.status())));
        }
        Ok(())
    }

    async fn cancel(&self, pg_transaction_id: &str) -> Result<()> {
        let resp = self
            .http
            .post(format!("{}/v1/approvals/{}/cancel", self.base_url, pg_transaction_id))
            .send()
            .await
            .map_err(Self::map_err)?;
        if !resp.status().is_success() {
            return Err(AppError::PgError(format!("cancel rejected: {}", resp.status())));
        }
        Ok(())
    }

    async fn refund(&self, pg_transaction_id: &str, amount: Decimal) -> Result<RefundResponse> {
        let resp = self
            .http
            .post(format!("{}/v1/approvals/{}/refund", self.base_url, pg_transaction_id))
            .json(&serde_json::json!({ "amount": amount }))
            .send()
            .await
            .map_err(Self::map_err)?;
        if !resp.status().is_success() {
            return Err(AppError::PgError(format!("refund rejected: {}", resp.status())));
        }
        resp.json().await.map_err(Self::map_err)
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// In-memory stand-in used by service-layer tests; never reachable from
    /// non-test code.
    pub struct MockPgClient {
        pub fail_approvals: bool,
        counter: AtomicU32,
    }

    impl MockPgClient {
        pub fn new(fail_approvals: bool) -> Self {
            Self { fail_approvals, counter: AtomicU32::new(0) }
        }
    }

    #[async_trait]
    impl PgClient for MockPgClient {
        async fn request_approval(&self, _req: ApprovalRequest) -> Result<ApprovalResponse> {
            if self.fail_approvals {
                return Err(AppError::PgError("mock rejection".into()));
            }
            let n = self.counter.fetch_add(1, Ordering::SeqCst);
            Ok(ApprovalResponse {
                pg_transaction_id: format!("mock-txn-{}", n),
                pg_payment_key: format!("mock-key-{}", n),
            })
        }

        async fn confirm(&self, _pg_transaction_id: &str) -> Result<()> {
            Ok(())
        }

        async fn cancel(&self, _pg_transaction_id: &str) -> Result<()> {
            Ok(())
        }

        async fn refund(&self, pg_transaction_id: &str, _amount: Decimal) -> Result<RefundResponse> {
            Ok(RefundResponse { pg_refund_id: format!("mock-refund-{}", pg_transaction_id) })
        }
    }
}

#[cfg(test)]
mod http_client_tests {
    use super::*;
    use httpmock::MockServer;

    fn config_for(base_url: String) -> PgConfig {
        PgConfig {
            base_url,
            connect_timeout_ms: 1000,
            read_timeout_ms: 1000,
            total_timeout_ms: 1000,
            cb_failure_rate_threshold: 0.5,
            cb_min_calls: 10,
            cb_open_seconds: 30,
            bulkhead_max_concurrent: 50,
            approval_max_age_hours: 24,
            webhook_hmac_secret: "s".into(),
            webhook_timestamp_tolerance_secs: 300,
        }
    }

    #[tokio::test]
    async fn request_approval_parses_success_response() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(httpmock::Method::POST).path("/v1/approvals");
            then.status(200)
                .json_body(serde_json::json!({ "pg_transaction_id": "t1", "pg_payment_key": "k1" }));
        });

        let client = HttpPgClient::new(&config_for(server.base_url())).unwrap();
        let resp = client
            .request_approval(ApprovalRequest {
                order_id: "o1".into(),
                amount: Decimal::new(20000, 0),
                currency: "KRW".into(),
                payment_method: Some("CARD".into()),
            })
            .await
            .unwrap();

        mock.assert();
        assert_eq!(resp.pg_transaction_id, "t1");
        assert_eq!(resp.pg_payment_key, "k1");
    }

    #[tokio::test]
    async fn request_approval_maps_non_success_status_to_pg_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(httpmock::Method::POST).path("/v1/approvals");
            then.status(502);
        });

        let client = HttpPgClient::new(&config_for(server.base_url())).unwrap();
        let err = client
            .request_approval(ApprovalRequest {
                order_id: "o1".into(),
                amount: Decimal::new(1000, 0),
                currency: "KRW".into(),
                payment_method: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PgError(_)));
    }

    #[tokio::test]
    async fn confirm_posts_to_transaction_scoped_path() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(httpmock::Method::POST).path("/v1/approvals/txn-1/confirm");
            then.status(200);
        });

        let client = HttpPgClient::new(&config_for(server.base_url())).unwrap();
        client.confirm("txn-1").await.unwrap();
        mock.assert();
    }
}
