//! Webhook reconciliation (spec §4.4, §6): HMAC verification, nonce/tx dedup,
//! and out-of-order tolerance via `PaymentStatus::rank()`.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{error, warn};

use crate::db::Database;
use crate::error::{AppError, Result};
use crate::models::{Payment, PaymentStatus};

type HmacSha256 = Hmac<Sha256>;

const MAX_FAILURE_ATTEMPTS: i32 = 5;

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    pub pg_transaction_id: String,
    pub status: WebhookStatus,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WebhookStatus {
    Approved,
    Confirmed,
    Failed,
}

impl WebhookStatus {
    fn to_payment_status(self) -> PaymentStatus {
        match self {
            WebhookStatus::Approved => PaymentStatus::Approved,
            WebhookStatus::Confirmed => PaymentStatus::Confirmed,
            WebhookStatus::Failed => PaymentStatus::Failed,
        }
    }
}

/// Outcome the HTTP handler uses to pick a status code; every branch still
/// returns 200 to the PG except signature/nonce rejection (spec §6/§8:
/// "Replaying a webhook with the same pg_transaction_id is a no-op ... 200").
#[derive(Debug, PartialEq, Eq)]
pub enum WebhookOutcome {
    Applied,
    StaleIgnored,
    UnknownTransaction,
}

pub struct WebhookVerifier {
    secret: String,
    timestamp_tolerance_secs: i64,
}

impl WebhookVerifier {
    pub fn new(secret: String, timestamp_tolerance_secs: i64) -> Self {
        Self { secret, timestamp_tolerance_secs }
    }

    /// Verifies `X-Signature` (HMAC-SHA256 over `"{timestamp}.{body}"`) and
    /// the ±5 minute timestamp tolerance (spec §6).
    pub fn verify(&self, body: &[u8], signature_hex: &str, timestamp: DateTime<Utc>, now: DateTime<Utc>) -> Result<()> {
        if (now - timestamp).num_seconds().abs() > self.timestamp_tolerance_secs {
            return Err(AppError::Validation("webhook timestamp outside tolerance".into()));
        }

        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| AppError::Internal(e.to_string()))?;
        mac.update(timestamp.timestamp().to_string().as_bytes());
        mac.update(b".");
        mac.update(body);
        let expected = mac.finalize().into_bytes();

        let provided = hex_decode(signature_hex).ok_or_else(|| AppError::Validation("malformed signature".into()))?;
        if expected.as_slice().ct_eq(&provided).into() {
            Ok(())
        } else {
            Err(AppError::Validation("webhook signature mismatch".into()))
        }
    }
}

pub struct WebhookProcessor {
    db: Arc<Database>,
    vendor: String,
}

impl WebhookProcessor {
    pub fn new(db: Arc<Database>, vendor: String) -> Self {
        Self { db, vendor }
    }

    /// Enforces nonce uniqueness within the tolerance window (spec §6).
    pub async fn check_nonce(&self, nonce: &str) -> Result<bool> {
        self.db.record_webhook_nonce(&self.vendor, nonce, Utc::now()).await
    }

    /// Applies a verified webhook to the matching Payment, honoring the
    /// rank-based out-of-order tolerance, and tracks repeated failures
    /// toward the operator inbox (spec §7).
    pub async fn apply(&self, payload: WebhookPayload) -> Result<WebhookOutcome> {
        let result = self.apply_inner(&payload).await;
        match &result {
            Ok(_) => {
                let _ = self.db.clear_webhook_failure(&payload.pg_transaction_id).await;
            }
            Err(e) => {
                match self.db.record_webhook_failure(&payload.pg_transaction_id, &e.to_string()).await {
                    Ok(count) if count >= MAX_FAILURE_ATTEMPTS => {
                        error!(
                            pg_transaction_id = %payload.pg_transaction_id,
                            attempts = count,
                            "webhook repeatedly failed, escalating to operator inbox"
                        );
                        let _ = self.db.escalate_webhook_failure(&payload.pg_transaction_id).await;
                    }
                    Ok(_) => {}
                    Err(db_err) => warn!(error = %db_err, "failed to record webhook failure"),
                }
            }
        }
        result
    }

    async fn apply_inner(&self, payload: &WebhookPayload) -> Result<WebhookOutcome> {
        let Some(payment) = self
            .db
            .get_payment_by_pg_transaction_id(&payload.pg_transaction_id)
            .await?
        else {
            return Ok(WebhookOutcome::UnknownTransaction);
        };

        let incoming = payload.status.to_payment_status();
        if incoming.rank() <= payment.status.rank() {
            return Ok(WebhookOutcome::StaleIgnored);
        }

        let next = self.transition(&payment, incoming, payload.failure_reason.clone())?;
        let mut tx = self.db.pool().begin().await?;
        let updated = self.db.update_payment_cas(&mut tx, &next, payment.version).await?;
        if !updated {
            tx.rollback().await?;
            return Err(AppError::Invariant(format!(
                "payment {} version changed concurrently while applying webhook",
                payment.id
            )));
        }
        tx.commit().await?;
        Ok(WebhookOutcome::Applied)
    }

    fn transition(&self, payment: &Payment, to: PaymentStatus, failure_reason: Option<String>) -> Result<Payment> {
        match to {
            PaymentStatus::Approved => payment.mark_approved(
                payment.pg_transaction_id.clone().unwrap_or_default(),
                payment.pg_payment_key.clone().unwrap_or_default(),
            ),
            PaymentStatus::Confirmed => payment.mark_confirmed(),
            PaymentStatus::Failed => payment.mark_failed(failure_reason.unwrap_or_else(|| "webhook reported failure".into())),
            _ => Err(AppError::Invariant(format!("webhook cannot drive payment to {:?}", to))),
        }
    }
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_round_trips() {
        let verifier = WebhookVerifier::new("secret".into(), 300);
        let body = b"{\"pg_transaction_id\":\"t1\"}";
        let now = Utc::now();

        let mut mac = HmacSha256::new_from_slice(b"secret").unwrap();
        mac.update(now.timestamp().to_string().as_bytes());
        mac.update(b".");
        mac.update(body);
        let sig = mac.finalize().into_bytes();
        let sig_hex: String = sig.iter().map(|b| format!("{:02x}", b)).collect();

        assert!(verifier.verify(body, &sig_hex, now, now).is_ok());
    }

    #[test]
    fn signature_mismatch_rejected() {
        let verifier = WebhookVerifier::new("secret".into(), 300);
        let now = Utc::now();
        assert!(verifier.verify(b"body", "00", now, now).is_err());
    }

    #[test]
    fn timestamp_outside_tolerance_rejected() {
        let verifier = WebhookVerifier::new("secret".into(), 300);
        let now = Utc::now();
        let old = now - chrono::Duration::minutes(10);
        assert!(verifier.verify(b"body", "00", old, now).is_err());
    }
}
