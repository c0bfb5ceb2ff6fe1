//! Two-tier idempotency gate (spec §4.1): fast cache + durable store,
//! deduplicating retries and detecting payload conflicts.

use chrono::Utc;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::cache::Cache;
use crate::db::Database;
use crate::error::Result;
use crate::models::{AcquireOutcome, IdempotencyKey};

#[derive(Debug, Clone, serde::Serialize)]
struct FastTierEntry {
    hash: String,
    response: Option<Vec<u8>>,
    status: Option<i32>,
}

pub struct IdempotencyGate {
    cache: Arc<dyn Cache>,
    db: Arc<Database>,
    default_ttl: Duration,
}

impl IdempotencyGate {
    pub fn new(cache: Arc<dyn Cache>, db: Arc<Database>, default_ttl: Duration) -> Self {
        Self { cache, db, default_ttl }
    }

    pub fn hash_payload(body: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(body);
        hex_encode(&hasher.finalize())
    }

    /// Attempt to acquire the lock for `key`. See spec §4.1 for the full
    /// decision table.
    pub async fn acquire_lock(
        &self,
        key: &IdempotencyKey,
        payload_hash: &str,
        ttl: Duration,
    ) -> Result<AcquireOutcome> {
        let outcome = match self.try_fast_tier(key, payload_hash, ttl).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!(error = %e, "idempotency fast tier failed, falling back to durable tier");
                self.durable_tier_decision(key, payload_hash, ttl).await
            }
        };
        if let Ok(outcome) = &outcome {
            crate::metrics::IDEMPOTENCY_DECISIONS
                .with_label_values(&[outcome.label()])
                .inc();
        }
        outcome
    }

    async fn try_fast_tier(
        &self,
        key: &IdempotencyKey,
        payload_hash: &str,
        ttl: Duration,
    ) -> Result<AcquireOutcome> {
        let cache_key = key.cache_key();
        let placeholder = FastTierEntry {
            hash: payload_hash.to_string(),
            response: None,
            status: None,
        };
        let created = self
            .cache
            .set_nx(&cache_key, &serde_json::to_vec(&placeholder)?, ttl)
            .await?;

        if created {
            // Best-effort durable placeholder; durable tier is authoritative
            // if this insert fails or the fast tier is unavailable later.
            let expires_at = Utc::now() + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::hours(24));
            let _ = self
                .db
                .insert_idempotency_placeholder(
                    &key.tenant_id,
                    &key.endpoint,
                    &key.client_key,
                    payload_hash,
                    expires_at,
                )
                .await;
            return Ok(AcquireOutcome::Miss);
        }

        let raw = self.cache.get(&cache_key).await?;
        let Some(raw) = raw else {
            // Entry vanished between set_nx and get (TTL race); treat as miss.
            return Ok(AcquireOutcome::Miss);
        };
        let entry: FastTierEntry = serde_json::from_slice(&raw)?;
        if entry.hash != payload_hash {
            return Ok(AcquireOutcome::Conflict);
        }
        match (entry.response, entry.status) {
            (Some(response), Some(status)) => Ok(AcquireOutcome::Hit { response, status }),
            _ => Ok(AcquireOutcome::Processing),
        }
    }

    async fn durable_tier_decision(
        &self,
        key: &IdempotencyKey,
        payload_hash: &str,
        ttl: Duration,
    ) -> Result<AcquireOutcome> {
        let expires_at = Utc::now() + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::hours(24));
        let created = self
            .db
            .insert_idempotency_placeholder(
                &key.tenant_id,
                &key.endpoint,
                &key.client_key,
                payload_hash,
                expires_at,
            )
            .await?;
        if created {
            return Ok(AcquireOutcome::Miss);
        }

        let record = self
            .db
            .get_idempotency_record(&key.tenant_id, &key.endpoint, &key.client_key)
            .await?;
        match record {
            None => Ok(AcquireOutcome::Miss),
            Some(record) if !record.is_live(Utc::now()) => Ok(AcquireOutcome::Miss),
            Some(record) if record.payload_hash != payload_hash => Ok(AcquireOutcome::Conflict),
            Some(record) if record.is_completed() => Ok(AcquireOutcome::Hit {
                response: record.response.unwrap_or_default(),
                status: record.http_status.unwrap_or(200),
            }),
            Some(_) => Ok(AcquireOutcome::Processing),
        }
    }

    /// Write the completed response to both tiers (spec §4.1). Durable must
    /// succeed; fast-tier failure is logged but non-fatal.
    pub async fn store(
        &self,
        key: &IdempotencyKey,
        payload_hash: &str,
        response: &[u8],
        status: i32,
        ttl: Duration,
    ) -> Result<()> {
        self.db
            .complete_idempotency_record(&key.tenant_id, &key.endpoint, &key.client_key, response, status)
            .await?;

        let entry = FastTierEntry {
            hash: payload_hash.to_string(),
            response: Some(response.to_vec()),
            status: Some(status),
        };
        if let Ok(bytes) = serde_json::to_vec(&entry) {
            if let Err(e) = self.cache.set(&key.cache_key(), &bytes, ttl).await {
                warn!(error = %e, "failed to write idempotency response to fast tier");
            }
        }
        Ok(())
    }

    /// Release the placeholder from both tiers, used on upstream exceptions
    /// before any state change (spec §4.1).
    pub async fn release_lock(&self, key: &IdempotencyKey) -> Result<()> {
        let _ = self.cache.del(&key.cache_key()).await;
        self.db
            .release_idempotency_placeholder(&key.tenant_id, &key.endpoint, &key.client_key)
            .await?;
        Ok(())
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable() {
        let a = IdempotencyGate::hash_payload(b"{\"x\":1}");
        let b = IdempotencyGate::hash_payload(b"{\"x\":1}");
        let c = IdempotencyGate::hash_payload(b"{\"x\":2}");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
