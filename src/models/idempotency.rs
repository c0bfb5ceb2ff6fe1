use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Key identifying a guarded request (spec §4.1).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey {
    pub tenant_id: String,
    pub endpoint: String,
    pub client_key: String,
}

impl IdempotencyKey {
    pub fn cache_key(&self) -> String {
        format!("idem:{}:{}:{}", self.tenant_id, self.endpoint, self.client_key)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct IdempotencyRecord {
    pub tenant_id: String,
    pub endpoint: String,
    pub client_key: String,
    pub payload_hash: String,
    pub response: Option<Vec<u8>>,
    pub http_status: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    /// Exactly-`expires_at` counts as absent (spec §8 boundary behaviour).
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    pub fn is_completed(&self) -> bool {
        self.response.is_some()
    }
}

/// Outcome of `IdempotencyGate::acquire_lock`.
#[derive(Debug, Clone)]
pub enum AcquireOutcome {
    Miss,
    Hit { response: Vec<u8>, status: i32 },
    Conflict,
    Processing,
}

impl AcquireOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            AcquireOutcome::Miss => "miss",
            AcquireOutcome::Hit { .. } => "hit",
            AcquireOutcome::Conflict => "conflict",
            AcquireOutcome::Processing => "processing",
        }
    }
}
