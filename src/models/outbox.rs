use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    Pending,
    Processing,
    Published,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OutboxEvent {
    pub event_id: Uuid,
    pub tenant_id: String,
    pub aggregate_type: String,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub payload: Vec<u8>,
    pub status: OutboxStatus,
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    /// Earliest time the publisher's claim query may pick this row up again;
    /// advanced by `backoff_delay` on each failed publish (spec §4.2).
    pub next_attempt_at: DateTime<Utc>,
}

impl OutboxEvent {
    pub fn new(
        tenant_id: String,
        aggregate_type: impl Into<String>,
        aggregate_id: Uuid,
        event_type: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        let now = Utc::now();
        Self {
            event_id: Uuid::new_v4(),
            tenant_id,
            aggregate_type: aggregate_type.into(),
            aggregate_id,
            event_type: event_type.into(),
            payload,
            status: OutboxStatus::Pending,
            retry_count: 0,
            created_at: now,
            published_at: None,
            error: None,
            next_attempt_at: now,
        }
    }

    /// Partition key per spec §6: `tenant_id:aggregate_id`.
    pub fn partition_key(&self) -> String {
        format!("{}:{}", self.tenant_id, self.aggregate_id)
    }

    /// 1s / 2s / 4s exponential backoff before the next publish attempt
    /// (spec §4.2), keyed on `retry_count` *after* the failure being
    /// scheduled (1st failure -> 1s, 2nd -> 2s, 3rd+ -> 4s).
    pub fn backoff_delay(retry_count: i32) -> chrono::Duration {
        let exp = (retry_count - 1).max(0).min(2) as u32;
        chrono::Duration::seconds(1i64 << exp)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ProcessedEvent {
    pub event_id: Uuid,
    pub processed_at: DateTime<Utc>,
}
