//! Event bus collaborator (spec §6): `EventBus.publish(topic, key, payload)`.
//! CloudEvents v1.0 envelope, NATS JetStream as the concrete implementation,
//! modeled on `message-bus/src/publisher.rs` and `message-bus/src/partitioning.rs`.

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{AppError, Result};

#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, topic: &str, partition_key: &str, payload: Vec<u8>) -> Result<()>;
}

#[derive(Debug, Serialize)]
pub struct CloudEvent<'a> {
    pub id: Uuid,
    pub source: &'a str,
    #[serde(rename = "specversion")]
    pub spec_version: &'static str,
    #[serde(rename = "type")]
    pub event_type: &'a str,
    pub time: chrono::DateTime<Utc>,
    #[serde(rename = "datacontenttype")]
    pub data_content_type: &'static str,
    pub data: serde_json::Value,
}

impl<'a> CloudEvent<'a> {
    pub fn new(id: Uuid, source: &'a str, event_type: &'a str, data: serde_json::Value) -> Self {
        Self {
            id,
            source,
            spec_version: "1.0",
            event_type,
            time: Utc::now(),
            data_content_type: "application/json",
            data,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| AppError::Internal(e.to_string()))
    }
}

/// DLQ topic naming per spec §6: `fluxpay.dlq.{event-type}`.
pub fn dlq_topic(prefix: &str, event_type: &str) -> String {
    format!("{}.{}", prefix, event_type)
}

pub struct NatsEventBus {
    client: async_nats::Client,
    subject_prefix: String,
}

impl NatsEventBus {
    pub async fn connect(url: &str, subject_prefix: String) -> Result<Self> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| AppError::EventBus(e.to_string()))?;
        Ok(Self { client, subject_prefix })
    }

    fn subject(&self, topic: &str) -> String {
        format!("{}.{}", self.subject_prefix, topic)
    }
}

#[async_trait]
impl EventBus for NatsEventBus {
    async fn publish(&self, topic: &str, partition_key: &str, payload: Vec<u8>) -> Result<()> {
        let subject = self.subject(topic);
        // NATS core publish; partition_key is carried as a header so
        // consumers preserve per-aggregate ordering at the application layer
        // the way message-bus/src/partitioning.rs keys a single JetStream
        // consumer per partition.
        let mut headers = async_nats::HeaderMap::new();
        headers.insert("X-Partition-Key", partition_key);
        self.client
            .publish_with_headers(subject, headers, payload.into())
            .await
            .map_err(|e| AppError::EventBus(e.to_string()))?;
        self.client
            .flush()
            .await
            .map_err(|e| AppError::EventBus(e.to_string()))?;
        Ok(())
    }
}
