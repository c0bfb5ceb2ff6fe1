use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaStatus {
    Started,
    Processing,
    Completed,
    Compensating,
    Compensated,
    Failed,
}

impl SagaStatus {
    pub fn is_absorbing(self) -> bool {
        matches!(self, SagaStatus::Compensated | SagaStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaStepStatus {
    Pending,
    Executed,
    Compensated,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SagaInstance {
    pub saga_id: Uuid,
    pub tenant_id: String,
    pub saga_type: String,
    pub correlation_id: String,
    pub status: SagaStatus,
    pub current_step: i32,
    pub context_blob: serde_json::Value,
    pub error: Option<String>,
    pub claim_lease: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SagaInstance {
    pub fn new(
        tenant_id: String,
        saga_type: String,
        correlation_id: String,
        claim_seconds: i64,
        initial_context: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            saga_id: Uuid::new_v4(),
            tenant_id,
            saga_type,
            correlation_id,
            status: SagaStatus::Started,
            current_step: 0,
            context_blob: initial_context,
            error: None,
            claim_lease: now + chrono::Duration::seconds(claim_seconds),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SagaStep {
    pub saga_id: Uuid,
    pub step_order: i32,
    pub step_name: String,
    pub status: SagaStepStatus,
    pub step_data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
