use chrono::Utc;
use uuid::Uuid;

use super::Database;
use crate::error::Result;
use crate::models::{SagaInstance, SagaStep};

impl Database {
    /// `(tenant_id, correlation_id)` is unique; a retry with the same
    /// correlation returns the existing instance (spec §4.3).
    pub async fn find_or_create_saga(
        &self,
        tenant_id: &str,
        saga_type: &str,
        correlation_id: &str,
        claim_seconds: i64,
        initial_context: serde_json::Value,
    ) -> Result<(SagaInstance, bool)> {
        if let Some(existing) = sqlx::query_as::<_, SagaInstance>(
            "SELECT * FROM saga_instances WHERE tenant_id = $1 AND correlation_id = $2",
        )
        .bind(tenant_id)
        .bind(correlation_id)
        .fetch_optional(&self.pool)
        .await?
        {
            return Ok((existing, false));
        }

        let instance = SagaInstance::new(
            tenant_id.to_string(),
            saga_type.to_string(),
            correlation_id.to_string(),
            claim_seconds,
            initial_context,
        );
        let inserted = sqlx::query(
            r#"
            INSERT INTO saga_instances (
                saga_id, tenant_id, saga_type, correlation_id, status, current_step,
                context_blob, error, claim_lease, created_at, updated_at
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)
            ON CONFLICT (tenant_id, correlation_id) DO NOTHING
            "#,
        )
        .bind(instance.saga_id)
        .bind(&instance.tenant_id)
        .bind(&instance.saga_type)
        .bind(&instance.correlation_id)
        .bind(instance.status)
        .bind(instance.current_step)
        .bind(&instance.context_blob)
        .bind(&instance.error)
        .bind(instance.claim_lease)
        .bind(instance.created_at)
        .bind(instance.updated_at)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 1 {
            Ok((instance, true))
        } else {
            // Lost the race to a concurrent creator; fetch their row.
            let existing = sqlx::query_as::<_, SagaInstance>(
                "SELECT * FROM saga_instances WHERE tenant_id = $1 AND correlation_id = $2",
            )
            .bind(tenant_id)
            .bind(correlation_id)
            .fetch_one(&self.pool)
            .await?;
            Ok((existing, false))
        }
    }

    pub async fn update_saga(&self, instance: &SagaInstance) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE saga_instances SET
                status = $1, current_step = $2, context_blob = $3, error = $4,
                claim_lease = $5, updated_at = $6
            WHERE saga_id = $7
            "#,
        )
        .bind(instance.status)
        .bind(instance.current_step)
        .bind(&instance.context_blob)
        .bind(&instance.error)
        .bind(instance.claim_lease)
        .bind(Utc::now())
        .bind(instance.saga_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_saga_step(&self, step: &SagaStep) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO saga_steps (saga_id, step_order, step_name, status, step_data, error, created_at, updated_at)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8)
            ON CONFLICT (saga_id, step_order) DO UPDATE SET
                status = EXCLUDED.status, step_data = EXCLUDED.step_data,
                error = EXCLUDED.error, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(step.saga_id)
        .bind(step.step_order)
        .bind(&step.step_name)
        .bind(step.status)
        .bind(&step.step_data)
        .bind(&step.error)
        .bind(step.created_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_saga_steps(&self, saga_id: Uuid) -> Result<Vec<SagaStep>> {
        let steps = sqlx::query_as::<_, SagaStep>(
            "SELECT * FROM saga_steps WHERE saga_id = $1 ORDER BY step_order",
        )
        .bind(saga_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(steps)
    }

    /// Reclaim sagas whose lease expired while still STARTED/PROCESSING
    /// (spec §4.3 "Concurrency" crash recovery). `lease_seconds` both
    /// bounds the staleness check and re-extends the lease for whichever
    /// worker picks the instance back up; `batch_size` caps how many rows a
    /// single sweep tick reclaims.
    pub async fn claim_expired_sagas(&self, lease_seconds: i64, batch_size: i64) -> Result<Vec<SagaInstance>> {
        let claimed = sqlx::query_as::<_, SagaInstance>(
            r#"
            UPDATE saga_instances SET claim_lease = NOW() + ($1 * INTERVAL '1 second')
            WHERE saga_id IN (
                SELECT saga_id FROM saga_instances
                WHERE status IN ('STARTED', 'PROCESSING') AND claim_lease < NOW()
                ORDER BY updated_at
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(lease_seconds)
        .bind(batch_size)
        .fetch_all(&self.pool)
        .await?;
        Ok(claimed)
    }
}
