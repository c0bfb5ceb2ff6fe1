//! Forward execution with per-step compensation (spec §4.3).

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::context::RequestContext;
use crate::db::Database;
use crate::error::{AppError, Result};
use crate::models::{SagaInstance, SagaStatus, SagaStep, SagaStepStatus};

/// A named, idempotent forward action with a registered compensator.
/// Implementations must no-op on re-invocation after a crash (spec §4.3
/// "Idempotency of steps").
#[async_trait]
pub trait SagaStepDef: Send + Sync {
    fn name(&self) -> &'static str;

    /// Execute the forward action. `context_blob` carries accumulated data
    /// from prior steps; the returned value is merged back into it.
    async fn execute(&self, ctx: &RequestContext, context_blob: &serde_json::Value) -> Result<serde_json::Value>;

    /// Undo this step's effect. Invoked with the same `step_data` the
    /// forward call returned. Must be safe to call more than once.
    async fn compensate(&self, ctx: &RequestContext, step_data: &serde_json::Value) -> Result<()>;
}

/// Drives a reclaimed saga instance (spec §4.3 "Concurrency": an expired
/// lease is "reclaimable by another worker") back through `SagaOrchestrator::
/// run` for whichever saga type it owns. `SagaSweeper` holds one resumer per
/// saga type and dispatches reclaimed instances to the matching resumer.
#[async_trait]
pub trait SagaResumer: Send + Sync {
    fn saga_type(&self) -> &'static str;
    async fn resume(&self, instance: SagaInstance) -> Result<()>;
}

pub struct SagaOrchestrator {
    db: Arc<Database>,
    max_compensation_retries: u32,
}

impl SagaOrchestrator {
    pub fn new(db: Arc<Database>, max_compensation_retries: u32) -> Self {
        Self { db, max_compensation_retries }
    }

    /// Start (or resume, via correlation_id) a saga and drive it forward
    /// through `steps` in order, compensating on the first failure.
    pub async fn run(
        &self,
        ctx: &RequestContext,
        saga_type: &str,
        correlation_id: &str,
        lease_seconds: i64,
        initial_context: serde_json::Value,
        steps: &[Box<dyn SagaStepDef>],
    ) -> Result<SagaInstance> {
        let (mut instance, created) = self
            .db
            .find_or_create_saga(ctx.tenant_id.as_str(), saga_type, correlation_id, lease_seconds, initial_context)
            .await?;

        if !created && instance.status.is_absorbing() {
            // Retried after terminal completion/compensation: return as-is.
            return Ok(instance);
        }

        if instance.status == SagaStatus::Started {
            instance.status = SagaStatus::Processing;
            self.db.update_saga(&instance).await?;
        }

        for (idx, step) in steps.iter().enumerate().skip(instance.current_step as usize) {
            let pending = SagaStep {
                saga_id: instance.saga_id,
                step_order: idx as i32,
                step_name: step.name().to_string(),
                status: SagaStepStatus::Pending,
                step_data: None,
                error: None,
                created_at: chrono::Utc::now(),
                updated_at: chrono::Utc::now(),
            };
            self.db.upsert_saga_step(&pending).await?;

            match step.execute(ctx, &instance.context_blob).await {
                Ok(step_data) => {
                    crate::metrics::SAGA_STEP_OUTCOMES
                        .with_label_values(&[saga_type, step.name(), "executed"])
                        .inc();
                    merge_context(&mut instance.context_blob, &step_data);
                    let executed = SagaStep {
                        status: SagaStepStatus::Executed,
                        step_data: Some(step_data),
                        ..pending
                    };
                    self.db.upsert_saga_step(&executed).await?;
                    instance.current_step = (idx + 1) as i32;
                    self.db.update_saga(&instance).await?;
                }
                Err(e) => {
                    crate::metrics::SAGA_STEP_OUTCOMES
                        .with_label_values(&[saga_type, step.name(), "failed"])
                        .inc();
                    warn!(saga_id = %instance.saga_id, step = step.name(), error = %e, "saga step failed, compensating");
                    let failed = SagaStep {
                        status: SagaStepStatus::Failed,
                        error: Some(e.to_string()),
                        ..pending
                    };
                    self.db.upsert_saga_step(&failed).await?;
                    instance.status = SagaStatus::Compensating;
                    instance.error = Some(e.to_string());
                    self.db.update_saga(&instance).await?;
                    return self.compensate(ctx, saga_type, instance, steps).await;
                }
            }
        }

        instance.status = SagaStatus::Completed;
        self.db.update_saga(&instance).await?;
        Ok(instance)
    }

    /// Walk executed steps in reverse order, invoking each compensator
    /// (spec §4.3 "Compensation"). A compensation that fails after bounded
    /// retries marks the saga FAILED and requires human intervention — it
    /// is never silently dropped.
    async fn compensate(
        &self,
        ctx: &RequestContext,
        saga_type: &str,
        mut instance: SagaInstance,
        steps: &[Box<dyn SagaStepDef>],
    ) -> Result<SagaInstance> {
        let persisted_steps = self.db.get_saga_steps(instance.saga_id).await?;
        let mut executed: Vec<&SagaStep> = persisted_steps
            .iter()
            .filter(|s| s.status == SagaStepStatus::Executed)
            .collect();
        executed.sort_by_key(|s| std::cmp::Reverse(s.step_order));

        for step_row in executed {
            let step_def = &steps[step_row.step_order as usize];
            let step_data = step_row.step_data.clone().unwrap_or(serde_json::json!({}));

            let mut attempt = 0;
            loop {
                match step_def.compensate(ctx, &step_data).await {
                    Ok(()) => {
                        crate::metrics::SAGA_STEP_OUTCOMES
                            .with_label_values(&[saga_type, step_def.name(), "compensated"])
                            .inc();
                        let compensated = SagaStep {
                            status: SagaStepStatus::Compensated,
                            ..step_row.clone()
                        };
                        self.db.upsert_saga_step(&compensated).await?;
                        instance.current_step = step_row.step_order;
                        self.db.update_saga(&instance).await?;
                        break;
                    }
                    Err(e) => {
                        attempt += 1;
                        if attempt > self.max_compensation_retries {
                            crate::metrics::SAGA_STEP_OUTCOMES
                                .with_label_values(&[saga_type, step_def.name(), "compensation_failed"])
                                .inc();
                            error!(
                                saga_id = %instance.saga_id,
                                step = step_def.name(),
                                error = %e,
                                "compensation exhausted retries, marking saga FAILED; operator intervention required"
                            );
                            instance.status = SagaStatus::Failed;
                            instance.error = Some(format!("compensation failed: {}", e));
                            self.db.update_saga(&instance).await?;
                            return Err(AppError::Invariant(format!(
                                "saga {} compensation failed irrecoverably: {}",
                                instance.saga_id, e
                            )));
                        }
                        warn!(saga_id = %instance.saga_id, attempt, error = %e, "compensation attempt failed, retrying");
                    }
                }
            }
        }

        instance.status = SagaStatus::Compensated;
        self.db.update_saga(&instance).await?;
        info!(saga_id = %instance.saga_id, "saga compensated");
        Ok(instance)
    }
}

fn merge_context(blob: &mut serde_json::Value, addition: &serde_json::Value) {
    if let (Some(blob_map), Some(addition_map)) = (blob.as_object_mut(), addition.as_object()) {
        for (k, v) in addition_map {
            blob_map.insert(k.clone(), v.clone());
        }
    }
}
