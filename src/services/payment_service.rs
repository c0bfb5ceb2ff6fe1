//! Payment lifecycle (spec §4.4, §8 scenario 1). `approve`/`confirm` drive
//! the same underlying saga in two installments: approve runs the reserve +
//! authorize steps, confirm resumes it through settlement + order
//! completion. The orchestrator's `current_step` bookkeeping makes this a
//! safe two-phase call from two separate HTTP requests.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::context::{RequestContext, TenantId};
use crate::credit::CreditService;
use crate::db::Database;
use crate::error::{AppError, Result};
use crate::event_bus::EventBus;
use crate::models::{OutboxEvent, Payment, SagaInstance};
use crate::payment::PgClient;
use crate::saga::{
    self, AuthorizePaymentStep, CompleteOrderStep, ConfirmPaymentStep, PaymentSagaInput, ReserveCreditStep,
    SagaOrchestrator, SagaResumer, SagaStepDef,
};

/// A reclaimed saga whose crash happened before the approve phase's two
/// steps both committed resumes only that half; the client's own next
/// `/confirm` call is what advances it the rest of the way. One that
/// crashed after `confirm` had already started resumes all four steps to
/// completion. This mirrors exactly the step counts `approve`/`confirm`
/// themselves pass to the orchestrator.
const APPROVE_PHASE_STEPS: i32 = 2;

/// Background-task budget for a saga resumed by the sweep rather than by an
/// inbound request (there is no client deadline to inherit).
const RESUME_BUDGET: Duration = Duration::from_secs(30);

pub struct PaymentService {
    db: Arc<Database>,
    bus: Arc<dyn EventBus>,
    pg: Arc<dyn PgClient>,
    credit: Arc<CreditService>,
    orchestrator: Arc<SagaOrchestrator>,
    saga_lease_seconds: i64,
}

impl PaymentService {
    pub fn new(
        db: Arc<Database>,
        bus: Arc<dyn EventBus>,
        pg: Arc<dyn PgClient>,
        credit: Arc<CreditService>,
        orchestrator: Arc<SagaOrchestrator>,
        saga_lease_seconds: i64,
    ) -> Self {
        Self { db, bus, pg, credit, orchestrator, saga_lease_seconds }
    }

    fn all_steps(&self) -> Vec<Box<dyn SagaStepDef>> {
        vec![
            Box::new(ReserveCreditStep { credit: self.credit.clone() }),
            Box::new(AuthorizePaymentStep { db: self.db.clone(), pg: self.pg.clone() }),
            Box::new(ConfirmPaymentStep { db: self.db.clone(), pg: self.pg.clone(), credit: self.credit.clone() }),
            Box::new(CompleteOrderStep { db: self.db.clone(), bus: self.bus.clone() }),
        ]
    }

    pub async fn create_payment(
        &self,
        ctx: &RequestContext,
        order_id: Uuid,
        amount: rust_decimal::Decimal,
        currency: String,
        payment_method: Option<String>,
    ) -> Result<Payment> {
        let order = self
            .db
            .get_order(ctx.tenant_id.as_str(), order_id)
            .await?
            .ok_or(AppError::OrderNotFound(order_id))?;
        if order.currency != currency {
            return Err(AppError::Validation("payment currency must match order currency".into()));
        }

        let payment = Payment::new(ctx.tenant_id.as_str().to_string(), order_id, amount, currency, payment_method)?;
        let mut tx = self.db.pool().begin().await?;
        self.db.insert_payment(&mut tx, &payment).await?;
        let event = OutboxEvent::new(
            ctx.tenant_id.as_str().to_string(),
            "payment",
            payment.id,
            "payment.created",
            serde_json::to_vec(&payment).map_err(|e| AppError::Internal(e.to_string()))?,
        );
        self.db.insert_outbox_event(&mut tx, &event).await?;
        tx.commit().await?;
        Ok(payment)
    }

    pub async fn approve(&self, ctx: &RequestContext, payment_id: Uuid) -> Result<Payment> {
        let payment = self
            .db
            .get_payment(ctx.tenant_id.as_str(), payment_id)
            .await?
            .ok_or(AppError::PaymentNotFound(payment_id))?;
        let order = self
            .db
            .get_order(ctx.tenant_id.as_str(), payment.order_id)
            .await?
            .ok_or(AppError::OrderNotFound(payment.order_id))?;

        let input = PaymentSagaInput {
            order_id: order.id,
            payment_id: payment.id,
            user_id: order.user_id.clone(),
            amount: payment.amount,
            currency: payment.currency.clone(),
            payment_method: payment.payment_method.clone(),
        };
        let steps = self.all_steps();
        self.orchestrator
            .run(
                ctx,
                "payment_authorization",
                &payment_id.to_string(),
                self.saga_lease_seconds,
                saga::initial_context(&input),
                &steps[0..2],
            )
            .await?;

        self.db
            .get_payment(ctx.tenant_id.as_str(), payment_id)
            .await?
            .ok_or(AppError::PaymentNotFound(payment_id))
    }

    pub async fn confirm(&self, ctx: &RequestContext, payment_id: Uuid) -> Result<Payment> {
        let payment = self
            .db
            .get_payment(ctx.tenant_id.as_str(), payment_id)
            .await?
            .ok_or(AppError::PaymentNotFound(payment_id))?;
        let order = self
            .db
            .get_order(ctx.tenant_id.as_str(), payment.order_id)
            .await?
            .ok_or(AppError::OrderNotFound(payment.order_id))?;

        let input = PaymentSagaInput {
            order_id: order.id,
            payment_id: payment.id,
            user_id: order.user_id.clone(),
            amount: payment.amount,
            currency: payment.currency.clone(),
            payment_method: payment.payment_method.clone(),
        };
        let steps = self.all_steps();
        // `initial_context` is only used if this is the first call for this
        // correlation id; a saga already started by `approve` ignores it and
        // resumes from its persisted context_blob.
        self.orchestrator
            .run(
                ctx,
                "payment_authorization",
                &payment_id.to_string(),
                self.saga_lease_seconds,
                saga::initial_context(&input),
                &steps,
            )
            .await?;

        self.db
            .get_payment(ctx.tenant_id.as_str(), payment_id)
            .await?
            .ok_or(AppError::PaymentNotFound(payment_id))
    }

    pub async fn get_payment(&self, ctx: &RequestContext, id: Uuid) -> Result<Payment> {
        self.db
            .get_payment(ctx.tenant_id.as_str(), id)
            .await?
            .ok_or(AppError::PaymentNotFound(id))
    }
}

#[async_trait]
impl SagaResumer for PaymentService {
    fn saga_type(&self) -> &'static str {
        "payment_authorization"
    }

    /// Re-drives a reclaimed `payment_authorization` instance (spec §4.3
    /// "reclaimable by another worker"). `initial_context` is ignored by
    /// `SagaOrchestrator::run` for an already-started instance; the saga
    /// resumes from its own persisted `context_blob`/`current_step`.
    async fn resume(&self, instance: SagaInstance) -> Result<()> {
        let ctx = RequestContext::new(TenantId(instance.tenant_id.clone()), RESUME_BUDGET);
        let input: PaymentSagaInput = serde_json::from_value(instance.context_blob.clone())
            .map_err(|e| AppError::Invariant(format!("reclaimed saga context is not a PaymentSagaInput: {}", e)))?;
        let steps = self.all_steps();
        let slice: &[Box<dyn SagaStepDef>] = if instance.current_step < APPROVE_PHASE_STEPS {
            &steps[0..APPROVE_PHASE_STEPS as usize]
        } else {
            &steps
        };
        self.orchestrator
            .run(
                &ctx,
                self.saga_type(),
                &instance.correlation_id,
                self.saga_lease_seconds,
                saga::initial_context(&input),
                slice,
            )
            .await?;
        Ok(())
    }
}
