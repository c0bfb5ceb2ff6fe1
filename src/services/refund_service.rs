//! Refund creation (spec §3, §6). Synchronous call to the gateway; the
//! engine does not saga-orchestrate refunds since they have no compensable
//! downstream step.

use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use crate::context::RequestContext;
use crate::credit::CreditService;
use crate::db::Database;
use crate::error::{AppError, Result};
use crate::event_bus::EventBus;
use crate::models::{OutboxEvent, Refund};
use crate::payment::PgClient;

pub struct RefundService {
    db: Arc<Database>,
    bus: Arc<dyn EventBus>,
    pg: Arc<dyn PgClient>,
    credit: Arc<CreditService>,
}

impl RefundService {
    pub fn new(db: Arc<Database>, bus: Arc<dyn EventBus>, pg: Arc<dyn PgClient>, credit: Arc<CreditService>) -> Self {
        Self { db, bus, pg, credit }
    }

    pub async fn create_refund(
        &self,
        ctx: &RequestContext,
        payment_id: Uuid,
        amount: Decimal,
        currency: String,
        reason: Option<String>,
    ) -> Result<Refund> {
        let payment = self
            .db
            .get_payment(ctx.tenant_id.as_str(), payment_id)
            .await?
            .ok_or(AppError::PaymentNotFound(payment_id))?;
        let already_refunded = self.db.completed_refund_total(ctx.tenant_id.as_str(), payment_id).await?;

        let refund = Refund::new(
            ctx.tenant_id.as_str().to_string(),
            payment_id,
            amount,
            payment.amount,
            payment.currency.clone(),
            currency,
            already_refunded,
            reason,
        )?;
        self.db.insert_refund(&refund).await?;

        let processing = refund.start_processing();
        self.db.update_refund(&processing).await?;

        let pg_transaction_id = payment
            .pg_transaction_id
            .clone()
            .ok_or_else(|| AppError::InvalidPaymentState("payment has no gateway transaction to refund".into()))?;

        let outcome = self.pg.refund(&pg_transaction_id, amount).await;
        let order = self.db.get_order(ctx.tenant_id.as_str(), payment.order_id).await?;

        let final_refund = match outcome {
            Ok(response) => {
                let completed = processing.mark_completed(response.pg_refund_id);
                if let Some(order) = &order {
                    self.credit.refund(ctx.tenant_id.as_str(), &order.user_id, completed.id, amount).await?;
                }
                // State change and outbox insert commit atomically (spec §4.2).
                let mut tx = self.db.pool().begin().await?;
                self.db.update_refund_tx(&mut tx, &completed).await?;
                let event = OutboxEvent::new(
                    ctx.tenant_id.as_str().to_string(),
                    "refund",
                    completed.id,
                    "refund.completed",
                    serde_json::to_vec(&completed).map_err(|e| AppError::Internal(e.to_string()))?,
                );
                self.db.insert_outbox_event(&mut tx, &event).await?;
                tx.commit().await?;
                completed
            }
            Err(e) => {
                let failed = processing.mark_failed();
                self.db.update_refund(&failed).await?;
                return Err(e);
            }
        };
        let _ = self.bus;
        Ok(final_refund)
    }

    pub async fn get_refund(&self, ctx: &RequestContext, id: Uuid) -> Result<Refund> {
        self.db
            .get_refund(ctx.tenant_id.as_str(), id)
            .await?
            .ok_or(AppError::RefundNotFound(id))
    }

    pub async fn list_refunds_for_payment(&self, ctx: &RequestContext, payment_id: Uuid) -> Result<Vec<Refund>> {
        self.db.list_refunds_by_payment(ctx.tenant_id.as_str(), payment_id).await
    }
}
