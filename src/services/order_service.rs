//! Order creation and lookup (spec §3, §6).

use std::sync::Arc;
use uuid::Uuid;

use crate::context::RequestContext;
use crate::db::Database;
use crate::error::{AppError, Result};
use crate::event_bus::EventBus;
use crate::models::{LineItem, Order, OutboxEvent};

pub struct OrderService {
    db: Arc<Database>,
    bus: Arc<dyn EventBus>,
}

impl OrderService {
    pub fn new(db: Arc<Database>, bus: Arc<dyn EventBus>) -> Self {
        Self { db, bus }
    }

    pub async fn create_order(
        &self,
        ctx: &RequestContext,
        user_id: String,
        currency: String,
        line_items: Vec<LineItem>,
        metadata: Option<serde_json::Value>,
    ) -> Result<Order> {
        let order = Order::new(ctx.tenant_id.as_str().to_string(), user_id, currency, line_items, metadata)?;

        let mut tx = self.db.pool().begin().await?;
        self.db.insert_order(&mut tx, &order).await?;
        let event = OutboxEvent::new(
            ctx.tenant_id.as_str().to_string(),
            "order",
            order.id,
            "order.created",
            serde_json::to_vec(&order).map_err(|e| AppError::Internal(e.to_string()))?,
        );
        self.db.insert_outbox_event(&mut tx, &event).await?;
        tx.commit().await?;
        let _ = self.bus;
        Ok(order)
    }

    pub async fn get_order(&self, ctx: &RequestContext, id: Uuid) -> Result<Order> {
        self.db
            .get_order(ctx.tenant_id.as_str(), id)
            .await?
            .ok_or(AppError::OrderNotFound(id))
    }

    pub async fn list_orders(&self, ctx: &RequestContext, user_id: &str) -> Result<Vec<Order>> {
        self.db.list_orders_by_user(ctx.tenant_id.as_str(), user_id).await
    }
}
