use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use super::Database;
use crate::error::Result;
use crate::models::{Order, OrderStatus};

impl Database {
    pub async fn insert_order(&self, tx: &mut Transaction<'_, Postgres>, order: &Order) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (
                id, tenant_id, user_id, currency, line_items, total_amount,
                status, metadata, created_at, updated_at, paid_at, completed_at
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12)
            "#,
        )
        .bind(order.id)
        .bind(&order.tenant_id)
        .bind(&order.user_id)
        .bind(&order.currency)
        .bind(&order.line_items)
        .bind(order.total_amount)
        .bind(order.status)
        .bind(&order.metadata)
        .bind(order.created_at)
        .bind(order.updated_at)
        .bind(order.paid_at)
        .bind(order.completed_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn update_order(&self, tx: &mut Transaction<'_, Postgres>, order: &Order) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE orders SET status = $1, updated_at = $2, paid_at = $3, completed_at = $4
            WHERE id = $5 AND tenant_id = $6
            "#,
        )
        .bind(order.status)
        .bind(order.updated_at)
        .bind(order.paid_at)
        .bind(order.completed_at)
        .bind(order.id)
        .bind(&order.tenant_id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn get_order(&self, tenant_id: &str, id: Uuid) -> Result<Option<Order>> {
        let order = sqlx::query_as::<_, Order>(
            "SELECT * FROM orders WHERE id = $1 AND tenant_id = $2",
        )
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(order)
    }

    pub async fn list_orders_by_user(&self, tenant_id: &str, user_id: &str) -> Result<Vec<Order>> {
        let orders = sqlx::query_as::<_, Order>(
            "SELECT * FROM orders WHERE tenant_id = $1 AND user_id = $2 ORDER BY created_at DESC",
        )
        .bind(tenant_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(orders)
    }

    #[allow(dead_code)]
    pub async fn order_status(&self, tenant_id: &str, id: Uuid) -> Result<Option<OrderStatus>> {
        Ok(self.get_order(tenant_id, id).await?.map(|o| o.status))
    }
}
