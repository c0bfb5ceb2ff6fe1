//! Persistence adapters over Postgres, modeled on
//! `services/obligation-engine/src/database.rs`.

pub mod credits;
pub mod idempotency;
pub mod orders;
pub mod outbox;
pub mod payments;
pub mod refunds;
pub mod sagas;
pub mod webhooks;

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

use crate::error::Result;

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
