//! Periodic sweep that resets rows stuck in PROCESSING back to PENDING
//! after a crashed publisher leaves them claimed (spec §4.2).

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::config::OutboxConfig;
use crate::db::Database;

pub struct OutboxJanitor {
    db: Arc<Database>,
    config: OutboxConfig,
}

impl OutboxJanitor {
    pub fn new(db: Arc<Database>, config: OutboxConfig) -> Self {
        Self { db, config }
    }

    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.config.janitor_interval_secs));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let stale_before = chrono::Utc::now()
                        - chrono::Duration::seconds(self.config.processing_stale_after_secs);
                    match self.db.reset_stale_processing(stale_before).await {
                        Ok(n) if n > 0 => info!(reset = n, "janitor reset stale PROCESSING outbox rows"),
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "outbox janitor sweep failed"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}
