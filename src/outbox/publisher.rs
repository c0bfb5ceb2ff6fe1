//! Background publisher loop (spec §4.2). Runs on every instance; `SKIP
//! LOCKED` claiming (in `Database::claim_outbox_batch`) is what keeps
//! multiple publishers from racing on the same rows.

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::OutboxConfig;
use crate::db::Database;
use crate::event_bus::{dlq_topic, EventBus};

pub struct OutboxPublisher {
    db: Arc<Database>,
    bus: Arc<dyn EventBus>,
    config: OutboxConfig,
    dlq_prefix: String,
}

impl OutboxPublisher {
    pub fn new(db: Arc<Database>, bus: Arc<dyn EventBus>, config: OutboxConfig, dlq_prefix: String) -> Self {
        Self { db, bus, config, dlq_prefix }
    }

    /// Runs until the provided shutdown signal fires.
    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(Duration::from_millis(self.config.poll_interval_ms));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.publish_once().await {
                        error!(error = %e, "outbox publish cycle failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("outbox publisher draining");
                        break;
                    }
                }
            }
        }
    }

    async fn publish_once(&self) -> crate::error::Result<()> {
        let batch = self.db.claim_outbox_batch(self.config.batch_size).await?;
        for event in batch {
            // Single-key partitioning preserves per-aggregate commit order;
            // cross-aggregate ordering is not promised (spec §5).
            let partition_key = event.partition_key();
            let started = std::time::Instant::now();
            match self.bus.publish(&event.event_type, &partition_key, event.payload.clone()).await {
                Ok(()) => {
                    self.db.mark_outbox_published(event.event_id).await?;
                    crate::metrics::OUTBOX_PUBLISH_TOTAL.with_label_values(&["published"]).inc();
                    crate::metrics::OUTBOX_PUBLISH_LATENCY
                        .with_label_values(&["publish"])
                        .observe(started.elapsed().as_secs_f64());
                }
                Err(e) => {
                    warn!(event_id = %event.event_id, error = %e, "outbox publish failed, scheduling retry");
                    self.db
                        .mark_outbox_retry_or_failed(event.event_id, &e.to_string(), self.config.max_retries)
                        .await?;
                    if event.retry_count + 1 >= self.config.max_retries {
                        let dlq = dlq_topic(&self.dlq_prefix, &event.event_type);
                        warn!(event_id = %event.event_id, dlq = %dlq, "event moved to DLQ");
                        crate::metrics::OUTBOX_PUBLISH_TOTAL.with_label_values(&["failed"]).inc();
                    } else {
                        crate::metrics::OUTBOX_PUBLISH_TOTAL.with_label_values(&["retry"]).inc();
                    }
                }
            }
        }
        Ok(())
    }
}
