//! Lease-reclaim sweep for crashed saga instances (spec §4.3 "Concurrency").

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::SagaConfig;
use crate::db::Database;
use crate::saga::SagaResumer;

pub struct SagaSweeper {
    db: Arc<Database>,
    config: SagaConfig,
    resumers: HashMap<&'static str, Arc<dyn SagaResumer>>,
}

impl SagaSweeper {
    /// `resumers` is the complete set of saga types this engine instance
    /// knows how to drive forward; a reclaimed instance of any other saga
    /// type is logged and left for lease re-expiry rather than guessed at.
    pub fn new(db: Arc<Database>, config: SagaConfig, resumers: Vec<Arc<dyn SagaResumer>>) -> Self {
        let resumers = resumers.into_iter().map(|r| (r.saga_type(), r)).collect();
        Self { db, config, resumers }
    }

    /// Periodically reclaims sagas whose `claim_lease` expired while still
    /// STARTED/PROCESSING, extending their lease, then re-drives each
    /// reclaimed instance through its registered `SagaResumer` (spec §4.3
    /// "an unclaimed instance is reclaimable by another worker") so a
    /// crashed in-flight saga makes forward progress rather than merely
    /// having its lease refreshed.
    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.config.sweep_interval_secs));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.db.claim_expired_sagas(self.config.lease_seconds, self.config.sweep_batch_size).await {
                        Ok(sagas) if !sagas.is_empty() => {
                            info!(count = sagas.len(), "reclaimed expired saga leases");
                            for instance in sagas {
                                let Some(resumer) = self.resumers.get(instance.saga_type.as_str()) else {
                                    warn!(saga_id = %instance.saga_id, saga_type = %instance.saga_type, "no resumer registered for reclaimed saga type");
                                    continue;
                                };
                                let resumer = resumer.clone();
                                let saga_id = instance.saga_id;
                                tokio::spawn(async move {
                                    if let Err(e) = resumer.resume(instance).await {
                                        error!(saga_id = %saga_id, error = %e, "resuming reclaimed saga failed");
                                    }
                                });
                            }
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "saga lease sweep failed"),
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
