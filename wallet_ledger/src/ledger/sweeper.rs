//! Periodic deletion of expired idempotency records.

use chrono::Utc;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};

use super::errors::LedgerResult;
use crate::db::LedgerStore;

/// Default time between sweeps (1 hour)
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

type SweepObserver = Box<dyn Fn(u64) + Send + Sync>;

/// Background task deleting idempotency records past their retention window
pub struct IdempotencySweeper {
    store: Arc<dyn LedgerStore>,
    retention: chrono::Duration,
    interval: Duration,
    observer: Option<SweepObserver>,
}

impl IdempotencySweeper {
    pub fn new(store: Arc<dyn LedgerStore>, retention: chrono::Duration, interval: Duration) -> Self {
        Self {
            store,
            retention,
            interval,
            observer: None,
        }
    }

    /// Call `observer` with the deletion count after every successful sweep
    pub fn on_sweep(mut self, observer: impl Fn(u64) + Send + Sync + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    /// Run one sweep, returning how many records were deleted
    pub async fn sweep_once(&self) -> LedgerResult<u64> {
        let cutoff = Utc::now() - self.retention;
        let deleted = self.store.delete_expired_idempotency_keys(cutoff).await?;
        if deleted > 0 {
            log::info!("Swept {} idempotency keys older than {}", deleted, cutoff);
        } else {
            log::debug!("Idempotency sweep found nothing older than {}", cutoff);
        }
        if let Some(observer) = &self.observer {
            observer(deleted);
        }
        Ok(deleted)
    }

    /// Sweep on every tick until `shutdown` turns true or its sender is dropped
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            log::info!("Idempotency sweeper started (every {:?})", self.interval);

            let mut ticker = interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep_once().await {
                            log::error!("Idempotency sweep failed: {}", e);
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            log::info!("Idempotency sweeper stopped");
        })
    }
}
