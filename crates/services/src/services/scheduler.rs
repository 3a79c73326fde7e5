//! Service to periodically enqueue a sync for every active linked account.
//!
//! Webhooks are the primary trigger; this sweep is the safety net that
//! catches missed or dropped deliveries. It only enqueues; the worker pool
//! does the actual syncing, so a slow provider never stalls the schedule.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{debug, error, info, warn};

use super::{
    error::SyncError,
    queue::{QueueError, SyncQueue, SyncTrigger},
    store::LinkedAccountStore,
};

pub struct PeriodicSyncService {
    accounts: Arc<dyn LinkedAccountStore>,
    queue: SyncQueue,
    poll_interval: Duration,
}

impl PeriodicSyncService {
    /// Default sweep interval of 6 hours
    const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);

    pub fn spawn(
        accounts: Arc<dyn LinkedAccountStore>,
        queue: SyncQueue,
    ) -> tokio::task::JoinHandle<()> {
        Self::spawn_with_interval(accounts, queue, Self::DEFAULT_POLL_INTERVAL)
    }

    pub fn spawn_with_interval(
        accounts: Arc<dyn LinkedAccountStore>,
        queue: SyncQueue,
        poll_interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let service = Self {
            accounts,
            queue,
            poll_interval,
        };
        tokio::spawn(async move {
            service.start().await;
        })
    }

    async fn start(&self) {
        info!(
            "Starting periodic sync sweep with interval {:?}",
            self.poll_interval
        );

        let mut interval = interval(self.poll_interval);

        loop {
            interval.tick().await;
            if let Err(e) = self.enqueue_active_accounts().await {
                error!("Error during periodic sync sweep: {}", e);
            }
        }
    }

    async fn enqueue_active_accounts(&self) -> Result<(), SyncError> {
        let accounts = self.accounts.find_active().await?;

        if accounts.is_empty() {
            debug!("No active linked accounts to sweep");
            return Ok(());
        }

        let mut enqueued = 0;
        for account in &accounts {
            match self.queue.try_submit(account.id, SyncTrigger::Scheduled) {
                Ok(()) => enqueued += 1,
                Err(QueueError::Full) => {
                    // Whatever didn't fit is picked up by the next sweep.
                    warn!(
                        account_id = %account.id,
                        "sync queue full during sweep, skipping remaining accounts"
                    );
                    break;
                }
                Err(QueueError::Closed) => {
                    warn!("sync queue closed, stopping sweep");
                    return Ok(());
                }
            }
        }

        info!(total = accounts.len(), enqueued, "periodic sync sweep enqueued accounts");
        Ok(())
    }
}
