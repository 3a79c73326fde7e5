//! Bounded in-process queue feeding the sync worker pool.
//!
//! Triggers (webhooks, the periodic scheduler, manual requests) enqueue
//! jobs; a fixed pool of workers drains them and runs the orchestrator. The
//! queue is bounded and `try_submit` never blocks: when it is full the
//! caller finds out immediately instead of the process buffering without
//! limit. Duplicate jobs for the same account are harmless; the
//! orchestrator's gate turns the extras into no-ops.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::{error::SyncError, sync::SyncOrchestrator};

pub const DEFAULT_QUEUE_CAPACITY: usize = 256;
pub const DEFAULT_WORKER_COUNT: usize = 4;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("sync queue is full")]
    Full,
    #[error("sync queue is closed")]
    Closed,
}

/// Why a sync was requested. Only used for logging and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    Webhook,
    Scheduled,
    Manual,
}

#[derive(Debug, Clone, Copy)]
pub struct SyncJob {
    pub account_id: Uuid,
    pub trigger: SyncTrigger,
}

#[derive(Clone)]
pub struct SyncQueue {
    tx: mpsc::Sender<SyncJob>,
    rx: Arc<Mutex<mpsc::Receiver<SyncJob>>>,
}

impl SyncQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Enqueue without waiting. A full queue is the caller's problem to
    /// surface, not something to absorb here.
    pub fn try_submit(&self, account_id: Uuid, trigger: SyncTrigger) -> Result<(), QueueError> {
        self.tx
            .try_send(SyncJob {
                account_id,
                trigger,
            })
            .map_err(|err| match err {
                mpsc::error::TrySendError::Full(_) => QueueError::Full,
                mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
            })
    }

    /// Spawn `count` workers sharing the receiving end. Workers exit when
    /// every sender is dropped and the queue drains.
    pub fn spawn_workers(
        &self,
        count: usize,
        orchestrator: Arc<SyncOrchestrator>,
    ) -> Vec<JoinHandle<()>> {
        (0..count)
            .map(|worker| {
                let rx = self.rx.clone();
                let orchestrator = orchestrator.clone();
                tokio::spawn(async move {
                    loop {
                        let job = { rx.lock().await.recv().await };
                        let Some(job) = job else {
                            tracing::debug!(worker, "sync queue closed, worker exiting");
                            break;
                        };
                        tracing::debug!(
                            worker,
                            account_id = %job.account_id,
                            trigger = ?job.trigger,
                            "picked up sync job"
                        );
                        match orchestrator.run(job.account_id).await {
                            Ok(_) => {}
                            // Another worker already has this account; the
                            // redundant trigger is dropped on purpose.
                            Err(SyncError::AlreadySyncing(_)) => {
                                tracing::debug!(
                                    account_id = %job.account_id,
                                    "sync already in flight, dropping duplicate job"
                                );
                            }
                            // The orchestrator already recorded the failure.
                            Err(err) => {
                                tracing::error!(
                                    account_id = %job.account_id,
                                    error = %err,
                                    "sync job failed"
                                );
                            }
                        }
                    }
                })
            })
            .collect()
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl SyncQueue {
    /// Pop the next job without blocking. Test hook for asserting what did
    /// (or did not) get enqueued.
    pub async fn try_recv(&self) -> Option<SyncJob> {
        self.rx.lock().await.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::services::reconciler::TransactionReconciler;
    use crate::services::store::TransactionStore;
    use crate::services::testing::{
        InMemoryLinkedAccounts, InMemoryTransactions, ScriptedAggregator, delta_page,
        test_account, test_vault, txn_payload,
    };

    #[test]
    fn full_queue_rejects_instead_of_blocking() {
        let queue = SyncQueue::new(1);
        queue.try_submit(Uuid::new_v4(), SyncTrigger::Manual).unwrap();
        assert_eq!(
            queue.try_submit(Uuid::new_v4(), SyncTrigger::Manual),
            Err(QueueError::Full)
        );
    }

    #[tokio::test]
    async fn worker_drains_jobs_through_the_orchestrator() {
        let accounts = Arc::new(InMemoryLinkedAccounts::default());
        let transactions = Arc::new(InMemoryTransactions::default());
        let account = test_account();
        let id = account.id;
        accounts.insert(account).await;

        let aggregator = ScriptedAggregator::new(vec![Ok(delta_page(
            vec![txn_payload("ext1", "Coffee")],
            vec![],
            vec![],
            false,
            "c1",
        ))]);
        let orchestrator = Arc::new(SyncOrchestrator::new(
            accounts.clone(),
            TransactionReconciler::new(transactions.clone() as Arc<dyn TransactionStore>),
            aggregator,
            test_vault(),
        ));

        let queue = SyncQueue::new(8);
        queue.spawn_workers(2, orchestrator);
        queue.try_submit(id, SyncTrigger::Webhook).unwrap();

        // Poll until the worker commits the cursor.
        for _ in 0..100 {
            if accounts.get(id).await.unwrap().sync_cursor.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let stored = accounts.get(id).await.unwrap();
        assert_eq!(stored.sync_cursor.as_deref(), Some("c1"));
        assert_eq!(transactions.len().await, 1);
    }
}
