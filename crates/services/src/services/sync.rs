//! Cursor-driven sync orchestration.
//!
//! One run drains the provider's delta stream for a single linked account:
//! fetch a page, reconcile it, commit the cursor, repeat until `has_more` is
//! false. The cursor only advances after the page it covers has been fully
//! applied, so a crash or failure between pages resumes from the last
//! committed cursor and re-applies at most one page (which the reconciler
//! absorbs idempotently).
//!
//! Concurrency control is two-layered: an in-process gate rejects a second
//! run for the same account up front, and every cursor commit is a
//! compare-and-set against the database, so even a competing writer outside
//! this process cannot clobber newer progress.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::{DashMap, mapref::entry::Entry};
use db::models::linked_account::LinkedAccount;
use secrecy::SecretString;
use tokio::time::Instant;
use uuid::Uuid;

use super::{
    aggregator::{AggregatorClient, SyncDelta},
    error::SyncError,
    reconciler::TransactionReconciler,
    store::LinkedAccountStore,
    vault::CredentialVault,
};

/// At-most-one in-flight sync per account within this process.
#[derive(Default)]
pub struct SyncGate {
    inflight: DashMap<Uuid, ()>,
}

impl SyncGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a run is currently in flight for the account.
    pub fn is_syncing(&self, account_id: Uuid) -> bool {
        self.inflight.contains_key(&account_id)
    }

    /// Try to claim the account. `None` means a run is already in flight.
    pub fn acquire(&self, account_id: Uuid) -> Option<SyncPermit<'_>> {
        match self.inflight.entry(account_id) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(());
                Some(SyncPermit {
                    gate: self,
                    account_id,
                })
            }
        }
    }
}

/// Released on drop, including on panic or early return.
pub struct SyncPermit<'a> {
    gate: &'a SyncGate,
    account_id: Uuid,
}

impl Drop for SyncPermit<'_> {
    fn drop(&mut self) {
        self.gate.inflight.remove(&self.account_id);
    }
}

/// Exponential backoff for transient provider failures within one page fetch.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.saturating_mul(2u32.saturating_pow(attempt));
        exp.min(self.max_delay)
    }
}

/// Time limits on a single run.
///
/// The soft budget is checked between pages: once exceeded, the run commits
/// the page it just finished and returns a partial outcome, leaving the rest
/// for the next trigger. The hard budget aborts the run outright.
#[derive(Debug, Clone)]
pub struct SyncBudgets {
    pub soft: Duration,
    pub hard: Duration,
}

impl Default for SyncBudgets {
    fn default() -> Self {
        Self {
            soft: Duration::from_secs(120),
            hard: Duration::from_secs(300),
        }
    }
}

/// What one run accomplished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    pub added: u64,
    pub modified: u64,
    pub removed: u64,
    /// `false` when the soft budget cut the run short with pages remaining.
    pub completed: bool,
}

pub struct SyncOrchestrator {
    accounts: Arc<dyn LinkedAccountStore>,
    reconciler: TransactionReconciler,
    aggregator: Arc<dyn AggregatorClient>,
    vault: CredentialVault,
    gate: SyncGate,
    retry: RetryPolicy,
    budgets: SyncBudgets,
}

impl SyncOrchestrator {
    pub fn new(
        accounts: Arc<dyn LinkedAccountStore>,
        reconciler: TransactionReconciler,
        aggregator: Arc<dyn AggregatorClient>,
        vault: CredentialVault,
    ) -> Self {
        Self {
            accounts,
            reconciler,
            aggregator,
            vault,
            gate: SyncGate::new(),
            retry: RetryPolicy::default(),
            budgets: SyncBudgets::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_budgets(mut self, budgets: SyncBudgets) -> Self {
        self.budgets = budgets;
        self
    }

    pub fn gate(&self) -> &SyncGate {
        &self.gate
    }

    /// Run one sync cycle for the account.
    ///
    /// Failures are recorded before propagating: a permanent provider
    /// failure deactivates the account (the item needs re-authorization),
    /// everything else lands in `last_error` for the next cycle to retry.
    pub async fn run(&self, account_id: Uuid) -> Result<SyncOutcome, SyncError> {
        let _permit = self
            .gate
            .acquire(account_id)
            .ok_or(SyncError::AlreadySyncing(account_id))?;

        let account = self
            .accounts
            .find_by_id(account_id)
            .await?
            .ok_or(SyncError::NotFound(account_id))?;
        if !account.is_active {
            return Err(SyncError::Inactive(account_id));
        }

        let result = match tokio::time::timeout(self.budgets.hard, self.drain(&account)).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::TransientExternal(format!(
                "sync aborted after {}s",
                self.budgets.hard.as_secs()
            ))),
        };

        match result {
            Ok(outcome) => {
                tracing::info!(
                    account_id = %account_id,
                    added = outcome.added,
                    modified = outcome.modified,
                    removed = outcome.removed,
                    completed = outcome.completed,
                    "sync cycle finished"
                );
                Ok(outcome)
            }
            Err(err) => {
                tracing::error!(account_id = %account_id, error = %err, "sync cycle failed");
                match &err {
                    SyncError::PermanentExternal(msg) => {
                        self.accounts.deactivate(account_id, msg).await?;
                    }
                    SyncError::NotFound(_) | SyncError::AlreadySyncing(_) => {}
                    other => {
                        self.accounts
                            .record_sync_error(account_id, &other.to_string())
                            .await?;
                    }
                }
                Err(err)
            }
        }
    }

    /// Page loop. The cursor held here always matches what was last committed
    /// to the store; a compare-and-set miss means someone else moved it.
    async fn drain(&self, account: &LinkedAccount) -> Result<SyncOutcome, SyncError> {
        let token = SecretString::from(self.vault.decrypt(&account.access_token_ciphertext)?);
        let started = Instant::now();
        let mut cursor = account.sync_cursor.clone();
        let mut outcome = SyncOutcome::default();

        loop {
            let delta = self.fetch_page(&token, cursor.as_deref()).await?;
            let counts = self.reconciler.apply(account, &delta).await?;
            outcome.added += counts.added;
            outcome.modified += counts.modified;
            outcome.removed += counts.removed;

            if delta.has_more {
                let advanced = self
                    .accounts
                    .advance_cursor(account.id, cursor.as_deref(), &delta.next_cursor)
                    .await?;
                if !advanced {
                    return Err(SyncError::Concurrency(format!(
                        "cursor for account {} moved during sync",
                        account.id
                    )));
                }
                cursor = Some(delta.next_cursor);

                if started.elapsed() >= self.budgets.soft {
                    tracing::warn!(
                        account_id = %account.id,
                        elapsed_secs = started.elapsed().as_secs(),
                        "soft time budget exceeded, deferring remaining pages"
                    );
                    outcome.completed = false;
                    return Ok(outcome);
                }
            } else {
                let committed = self
                    .accounts
                    .complete_sync(account.id, cursor.as_deref(), &delta.next_cursor, Utc::now())
                    .await?;
                if !committed {
                    return Err(SyncError::Concurrency(format!(
                        "cursor for account {} moved during sync",
                        account.id
                    )));
                }
                outcome.completed = true;
                return Ok(outcome);
            }
        }
    }

    /// Fetch one page, retrying transient provider failures with backoff.
    /// Permanent failures propagate immediately.
    async fn fetch_page(
        &self,
        token: &SecretString,
        cursor: Option<&str>,
    ) -> Result<SyncDelta, SyncError> {
        let mut attempt = 0;
        loop {
            match self.aggregator.sync_transactions(token, cursor).await {
                Ok(delta) => return Ok(delta),
                Err(err) => {
                    let err = SyncError::from(err);
                    attempt += 1;
                    if !err.is_retryable() || attempt >= self.retry.max_attempts {
                        return Err(err);
                    }
                    let delay = self.retry.delay_for(attempt - 1);
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure fetching sync page, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
