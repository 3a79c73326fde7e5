//! Persistence seams for the sync pipeline.
//!
//! The orchestrator, reconciler and dispatcher only ever see these traits;
//! [`PgStore`] adapts them onto the repository methods in the `db` crate.
//! Keeping the seam here is what lets the whole sync cycle run against
//! in-memory fakes under test.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use db::models::{
    linked_account::LinkedAccount,
    transaction::{SyncedTransaction, TransactionRecord},
};
use sqlx::PgPool;
use uuid::Uuid;

use super::error::SyncError;

/// Durable record per linked external account: cursor, token, status.
#[async_trait]
pub trait LinkedAccountStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<LinkedAccount>, SyncError>;

    async fn find_active(&self) -> Result<Vec<LinkedAccount>, SyncError>;

    async fn find_active_by_item_id(&self, item_id: &str)
    -> Result<Vec<LinkedAccount>, SyncError>;

    /// Compare-and-set cursor advance; `false` means the stored cursor no
    /// longer matched `previous` and nothing was written.
    async fn advance_cursor(
        &self,
        id: Uuid,
        previous: Option<&str>,
        next: &str,
    ) -> Result<bool, SyncError>;

    /// Final commit of a completed cycle: CAS cursor advance plus
    /// `last_synced_at` and clearing `last_error`.
    async fn complete_sync(
        &self,
        id: Uuid,
        previous: Option<&str>,
        next: &str,
        synced_at: DateTime<Utc>,
    ) -> Result<bool, SyncError>;

    async fn record_sync_error(&self, id: Uuid, message: &str) -> Result<(), SyncError>;

    /// Deactivate a single account (permanent provider failure).
    async fn deactivate(&self, id: Uuid, message: &str) -> Result<(), SyncError>;

    /// Deactivate every account under a provider item (item-level error).
    async fn mark_item_inactive(&self, item_id: &str, message: &str) -> Result<u64, SyncError>;
}

/// Keyed access to externally sourced transaction records.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<TransactionRecord>, SyncError>;

    async fn insert(&self, data: &SyncedTransaction) -> Result<(), SyncError>;

    /// Update keyed by external id; returns rows affected.
    async fn update(&self, data: &SyncedTransaction) -> Result<u64, SyncError>;

    /// Delete keyed by external id; returns rows affected (zero is a no-op,
    /// not an error).
    async fn delete_by_external_id(&self, external_id: &str) -> Result<u64, SyncError>;
}

/// PostgreSQL-backed implementation of both stores.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LinkedAccountStore for PgStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<LinkedAccount>, SyncError> {
        Ok(LinkedAccount::find_by_id(&self.pool, id).await?)
    }

    async fn find_active(&self) -> Result<Vec<LinkedAccount>, SyncError> {
        Ok(LinkedAccount::find_active(&self.pool).await?)
    }

    async fn find_active_by_item_id(
        &self,
        item_id: &str,
    ) -> Result<Vec<LinkedAccount>, SyncError> {
        Ok(LinkedAccount::find_active_by_item_id(&self.pool, item_id).await?)
    }

    async fn advance_cursor(
        &self,
        id: Uuid,
        previous: Option<&str>,
        next: &str,
    ) -> Result<bool, SyncError> {
        Ok(LinkedAccount::advance_cursor(&self.pool, id, previous, next).await?)
    }

    async fn complete_sync(
        &self,
        id: Uuid,
        previous: Option<&str>,
        next: &str,
        synced_at: DateTime<Utc>,
    ) -> Result<bool, SyncError> {
        Ok(LinkedAccount::complete_sync(&self.pool, id, previous, next, synced_at).await?)
    }

    async fn record_sync_error(&self, id: Uuid, message: &str) -> Result<(), SyncError> {
        Ok(LinkedAccount::record_sync_error(&self.pool, id, message).await?)
    }

    async fn deactivate(&self, id: Uuid, message: &str) -> Result<(), SyncError> {
        Ok(LinkedAccount::deactivate(&self.pool, id, message).await?)
    }

    async fn mark_item_inactive(&self, item_id: &str, message: &str) -> Result<u64, SyncError> {
        Ok(LinkedAccount::mark_item_inactive(&self.pool, item_id, message).await?)
    }
}

#[async_trait]
impl TransactionStore for PgStore {
    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<TransactionRecord>, SyncError> {
        Ok(TransactionRecord::find_by_external_id(&self.pool, external_id).await?)
    }

    async fn insert(&self, data: &SyncedTransaction) -> Result<(), SyncError> {
        TransactionRecord::insert_from_sync(&self.pool, data).await?;
        Ok(())
    }

    async fn update(&self, data: &SyncedTransaction) -> Result<u64, SyncError> {
        Ok(TransactionRecord::update_from_sync(&self.pool, data).await?)
    }

    async fn delete_by_external_id(&self, external_id: &str) -> Result<u64, SyncError> {
        Ok(TransactionRecord::delete_by_external_id(&self.pool, external_id).await?)
    }
}
