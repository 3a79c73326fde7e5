//! In-memory collaborator fakes for exercising the sync pipeline without a
//! database or network.
//!
//! The fakes honor the same contracts as the production implementations;
//! in particular [`InMemoryLinkedAccounts`] applies the same
//! compare-and-set semantics to cursor updates that the SQL layer does.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use db::models::{
    linked_account::LinkedAccount,
    transaction::{SyncedTransaction, TransactionRecord},
};
use rust_decimal::Decimal;
use secrecy::SecretString;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use super::{
    aggregator::{
        AggregatorClient, AggregatorError, ExternalAccount, LinkTokenResponse, RemovedTransaction,
        SyncDelta, TokenExchange, TransactionPayload,
    },
    error::SyncError,
    store::{LinkedAccountStore, TransactionStore},
    vault::{CredentialVault, VaultKey},
};

/// Fixed timestamp so state snapshots compare equal across passes.
fn epoch() -> DateTime<Utc> {
    DateTime::UNIX_EPOCH
}

pub fn test_vault() -> CredentialVault {
    CredentialVault::new(&VaultKey::parse("0123456789abcdef0123456789abcdef").unwrap())
}

pub fn test_account() -> LinkedAccount {
    LinkedAccount {
        id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        household_id: Uuid::new_v4(),
        external_item_id: "item-1".to_string(),
        external_account_id: Uuid::new_v4().to_string(),
        access_token_ciphertext: String::new(),
        sync_cursor: None,
        name: "Checking".to_string(),
        official_name: None,
        mask: Some("0000".to_string()),
        account_type: Some("depository".to_string()),
        account_subtype: Some("checking".to_string()),
        currency_code: "USD".to_string(),
        is_active: true,
        last_synced_at: None,
        last_error: None,
        created_at: epoch(),
        updated_at: epoch(),
    }
}

pub fn txn_payload(external_id: &str, name: &str) -> TransactionPayload {
    TransactionPayload {
        transaction_id: external_id.to_string(),
        amount: Decimal::new(1250, 2),
        date: NaiveDate::from_ymd_opt(2026, 8, 1).unwrap(),
        authorized_date: None,
        name: name.to_string(),
        merchant_name: None,
        category: vec![],
        payment_channel: None,
        pending: false,
    }
}

pub fn delta_page(
    added: Vec<TransactionPayload>,
    modified: Vec<TransactionPayload>,
    removed: Vec<String>,
    has_more: bool,
    next_cursor: &str,
) -> SyncDelta {
    SyncDelta {
        added,
        modified,
        removed: removed
            .into_iter()
            .map(|transaction_id| RemovedTransaction { transaction_id })
            .collect(),
        has_more,
        next_cursor: next_cursor.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Transaction store fake
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryTransactions {
    rows: RwLock<Vec<TransactionRecord>>,
}

impl InMemoryTransactions {
    pub async fn get(&self, external_id: &str) -> Option<TransactionRecord> {
        self.rows
            .read()
            .await
            .iter()
            .find(|r| r.external_transaction_id.as_deref() == Some(external_id))
            .cloned()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn manual_count(&self) -> usize {
        self.rows.read().await.iter().filter(|r| r.is_manual).count()
    }

    /// Full-state snapshot, ordered by external id, for end-state equality
    /// assertions.
    pub async fn snapshot(&self) -> Vec<TransactionRecord> {
        let mut rows = self.rows.read().await.clone();
        rows.sort_by(|a, b| a.external_transaction_id.cmp(&b.external_transaction_id));
        rows
    }

    /// Seed a manually entered record (no external id); reconciliation must
    /// never touch these.
    pub async fn insert_manual(&self, account: &LinkedAccount, name: &str) {
        self.rows.write().await.push(TransactionRecord {
            id: Uuid::new_v4(),
            account_id: account.id,
            household_id: account.household_id,
            external_transaction_id: None,
            amount: Decimal::new(999, 2),
            date: NaiveDate::from_ymd_opt(2026, 8, 1).unwrap(),
            authorized_date: None,
            name: name.to_string(),
            merchant_name: None,
            category: None,
            payment_channel: None,
            pending: false,
            is_manual: true,
            notes: None,
            created_at: epoch(),
            updated_at: epoch(),
        });
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactions {
    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<TransactionRecord>, SyncError> {
        Ok(self.get(external_id).await)
    }

    async fn insert(&self, data: &SyncedTransaction) -> Result<(), SyncError> {
        self.rows.write().await.push(TransactionRecord {
            id: Uuid::new_v4(),
            account_id: data.account_id,
            household_id: data.household_id,
            external_transaction_id: Some(data.external_transaction_id.clone()),
            amount: data.amount,
            date: data.date,
            authorized_date: data.authorized_date,
            name: data.name.clone(),
            merchant_name: data.merchant_name.clone(),
            category: data.category.clone(),
            payment_channel: data.payment_channel.clone(),
            pending: data.pending,
            is_manual: false,
            notes: None,
            created_at: epoch(),
            updated_at: epoch(),
        });
        Ok(())
    }

    async fn update(&self, data: &SyncedTransaction) -> Result<u64, SyncError> {
        let mut rows = self.rows.write().await;
        match rows.iter_mut().find(|r| {
            r.external_transaction_id.as_deref() == Some(data.external_transaction_id.as_str())
        }) {
            Some(row) => {
                row.amount = data.amount;
                row.date = data.date;
                row.authorized_date = data.authorized_date;
                row.name = data.name.clone();
                row.merchant_name = data.merchant_name.clone();
                row.category = data.category.clone();
                row.payment_channel = data.payment_channel.clone();
                row.pending = data.pending;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn delete_by_external_id(&self, external_id: &str) -> Result<u64, SyncError> {
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|r| r.external_transaction_id.as_deref() != Some(external_id));
        Ok((before - rows.len()) as u64)
    }
}

// ---------------------------------------------------------------------------
// Linked account store fake
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryLinkedAccounts {
    accounts: RwLock<HashMap<Uuid, LinkedAccount>>,
}

impl InMemoryLinkedAccounts {
    pub async fn insert(&self, account: LinkedAccount) {
        self.accounts.write().await.insert(account.id, account);
    }

    pub async fn get(&self, id: Uuid) -> Option<LinkedAccount> {
        self.accounts.read().await.get(&id).cloned()
    }

    /// Force the stored cursor out from under a running sync, simulating a
    /// competing writer.
    pub async fn set_cursor(&self, id: Uuid, cursor: Option<String>) {
        if let Some(account) = self.accounts.write().await.get_mut(&id) {
            account.sync_cursor = cursor;
        }
    }
}

#[async_trait]
impl LinkedAccountStore for InMemoryLinkedAccounts {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<LinkedAccount>, SyncError> {
        Ok(self.get(id).await)
    }

    async fn find_active(&self) -> Result<Vec<LinkedAccount>, SyncError> {
        Ok(self
            .accounts
            .read()
            .await
            .values()
            .filter(|a| a.is_active)
            .cloned()
            .collect())
    }

    async fn find_active_by_item_id(
        &self,
        item_id: &str,
    ) -> Result<Vec<LinkedAccount>, SyncError> {
        let mut accounts: Vec<LinkedAccount> = self
            .accounts
            .read()
            .await
            .values()
            .filter(|a| a.is_active && a.external_item_id == item_id)
            .cloned()
            .collect();
        accounts.sort_by_key(|a| a.id);
        Ok(accounts)
    }

    async fn advance_cursor(
        &self,
        id: Uuid,
        previous: Option<&str>,
        next: &str,
    ) -> Result<bool, SyncError> {
        let mut accounts = self.accounts.write().await;
        let Some(account) = accounts.get_mut(&id) else {
            return Ok(false);
        };
        if account.sync_cursor.as_deref() != previous {
            return Ok(false);
        }
        account.sync_cursor = Some(next.to_string());
        Ok(true)
    }

    async fn complete_sync(
        &self,
        id: Uuid,
        previous: Option<&str>,
        next: &str,
        synced_at: DateTime<Utc>,
    ) -> Result<bool, SyncError> {
        let mut accounts = self.accounts.write().await;
        let Some(account) = accounts.get_mut(&id) else {
            return Ok(false);
        };
        if account.sync_cursor.as_deref() != previous {
            return Ok(false);
        }
        account.sync_cursor = Some(next.to_string());
        account.last_synced_at = Some(synced_at);
        account.last_error = None;
        Ok(true)
    }

    async fn record_sync_error(&self, id: Uuid, message: &str) -> Result<(), SyncError> {
        if let Some(account) = self.accounts.write().await.get_mut(&id) {
            account.last_error = Some(message.to_string());
        }
        Ok(())
    }

    async fn deactivate(&self, id: Uuid, message: &str) -> Result<(), SyncError> {
        if let Some(account) = self.accounts.write().await.get_mut(&id) {
            account.is_active = false;
            account.last_error = Some(message.to_string());
        }
        Ok(())
    }

    async fn mark_item_inactive(&self, item_id: &str, message: &str) -> Result<u64, SyncError> {
        let mut count = 0;
        for account in self.accounts.write().await.values_mut() {
            if account.external_item_id == item_id {
                account.is_active = false;
                account.last_error = Some(message.to_string());
                count += 1;
            }
        }
        Ok(count)
    }
}

// ---------------------------------------------------------------------------
// Aggregator fake
// ---------------------------------------------------------------------------

/// Serves a scripted sequence of sync pages (or errors) and records the
/// cursor presented on each call.
#[derive(Default)]
pub struct ScriptedAggregator {
    pages: Mutex<VecDeque<Result<SyncDelta, AggregatorError>>>,
    cursors_seen: Mutex<Vec<Option<String>>>,
}

impl ScriptedAggregator {
    pub fn new(pages: Vec<Result<SyncDelta, AggregatorError>>) -> Arc<Self> {
        Arc::new(Self {
            pages: Mutex::new(pages.into()),
            cursors_seen: Mutex::new(Vec::new()),
        })
    }

    pub async fn cursors_seen(&self) -> Vec<Option<String>> {
        self.cursors_seen.lock().await.clone()
    }

    pub async fn remaining_pages(&self) -> usize {
        self.pages.lock().await.len()
    }
}

#[async_trait]
impl AggregatorClient for ScriptedAggregator {
    async fn create_link_token(
        &self,
        _user_id: &str,
        _products: &[String],
        _webhook: Option<&str>,
    ) -> Result<LinkTokenResponse, AggregatorError> {
        Ok(LinkTokenResponse {
            link_token: "link-sandbox-token".to_string(),
            expiration: Utc::now(),
        })
    }

    async fn exchange_public_token(
        &self,
        _public_token: &str,
    ) -> Result<TokenExchange, AggregatorError> {
        Ok(TokenExchange {
            access_token: SecretString::from("access-sandbox-token"),
            item_id: "item-1".to_string(),
        })
    }

    async fn get_accounts(
        &self,
        _access_token: &SecretString,
    ) -> Result<Vec<ExternalAccount>, AggregatorError> {
        Ok(vec![])
    }

    async fn sync_transactions(
        &self,
        _access_token: &SecretString,
        cursor: Option<&str>,
    ) -> Result<SyncDelta, AggregatorError> {
        self.cursors_seen
            .lock()
            .await
            .push(cursor.map(str::to_string));
        self.pages
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(AggregatorError::Permanent("no more scripted pages".into())))
    }

    async fn remove_item(&self, _access_token: &SecretString) -> Result<(), AggregatorError> {
        Ok(())
    }
}
