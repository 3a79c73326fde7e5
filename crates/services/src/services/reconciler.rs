//! Idempotent application of a sync delta to the local ledger.
//!
//! All writes are keyed by the provider's stable transaction id, so applying
//! the same delta twice converges on the same end state: re-delivered
//! "added" items turn into updates, "modified" items without a local match
//! are skipped (never created), and deleting a missing id is a no-op.
//! Manually entered records carry no external id and are invisible to this
//! module. Cursor advancement is the orchestrator's job, never done here.
//!
//! Amounts keep the provider's sign. The system this replaces stored the
//! absolute value, which destroys the inflow/outflow direction with nothing
//! elsewhere to reconstruct it; the signed amount is the source of truth.

use std::sync::Arc;

use db::models::{linked_account::LinkedAccount, transaction::SyncedTransaction};

use super::{
    aggregator::{SyncDelta, TransactionPayload},
    error::SyncError,
    store::TransactionStore,
};

/// Counts reported by one `apply` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileCounts {
    pub added: u64,
    pub modified: u64,
    pub removed: u64,
    /// Modified events with no matching local record. Logged, not silent.
    pub skipped: u64,
}

#[derive(Clone)]
pub struct TransactionReconciler {
    store: Arc<dyn TransactionStore>,
}

impl TransactionReconciler {
    pub fn new(store: Arc<dyn TransactionStore>) -> Self {
        Self { store }
    }

    /// Apply one delta page for `account`. Order within the page is
    /// added → modified → removed, matching the provider's semantics.
    pub async fn apply(
        &self,
        account: &LinkedAccount,
        delta: &SyncDelta,
    ) -> Result<ReconcileCounts, SyncError> {
        let mut counts = ReconcileCounts::default();

        for payload in &delta.added {
            let data = to_synced(account, payload);
            if self
                .store
                .find_by_external_id(&payload.transaction_id)
                .await?
                .is_some()
            {
                // Re-delivered add: update in place rather than duplicate.
                tracing::debug!(
                    external_id = %payload.transaction_id,
                    "added transaction already exists, updating"
                );
                self.store.update(&data).await?;
                counts.modified += 1;
            } else {
                self.store.insert(&data).await?;
                counts.added += 1;
            }
        }

        for payload in &delta.modified {
            let data = to_synced(account, payload);
            if self.store.update(&data).await? > 0 {
                counts.modified += 1;
            } else {
                tracing::warn!(
                    external_id = %payload.transaction_id,
                    account_id = %account.id,
                    "modified transaction not found locally, skipping"
                );
                counts.skipped += 1;
            }
        }

        for removed in &delta.removed {
            let deleted = self
                .store
                .delete_by_external_id(&removed.transaction_id)
                .await?;
            if deleted > 0 {
                counts.removed += deleted;
            } else {
                tracing::debug!(
                    external_id = %removed.transaction_id,
                    "removed transaction not present locally"
                );
            }
        }

        Ok(counts)
    }
}

fn to_synced(account: &LinkedAccount, payload: &TransactionPayload) -> SyncedTransaction {
    SyncedTransaction {
        account_id: account.id,
        household_id: account.household_id,
        external_transaction_id: payload.transaction_id.clone(),
        amount: payload.amount,
        date: payload.date,
        authorized_date: payload.authorized_date,
        name: payload.name.clone(),
        merchant_name: payload.merchant_name.clone(),
        category: if payload.category.is_empty() {
            None
        } else {
            Some(payload.category.join(", "))
        },
        payment_channel: payload.payment_channel.clone(),
        pending: payload.pending,
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;
    use crate::services::testing::{
        InMemoryTransactions, delta_page, test_account, txn_payload,
    };

    fn reconciler(store: &Arc<InMemoryTransactions>) -> TransactionReconciler {
        TransactionReconciler::new(store.clone() as Arc<dyn TransactionStore>)
    }

    #[tokio::test]
    async fn initial_page_inserts_all_added() {
        let store = Arc::new(InMemoryTransactions::default());
        let account = test_account();
        let delta = delta_page(
            vec![txn_payload("ext1", "Coffee"), txn_payload("ext2", "Rent")],
            vec![],
            vec![],
            false,
            "c1",
        );

        let counts = reconciler(&store).apply(&account, &delta).await.unwrap();

        assert_eq!(counts.added, 2);
        assert_eq!(counts.modified, 0);
        assert!(store.get("ext1").await.is_some());
        assert!(store.get("ext2").await.is_some());
    }

    #[tokio::test]
    async fn redelivered_add_updates_instead_of_duplicating() {
        let store = Arc::new(InMemoryTransactions::default());
        let account = test_account();
        let rec = reconciler(&store);

        let mut payload = txn_payload("ext1", "Coffee");
        let first = delta_page(vec![payload.clone()], vec![], vec![], false, "c1");
        rec.apply(&account, &first).await.unwrap();

        payload.name = "Coffee Shop".to_string();
        let second = delta_page(vec![payload], vec![], vec![], false, "c2");
        let counts = rec.apply(&account, &second).await.unwrap();

        assert_eq!(counts.added, 0);
        assert_eq!(counts.modified, 1);
        assert_eq!(store.len().await, 1);
        assert_eq!(store.get("ext1").await.unwrap().name, "Coffee Shop");
    }

    #[tokio::test]
    async fn applying_identical_delta_twice_is_idempotent() {
        let store = Arc::new(InMemoryTransactions::default());
        let account = test_account();
        let rec = reconciler(&store);
        let delta = delta_page(
            vec![txn_payload("ext1", "Coffee"), txn_payload("ext2", "Rent")],
            vec![],
            vec![],
            false,
            "c1",
        );

        rec.apply(&account, &delta).await.unwrap();
        let state_after_first = store.snapshot().await;

        let counts = rec.apply(&account, &delta).await.unwrap();
        assert_eq!(counts.added, 0, "second pass must not add rows");
        assert_eq!(store.snapshot().await, state_after_first);
    }

    #[tokio::test]
    async fn modified_updates_in_place_without_new_row() {
        let store = Arc::new(InMemoryTransactions::default());
        let account = test_account();
        let rec = reconciler(&store);

        let mut payload = txn_payload("ext1", "Old Name");
        rec.apply(
            &account,
            &delta_page(vec![payload.clone()], vec![], vec![], false, "c1"),
        )
        .await
        .unwrap();
        let original_id = store.get("ext1").await.unwrap().id;

        payload.name = "New Name".to_string();
        let counts = rec
            .apply(
                &account,
                &delta_page(vec![], vec![payload], vec![], false, "c2"),
            )
            .await
            .unwrap();

        assert_eq!(counts.modified, 1);
        assert_eq!(store.len().await, 1);
        let updated = store.get("ext1").await.unwrap();
        assert_eq!(updated.id, original_id, "row identity must not change");
        assert_eq!(updated.name, "New Name");
    }

    #[tokio::test]
    async fn modified_without_match_is_skipped_not_created() {
        let store = Arc::new(InMemoryTransactions::default());
        let account = test_account();
        let delta = delta_page(vec![], vec![txn_payload("ghost", "Ghost")], vec![], false, "c1");

        let counts = reconciler(&store).apply(&account, &delta).await.unwrap();

        assert_eq!(counts.modified, 0);
        assert_eq!(counts.skipped, 1);
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn removing_missing_id_is_a_noop() {
        let store = Arc::new(InMemoryTransactions::default());
        let account = test_account();
        let delta = delta_page(vec![], vec![], vec!["ext123".to_string()], false, "c1");

        let counts = reconciler(&store).apply(&account, &delta).await.unwrap();

        assert_eq!(counts.removed, 0);
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn remove_deletes_matching_row() {
        let store = Arc::new(InMemoryTransactions::default());
        let account = test_account();
        let rec = reconciler(&store);

        rec.apply(
            &account,
            &delta_page(vec![txn_payload("ext1", "Coffee")], vec![], vec![], false, "c1"),
        )
        .await
        .unwrap();

        let counts = rec
            .apply(
                &account,
                &delta_page(vec![], vec![], vec!["ext1".to_string()], false, "c2"),
            )
            .await
            .unwrap();

        assert_eq!(counts.removed, 1);
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn negative_amount_preserved() {
        let store = Arc::new(InMemoryTransactions::default());
        let account = test_account();

        let mut payload = txn_payload("ext1", "Payroll");
        payload.amount = Decimal::new(-245075, 2); // -2450.75, an inflow

        reconciler(&store)
            .apply(&account, &delta_page(vec![payload], vec![], vec![], false, "c1"))
            .await
            .unwrap();

        assert_eq!(
            store.get("ext1").await.unwrap().amount,
            Decimal::new(-245075, 2),
            "the provider's sign must survive reconciliation"
        );
    }

    #[tokio::test]
    async fn manual_records_are_never_touched() {
        let store = Arc::new(InMemoryTransactions::default());
        let account = test_account();
        store.insert_manual(&account, "Cash groceries").await;

        let delta = delta_page(
            vec![txn_payload("ext1", "Coffee")],
            vec![],
            vec!["ext9".to_string()],
            false,
            "c1",
        );
        reconciler(&store).apply(&account, &delta).await.unwrap();

        assert_eq!(store.manual_count().await, 1);
        assert_eq!(store.len().await, 2);
    }
}
