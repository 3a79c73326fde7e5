//! Routing of verified provider webhooks to sync work.
//!
//! Runs after signature verification, so payloads here are trusted. Every
//! delivery is acknowledged: recognized events are routed by their
//! `(type, code)` pair, unrecognized ones are logged and dropped so new
//! provider event types never bounce.

use std::sync::Arc;

use serde::Deserialize;

use super::{
    error::SyncError,
    queue::{QueueError, SyncQueue, SyncTrigger},
    store::LinkedAccountStore,
};

/// Inbound webhook body after envelope verification.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    pub webhook_type: String,
    pub webhook_code: String,
    pub item_id: String,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

/// Closed classification of provider events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookEvent {
    /// New or changed transactions are available for the item.
    TransactionsUpdated,
    /// The item is broken and needs the user to re-authorize.
    ItemError,
    /// Anything we don't route. Acknowledged and dropped.
    Unrecognized,
}

impl WebhookEvent {
    pub fn classify(payload: &WebhookPayload) -> Self {
        match (payload.webhook_type.as_str(), payload.webhook_code.as_str()) {
            (
                "TRANSACTIONS",
                "SYNC_UPDATES_AVAILABLE" | "DEFAULT_UPDATE" | "HISTORICAL_UPDATE"
                | "INITIAL_UPDATE",
            ) => Self::TransactionsUpdated,
            ("ITEM", "ERROR") => Self::ItemError,
            _ => Self::Unrecognized,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub accounts_queued: u64,
    pub accounts_deactivated: u64,
}

pub struct WebhookDispatcher {
    accounts: Arc<dyn LinkedAccountStore>,
    queue: SyncQueue,
}

impl WebhookDispatcher {
    pub fn new(accounts: Arc<dyn LinkedAccountStore>, queue: SyncQueue) -> Self {
        Self { accounts, queue }
    }

    pub async fn dispatch(&self, payload: &WebhookPayload) -> Result<DispatchOutcome, SyncError> {
        let mut outcome = DispatchOutcome::default();

        match WebhookEvent::classify(payload) {
            WebhookEvent::TransactionsUpdated => {
                let accounts = self
                    .accounts
                    .find_active_by_item_id(&payload.item_id)
                    .await?;
                if accounts.is_empty() {
                    tracing::warn!(
                        item_id = %payload.item_id,
                        "transactions webhook for item with no active accounts"
                    );
                    return Ok(outcome);
                }
                for account in &accounts {
                    match self.queue.try_submit(account.id, SyncTrigger::Webhook) {
                        Ok(()) => outcome.accounts_queued += 1,
                        Err(QueueError::Full | QueueError::Closed) => {
                            // The periodic sweep covers whatever we drop here.
                            tracing::warn!(
                                account_id = %account.id,
                                item_id = %payload.item_id,
                                "could not enqueue webhook-triggered sync"
                            );
                        }
                    }
                }
                tracing::info!(
                    item_id = %payload.item_id,
                    code = %payload.webhook_code,
                    queued = outcome.accounts_queued,
                    "queued syncs for transactions webhook"
                );
            }
            WebhookEvent::ItemError => {
                let detail = payload
                    .error
                    .as_ref()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "item error reported by provider".to_string());
                let message = format!("re-authorization required: {detail}");
                outcome.accounts_deactivated = self
                    .accounts
                    .mark_item_inactive(&payload.item_id, &message)
                    .await?;
                tracing::warn!(
                    item_id = %payload.item_id,
                    deactivated = outcome.accounts_deactivated,
                    "deactivated accounts after item error webhook"
                );
            }
            WebhookEvent::Unrecognized => {
                tracing::debug!(
                    webhook_type = %payload.webhook_type,
                    webhook_code = %payload.webhook_code,
                    item_id = %payload.item_id,
                    "ignoring unrecognized webhook"
                );
            }
        }

        Ok(outcome)
    }
}
