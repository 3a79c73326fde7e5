//! Linked account listing, manual sync triggers and unlinking.

use axum::{
    Router,
    extract::{Path, Query, State},
    response::Json as ResponseJson,
    routing::{delete, get, post},
};
use db::models::{linked_account::LinkedAccount, transaction::TransactionRecord};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use services::services::{SyncError, queue::SyncTrigger};
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{error::ApiError, state::AppState};

#[derive(Deserialize)]
pub struct AccountQueryParams {
    /// Filter by owning user; without it, all active accounts are returned.
    #[serde(default)]
    pub user_id: Option<Uuid>,
}

/// GET /api/accounts - List linked accounts
pub async fn list_accounts(
    State(state): State<AppState>,
    Query(params): Query<AccountQueryParams>,
) -> Result<ResponseJson<ApiResponse<Vec<LinkedAccount>>>, ApiError> {
    let accounts = match params.user_id {
        Some(user_id) => LinkedAccount::find_by_user(&state.pool, user_id).await?,
        None => LinkedAccount::find_active(&state.pool).await?,
    };
    Ok(ResponseJson(ApiResponse::success(accounts)))
}

/// GET /api/accounts/{id}/transactions - List an account's transactions
pub async fn list_transactions(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Vec<TransactionRecord>>>, ApiError> {
    if LinkedAccount::find_by_id(&state.pool, id).await?.is_none() {
        return Err(SyncError::NotFound(id).into());
    }
    let transactions = TransactionRecord::list_for_account(&state.pool, id).await?;
    Ok(ResponseJson(ApiResponse::success(transactions)))
}

#[derive(Serialize)]
pub struct SyncTriggeredResponse {
    pub account_id: Uuid,
    pub queued: bool,
}

/// POST /api/accounts/{id}/sync - Manually trigger a sync
///
/// Returns 409 when a run is already in flight and 404 for an unknown or
/// inactive-and-unknown account; the sync itself happens on the worker pool.
pub async fn trigger_sync(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<SyncTriggeredResponse>>, ApiError> {
    let account = LinkedAccount::find_by_id(&state.pool, id)
        .await?
        .ok_or(SyncError::NotFound(id))?;
    if !account.is_active {
        return Err(SyncError::Inactive(id).into());
    }
    if state.orchestrator.gate().is_syncing(id) {
        return Err(SyncError::AlreadySyncing(id).into());
    }

    state.queue.try_submit(id, SyncTrigger::Manual)?;

    Ok(ResponseJson(ApiResponse::success(SyncTriggeredResponse {
        account_id: id,
        queued: true,
    })))
}

/// DELETE /api/accounts/{id} - Unlink an account
///
/// Revokes the item at the provider, then deletes the row (transactions
/// cascade). Provider revocation is best-effort: if the item is already
/// gone upstream the local delete still proceeds.
pub async fn unlink_account(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    let account = LinkedAccount::find_by_id(&state.pool, id)
        .await?
        .ok_or(SyncError::NotFound(id))?;

    match state.vault.decrypt(&account.access_token_ciphertext) {
        Ok(token) if !token.is_empty() => {
            if let Err(e) = state
                .aggregator
                .remove_item(&SecretString::from(token))
                .await
            {
                tracing::warn!(
                    account_id = %id,
                    item_id = %account.external_item_id,
                    error = %e,
                    "could not revoke item at provider, deleting locally anyway"
                );
            }
        }
        Ok(_) => {}
        Err(e) => {
            tracing::warn!(
                account_id = %id,
                error = %e,
                "could not decrypt access token for revocation, deleting locally anyway"
            );
        }
    }

    let rows_affected = LinkedAccount::delete(&state.pool, id).await?;
    if rows_affected == 0 {
        return Err(SyncError::NotFound(id).into());
    }
    tracing::info!(account_id = %id, "unlinked account");
    Ok(ResponseJson(ApiResponse::success(())))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/accounts", get(list_accounts))
        .route("/accounts/{id}/transactions", get(list_transactions))
        .route("/accounts/{id}/sync", post(trigger_sync))
        .route("/accounts/{id}", delete(unlink_account))
}
