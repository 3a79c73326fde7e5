//! Account linking: link token creation and public token exchange.

use axum::{Json, Router, extract::State, response::Json as ResponseJson, routing::post};
use chrono::{DateTime, Utc};
use db::models::linked_account::{CreateLinkedAccount, LinkedAccount};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use services::services::{SyncError, queue::SyncTrigger};
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{error::ApiError, state::AppState};

fn default_products() -> Vec<String> {
    vec!["transactions".to_string()]
}

#[derive(Deserialize)]
pub struct CreateLinkTokenRequest {
    pub user_id: Uuid,
    #[serde(default = "default_products")]
    pub products: Vec<String>,
}

#[derive(Serialize)]
pub struct CreateLinkTokenResponse {
    pub link_token: String,
    pub expiration: DateTime<Utc>,
}

/// POST /api/link/token - Create a link token for the client-side link flow
pub async fn create_link_token(
    State(state): State<AppState>,
    Json(payload): Json<CreateLinkTokenRequest>,
) -> Result<ResponseJson<ApiResponse<CreateLinkTokenResponse>>, ApiError> {
    if payload.products.is_empty() {
        return Err(SyncError::Validation("products must not be empty".to_string()).into());
    }

    let response = state
        .aggregator
        .create_link_token(
            &payload.user_id.to_string(),
            &payload.products,
            state.config.webhook_url.as_deref(),
        )
        .await
        .map_err(SyncError::from)?;

    Ok(ResponseJson(ApiResponse::success(CreateLinkTokenResponse {
        link_token: response.link_token,
        expiration: response.expiration,
    })))
}

#[derive(Deserialize)]
pub struct ExchangeRequest {
    pub user_id: Uuid,
    pub household_id: Uuid,
    pub public_token: String,
}

#[derive(Serialize)]
pub struct ExchangeResponse {
    pub item_id: String,
    pub accounts_added: u64,
}

/// POST /api/link/exchange - Exchange a public token and link its accounts
///
/// The access token is encrypted before it ever reaches the database. An
/// initial sync is enqueued per new account; accounts already linked under
/// a previous exchange are skipped.
pub async fn exchange_public_token(
    State(state): State<AppState>,
    Json(payload): Json<ExchangeRequest>,
) -> Result<ResponseJson<ApiResponse<ExchangeResponse>>, ApiError> {
    if payload.public_token.trim().is_empty() {
        return Err(SyncError::Validation("public_token must not be empty".to_string()).into());
    }

    let exchange = state
        .aggregator
        .exchange_public_token(&payload.public_token)
        .await
        .map_err(SyncError::from)?;
    let external_accounts = state
        .aggregator
        .get_accounts(&exchange.access_token)
        .await
        .map_err(SyncError::from)?;

    let ciphertext = state
        .vault
        .encrypt(exchange.access_token.expose_secret())
        .map_err(SyncError::from)?;

    let mut accounts_added = 0;
    for external in external_accounts {
        if LinkedAccount::exists_by_external_account_id(&state.pool, &external.account_id).await? {
            tracing::debug!(
                external_account_id = %external.account_id,
                "account already linked, skipping"
            );
            continue;
        }

        let account = LinkedAccount::create(
            &state.pool,
            &CreateLinkedAccount {
                user_id: payload.user_id,
                household_id: payload.household_id,
                external_item_id: exchange.item_id.clone(),
                external_account_id: external.account_id,
                access_token_ciphertext: ciphertext.clone(),
                name: external.name,
                official_name: external.official_name,
                mask: external.mask,
                account_type: external.account_type,
                account_subtype: external.subtype,
                currency_code: external
                    .balances
                    .iso_currency_code
                    .unwrap_or_else(|| "USD".to_string()),
            },
        )
        .await?;
        accounts_added += 1;

        // Initial sync is best-effort here; the periodic sweep covers misses.
        if let Err(e) = state.queue.try_submit(account.id, SyncTrigger::Manual) {
            tracing::warn!(account_id = %account.id, error = %e, "could not enqueue initial sync");
        }
    }

    tracing::info!(
        item_id = %exchange.item_id,
        accounts_added,
        "linked item"
    );

    Ok(ResponseJson(ApiResponse::success(ExchangeResponse {
        item_id: exchange.item_id,
        accounts_added,
    })))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/link/token", post(create_link_token))
        .route("/link/exchange", post(exchange_public_token))
}
