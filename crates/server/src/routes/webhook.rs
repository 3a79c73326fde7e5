//! Inbound webhook endpoint for the aggregation provider.
//!
//! Verification runs against the exact raw request bytes before any JSON
//! parsing, and a failed verification produces no side effects at all.

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::Json as ResponseJson,
    routing::post,
};
use chrono::Utc;
use serde::Serialize;
use services::services::{SyncError, dispatcher::WebhookPayload};
use utils::response::ApiResponse;

use crate::{error::ApiError, state::AppState};

/// Header carrying the provider's signed envelope token.
const VERIFICATION_HEADER: &str = "plaid-verification";

#[derive(Serialize)]
pub struct WebhookAck {
    pub accounts_queued: u64,
    pub accounts_deactivated: u64,
}

/// POST /api/webhooks/aggregator - Receive a provider webhook
pub async fn receive_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<ResponseJson<ApiResponse<WebhookAck>>, ApiError> {
    let signature = headers
        .get(VERIFICATION_HEADER)
        .and_then(|value| value.to_str().ok());

    state
        .verifier
        .verify(signature, &body, Utc::now())
        .map_err(SyncError::from)?;

    let payload: WebhookPayload = serde_json::from_slice(&body)
        .map_err(|e| SyncError::Validation(format!("malformed webhook body: {e}")))?;

    tracing::info!(
        webhook_type = %payload.webhook_type,
        webhook_code = %payload.webhook_code,
        item_id = %payload.item_id,
        "received webhook"
    );

    let outcome = state.dispatcher.dispatch(&payload).await?;

    Ok(ResponseJson(ApiResponse::success(WebhookAck {
        accounts_queued: outcome.accounts_queued,
        accounts_deactivated: outcome.accounts_deactivated,
    })))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/webhooks/aggregator", post(receive_webhook))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::http::{HeaderValue, StatusCode};
    use axum::response::IntoResponse;
    use chrono::{DateTime, Duration as ChronoDuration};
    use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
    use secrecy::SecretString;
    use serde::Serialize;
    use services::services::vault::VaultKey;
    use sha2::{Digest, Sha256};
    use sqlx::postgres::PgPoolOptions;

    use super::*;
    use crate::config::ServerConfig;

    const BODY: &[u8] =
        br#"{"webhook_type":"TRANSACTIONS","webhook_code":"SYNC_UPDATES_AVAILABLE","item_id":"item-1"}"#;

    #[derive(Serialize)]
    struct EnvelopeClaims {
        request_body_sha256: String,
        iat: i64,
    }

    fn signed_over(body: &[u8], issued_at: DateTime<Utc>) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            &EnvelopeClaims {
                request_body_sha256: hex::encode(Sha256::digest(body)),
                iat: issued_at.timestamp(),
            },
            &EncodingKey::from_secret(b"test-signing-key"),
        )
        .unwrap()
    }

    /// State with a lazy pool and no workers spawned: the database is never
    /// touched unless a handler actually reaches it.
    fn test_state() -> AppState {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            database_url: "postgres://localhost/nestbook_test".to_string(),
            vault_key: VaultKey::parse("0123456789abcdef0123456789abcdef").unwrap(),
            aggregator_base_url: "https://sandbox.example.com".to_string(),
            aggregator_client_id: "client".to_string(),
            aggregator_secret: SecretString::from("secret"),
            webhook_url: None,
            sync_workers: 0,
            queue_capacity: 8,
            sync_interval: Duration::from_secs(3600),
        };
        let pool = PgPoolOptions::new()
            .connect_lazy(&config.database_url)
            .unwrap();
        AppState::new(config, pool)
    }

    async fn rejected_status(state: &AppState, headers: HeaderMap) -> StatusCode {
        let result =
            receive_webhook(State(state.clone()), headers, Bytes::from_static(BODY)).await;
        match result {
            Ok(_) => panic!("webhook accepted despite bad signature"),
            Err(err) => err.into_response().status(),
        }
    }

    #[tokio::test]
    async fn missing_signature_is_unauthorized_and_enqueues_nothing() {
        let state = test_state();
        let status = rejected_status(&state, HeaderMap::new()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(state.queue.try_recv().await.is_none());
    }

    #[tokio::test]
    async fn signature_over_different_body_is_unauthorized_and_enqueues_nothing() {
        let state = test_state();
        let token = signed_over(b"a body other than the one delivered", Utc::now());
        let mut headers = HeaderMap::new();
        headers.insert(VERIFICATION_HEADER, HeaderValue::from_str(&token).unwrap());

        let status = rejected_status(&state, headers).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(state.queue.try_recv().await.is_none());
    }

    #[tokio::test]
    async fn garbage_token_is_unauthorized_and_enqueues_nothing() {
        let state = test_state();
        let mut headers = HeaderMap::new();
        headers.insert(VERIFICATION_HEADER, HeaderValue::from_static("not.a.jwt"));

        let status = rejected_status(&state, headers).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(state.queue.try_recv().await.is_none());
    }

    #[tokio::test]
    async fn stale_envelope_is_unauthorized_and_enqueues_nothing() {
        let state = test_state();
        let token = signed_over(BODY, Utc::now() - ChronoDuration::seconds(400));
        let mut headers = HeaderMap::new();
        headers.insert(VERIFICATION_HEADER, HeaderValue::from_str(&token).unwrap());

        let status = rejected_status(&state, headers).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(state.queue.try_recv().await.is_none());
    }
}
