//! Typed client for the account-aggregation provider.
//!
//! [`AggregatorClient`] is the seam the orchestrator and the link routes
//! talk through; [`HttpAggregatorClient`] is the production implementation
//! against the provider's JSON API. Errors are split into transient
//! (connect/timeout/5xx/429, safe to retry) and permanent (everything
//! else, never retried and a sign the item may need re-authorization).

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::StatusCode;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AggregatorError {
    #[error("transient aggregator failure: {0}")]
    Transient(String),
    #[error("permanent aggregator failure: {0}")]
    Permanent(String),
}

/// One transaction as delivered by the provider's delta stream.
///
/// `amount` keeps the provider's sign convention (positive = money out)
/// end-to-end; see the reconciler for why it is never normalized away.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionPayload {
    pub transaction_id: String,
    pub amount: Decimal,
    pub date: NaiveDate,
    #[serde(default)]
    pub authorized_date: Option<NaiveDate>,
    pub name: String,
    #[serde(default)]
    pub merchant_name: Option<String>,
    #[serde(default)]
    pub category: Vec<String>,
    #[serde(default)]
    pub payment_channel: Option<String>,
    #[serde(default)]
    pub pending: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemovedTransaction {
    pub transaction_id: String,
}

/// One page of the provider's transaction delta stream.
///
/// Transient by design: produced by a single sync call, consumed once by the
/// reconciler, then discarded. `next_cursor` is opaque and must be handed
/// back to the provider byte-for-byte.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncDelta {
    #[serde(default)]
    pub added: Vec<TransactionPayload>,
    #[serde(default)]
    pub modified: Vec<TransactionPayload>,
    #[serde(default)]
    pub removed: Vec<RemovedTransaction>,
    pub has_more: bool,
    pub next_cursor: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinkTokenResponse {
    pub link_token: String,
    pub expiration: DateTime<Utc>,
}

#[derive(Clone, Deserialize)]
pub struct TokenExchange {
    /// Long-lived credential for the new item; goes straight into the vault
    /// and is never logged.
    pub access_token: SecretString,
    pub item_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccountBalances {
    #[serde(default)]
    pub iso_currency_code: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExternalAccount {
    pub account_id: String,
    pub name: String,
    #[serde(default)]
    pub official_name: Option<String>,
    #[serde(default)]
    pub mask: Option<String>,
    #[serde(rename = "type", default)]
    pub account_type: Option<String>,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub balances: AccountBalances,
}

#[async_trait]
pub trait AggregatorClient: Send + Sync {
    async fn create_link_token(
        &self,
        user_id: &str,
        products: &[String],
        webhook: Option<&str>,
    ) -> Result<LinkTokenResponse, AggregatorError>;

    async fn exchange_public_token(
        &self,
        public_token: &str,
    ) -> Result<TokenExchange, AggregatorError>;

    async fn get_accounts(
        &self,
        access_token: &SecretString,
    ) -> Result<Vec<ExternalAccount>, AggregatorError>;

    async fn sync_transactions(
        &self,
        access_token: &SecretString,
        cursor: Option<&str>,
    ) -> Result<SyncDelta, AggregatorError>;

    async fn remove_item(&self, access_token: &SecretString) -> Result<(), AggregatorError>;
}

/// Production client against the provider's HTTP API.
pub struct HttpAggregatorClient {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    secret: SecretString,
}

impl HttpAggregatorClient {
    pub fn new(base_url: String, client_id: String, secret: SecretString) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client_id,
            secret,
        }
    }

    /// POST a JSON body with provider credentials injected, deserializing
    /// the response.
    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        mut body: Value,
    ) -> Result<T, AggregatorError> {
        let obj = body
            .as_object_mut()
            .expect("aggregator request bodies are JSON objects");
        obj.insert("client_id".to_string(), json!(self.client_id));
        obj.insert("secret".to_string(), json!(self.secret.expose_secret()));

        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AggregatorError::Transient(format!("request to {path} failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return response.json::<T>().await.map_err(|e| {
                AggregatorError::Permanent(format!("invalid response from {path}: {e}"))
            });
        }

        let detail = response.text().await.unwrap_or_default();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            Err(AggregatorError::Transient(format!(
                "{path} returned {status}: {detail}"
            )))
        } else {
            Err(AggregatorError::Permanent(format!(
                "{path} returned {status}: {detail}"
            )))
        }
    }
}

#[async_trait]
impl AggregatorClient for HttpAggregatorClient {
    async fn create_link_token(
        &self,
        user_id: &str,
        products: &[String],
        webhook: Option<&str>,
    ) -> Result<LinkTokenResponse, AggregatorError> {
        let response: LinkTokenResponse = self
            .post(
                "/link/token/create",
                json!({
                    "user": { "client_user_id": user_id },
                    "client_name": "nestbook",
                    "products": products,
                    "country_codes": ["US"],
                    "language": "en",
                    "webhook": webhook,
                }),
            )
            .await?;
        tracing::info!(user_id, "created link token");
        Ok(response)
    }

    async fn exchange_public_token(
        &self,
        public_token: &str,
    ) -> Result<TokenExchange, AggregatorError> {
        let exchange: TokenExchange = self
            .post(
                "/item/public_token/exchange",
                json!({ "public_token": public_token }),
            )
            .await?;
        tracing::info!(item_id = %exchange.item_id, "exchanged public token");
        Ok(exchange)
    }

    async fn get_accounts(
        &self,
        access_token: &SecretString,
    ) -> Result<Vec<ExternalAccount>, AggregatorError> {
        #[derive(Deserialize)]
        struct AccountsResponse {
            #[serde(default)]
            accounts: Vec<ExternalAccount>,
        }

        let response: AccountsResponse = self
            .post(
                "/accounts/get",
                json!({ "access_token": access_token.expose_secret() }),
            )
            .await?;
        tracing::info!(count = response.accounts.len(), "retrieved accounts");
        Ok(response.accounts)
    }

    async fn sync_transactions(
        &self,
        access_token: &SecretString,
        cursor: Option<&str>,
    ) -> Result<SyncDelta, AggregatorError> {
        let delta: SyncDelta = self
            .post(
                "/transactions/sync",
                json!({
                    "access_token": access_token.expose_secret(),
                    "cursor": cursor,
                }),
            )
            .await?;
        tracing::debug!(
            added = delta.added.len(),
            modified = delta.modified.len(),
            removed = delta.removed.len(),
            has_more = delta.has_more,
            "fetched sync page"
        );
        Ok(delta)
    }

    async fn remove_item(&self, access_token: &SecretString) -> Result<(), AggregatorError> {
        let _: Value = self
            .post(
                "/item/remove",
                json!({ "access_token": access_token.expose_secret() }),
            )
            .await?;
        tracing::info!("removed aggregator item");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_deserializes_with_signed_amounts() {
        let delta: SyncDelta = serde_json::from_str(
            r#"{
                "added": [{
                    "transaction_id": "ext1",
                    "amount": -42.50,
                    "date": "2026-08-01",
                    "name": "Payroll",
                    "pending": false
                }],
                "modified": [],
                "removed": [{"transaction_id": "ext2"}],
                "has_more": true,
                "next_cursor": "c1"
            }"#,
        )
        .unwrap();

        assert_eq!(delta.added.len(), 1);
        assert_eq!(delta.added[0].amount, Decimal::new(-4250, 2));
        assert_eq!(delta.removed[0].transaction_id, "ext2");
        assert!(delta.has_more);
        assert_eq!(delta.next_cursor, "c1");
    }

    #[test]
    fn payload_defaults_optional_fields() {
        let payload: TransactionPayload = serde_json::from_str(
            r#"{"transaction_id":"t","amount":1.0,"date":"2026-01-02","name":"Coffee"}"#,
        )
        .unwrap();
        assert!(payload.category.is_empty());
        assert!(payload.authorized_date.is_none());
        assert!(!payload.pending);
    }
}
