//! Linked external account model.
//!
//! A linked account is one bank account reachable through the aggregator,
//! grouped with its siblings under a provider "item" (one authorization).
//! The row carries the encrypted access token and the sync cursor, and is
//! the single serialization point for a sync cycle: the cursor only moves
//! through the conditional updates below.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct LinkedAccount {
    pub id: Uuid,
    pub user_id: Uuid,
    pub household_id: Uuid,
    pub external_item_id: String,
    /// Provider account id, unique across all linked accounts
    pub external_account_id: String,
    /// Vault ciphertext; opaque outside `services::vault`
    pub access_token_ciphertext: String,
    /// Opaque provider cursor; NULL before the first completed sync
    pub sync_cursor: Option<String>,
    pub name: String,
    pub official_name: Option<String>,
    pub mask: Option<String>,
    pub account_type: Option<String>,
    pub account_subtype: Option<String>,
    pub currency_code: String,
    pub is_active: bool,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Data for creating a linked account after a successful token exchange.
#[derive(Debug, Clone)]
pub struct CreateLinkedAccount {
    pub user_id: Uuid,
    pub household_id: Uuid,
    pub external_item_id: String,
    pub external_account_id: String,
    pub access_token_ciphertext: String,
    pub name: String,
    pub official_name: Option<String>,
    pub mask: Option<String>,
    pub account_type: Option<String>,
    pub account_subtype: Option<String>,
    pub currency_code: String,
}

const SELECT_COLUMNS: &str = r#"
    id, user_id, household_id, external_item_id, external_account_id,
    access_token_ciphertext, sync_cursor, name, official_name, mask,
    account_type, account_subtype, currency_code, is_active,
    last_synced_at, last_error, created_at, updated_at
"#;

impl LinkedAccount {
    pub async fn create(pool: &PgPool, data: &CreateLinkedAccount) -> Result<Self, sqlx::Error> {
        let sql = format!(
            r#"INSERT INTO linked_accounts (
                user_id, household_id, external_item_id, external_account_id,
                access_token_ciphertext, name, official_name, mask,
                account_type, account_subtype, currency_code
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {SELECT_COLUMNS}"#
        );
        sqlx::query_as::<_, Self>(&sql)
            .bind(data.user_id)
            .bind(data.household_id)
            .bind(&data.external_item_id)
            .bind(&data.external_account_id)
            .bind(&data.access_token_ciphertext)
            .bind(&data.name)
            .bind(&data.official_name)
            .bind(&data.mask)
            .bind(&data.account_type)
            .bind(&data.account_subtype)
            .bind(&data.currency_code)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM linked_accounts WHERE id = $1");
        sqlx::query_as::<_, Self>(&sql)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_active(pool: &PgPool) -> Result<Vec<Self>, sqlx::Error> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM linked_accounts WHERE is_active ORDER BY created_at"
        );
        sqlx::query_as::<_, Self>(&sql).fetch_all(pool).await
    }

    pub async fn find_by_user(pool: &PgPool, user_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM linked_accounts WHERE user_id = $1 ORDER BY created_at"
        );
        sqlx::query_as::<_, Self>(&sql)
            .bind(user_id)
            .fetch_all(pool)
            .await
    }

    pub async fn find_active_by_item_id(
        pool: &PgPool,
        item_id: &str,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM linked_accounts
             WHERE external_item_id = $1 AND is_active ORDER BY created_at"
        );
        sqlx::query_as::<_, Self>(&sql)
            .bind(item_id)
            .fetch_all(pool)
            .await
    }

    pub async fn exists_by_external_account_id(
        pool: &PgPool,
        external_account_id: &str,
    ) -> Result<bool, sqlx::Error> {
        let exists: (bool,) = sqlx::query_as(
            "SELECT EXISTS (SELECT 1 FROM linked_accounts WHERE external_account_id = $1)",
        )
        .bind(external_account_id)
        .fetch_one(pool)
        .await?;
        Ok(exists.0)
    }

    /// Conditionally advance the cursor from `previous` to `next`.
    ///
    /// The compare-and-set guards the read-then-advance invariant: a stale or
    /// duplicate completion whose `previous` no longer matches the stored
    /// cursor affects zero rows, and the caller must treat that as a lost
    /// race rather than overwrite newer progress.
    pub async fn advance_cursor(
        pool: &PgPool,
        id: Uuid,
        previous: Option<&str>,
        next: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"UPDATE linked_accounts
               SET sync_cursor = $3, updated_at = NOW()
               WHERE id = $1 AND sync_cursor IS NOT DISTINCT FROM $2"#,
        )
        .bind(id)
        .bind(previous)
        .bind(next)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Final cursor commit for a fully synced cycle: same CAS as
    /// [`advance_cursor`] plus the bookkeeping a completed run owns.
    ///
    /// [`advance_cursor`]: LinkedAccount::advance_cursor
    pub async fn complete_sync(
        pool: &PgPool,
        id: Uuid,
        previous: Option<&str>,
        next: &str,
        synced_at: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"UPDATE linked_accounts
               SET sync_cursor = $3,
                   last_synced_at = $4,
                   last_error = NULL,
                   updated_at = NOW()
               WHERE id = $1 AND sync_cursor IS NOT DISTINCT FROM $2"#,
        )
        .bind(id)
        .bind(previous)
        .bind(next)
        .bind(synced_at)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn record_sync_error(
        pool: &PgPool,
        id: Uuid,
        message: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE linked_accounts SET last_error = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(message)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Deactivate a single account (unrecoverable provider failure for this
    /// account's sync).
    pub async fn deactivate(pool: &PgPool, id: Uuid, message: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"UPDATE linked_accounts
               SET is_active = FALSE, last_error = $2, updated_at = NOW()
               WHERE id = $1"#,
        )
        .bind(id)
        .bind(message)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Deactivate every account under an item (provider says the
    /// authorization is broken and the user must re-link).
    pub async fn mark_item_inactive(
        pool: &PgPool,
        item_id: &str,
        message: &str,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"UPDATE linked_accounts
               SET is_active = FALSE, last_error = $2, updated_at = NOW()
               WHERE external_item_id = $1"#,
        )
        .bind(item_id)
        .bind(message)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Delete the account; transactions cascade at the schema level.
    pub async fn delete(pool: &PgPool, id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM linked_accounts WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}
