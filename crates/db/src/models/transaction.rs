//! Transaction ledger model.
//!
//! Rows carrying an `external_transaction_id` are owned by reconciliation and
//! are only created, updated or deleted through the sync path. Manual rows
//! (no external id) belong to the user and reconciliation never touches them.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: Uuid,
    pub account_id: Uuid,
    pub household_id: Uuid,
    /// NULL only for manually entered records; unique otherwise
    pub external_transaction_id: Option<String>,
    /// Signed amount in the provider's convention (positive = outflow)
    pub amount: Decimal,
    pub date: NaiveDate,
    pub authorized_date: Option<NaiveDate>,
    pub name: String,
    pub merchant_name: Option<String>,
    pub category: Option<String>,
    pub payment_channel: Option<String>,
    pub pending: bool,
    pub is_manual: bool,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields the sync path is allowed to write.
#[derive(Debug, Clone)]
pub struct SyncedTransaction {
    pub account_id: Uuid,
    pub household_id: Uuid,
    pub external_transaction_id: String,
    pub amount: Decimal,
    pub date: NaiveDate,
    pub authorized_date: Option<NaiveDate>,
    pub name: String,
    pub merchant_name: Option<String>,
    pub category: Option<String>,
    pub payment_channel: Option<String>,
    pub pending: bool,
}

const SELECT_COLUMNS: &str = r#"
    id, account_id, household_id, external_transaction_id, amount, date,
    authorized_date, name, merchant_name, category, payment_channel,
    pending, is_manual, notes, created_at, updated_at
"#;

impl TransactionRecord {
    pub async fn find_by_external_id(
        pool: &PgPool,
        external_id: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        let sql =
            format!("SELECT {SELECT_COLUMNS} FROM transactions WHERE external_transaction_id = $1");
        sqlx::query_as::<_, Self>(&sql)
            .bind(external_id)
            .fetch_optional(pool)
            .await
    }

    pub async fn list_for_account(
        pool: &PgPool,
        account_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM transactions WHERE account_id = $1 ORDER BY date DESC, created_at DESC"
        );
        sqlx::query_as::<_, Self>(&sql)
            .bind(account_id)
            .fetch_all(pool)
            .await
    }

    pub async fn insert_from_sync(
        pool: &PgPool,
        data: &SyncedTransaction,
    ) -> Result<Self, sqlx::Error> {
        let sql = format!(
            r#"INSERT INTO transactions (
                account_id, household_id, external_transaction_id, amount, date,
                authorized_date, name, merchant_name, category, payment_channel,
                pending, is_manual
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, FALSE)
            RETURNING {SELECT_COLUMNS}"#
        );
        sqlx::query_as::<_, Self>(&sql)
            .bind(data.account_id)
            .bind(data.household_id)
            .bind(&data.external_transaction_id)
            .bind(data.amount)
            .bind(data.date)
            .bind(data.authorized_date)
            .bind(&data.name)
            .bind(&data.merchant_name)
            .bind(&data.category)
            .bind(&data.payment_channel)
            .bind(data.pending)
            .fetch_one(pool)
            .await
    }

    /// Update-in-place keyed by external id. Returns rows affected so the
    /// caller can distinguish "updated" from "no such record".
    pub async fn update_from_sync(
        pool: &PgPool,
        data: &SyncedTransaction,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"UPDATE transactions
               SET amount = $2,
                   date = $3,
                   authorized_date = $4,
                   name = $5,
                   merchant_name = $6,
                   category = $7,
                   payment_channel = $8,
                   pending = $9,
                   updated_at = NOW()
               WHERE external_transaction_id = $1"#,
        )
        .bind(&data.external_transaction_id)
        .bind(data.amount)
        .bind(data.date)
        .bind(data.authorized_date)
        .bind(&data.name)
        .bind(&data.merchant_name)
        .bind(&data.category)
        .bind(&data.payment_channel)
        .bind(data.pending)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Delete keyed by external id; deleting a missing id affects zero rows.
    pub async fn delete_by_external_id(
        pool: &PgPool,
        external_id: &str,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM transactions WHERE external_transaction_id = $1")
            .bind(external_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}
