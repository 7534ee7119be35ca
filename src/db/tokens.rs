//! Token repository for the database token store.
//!
//! Rows are keyed by a hash of the bearer identifier; the identifier itself
//! never reaches the database.

use super::DbError;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::BTreeMap;

/// A stored token row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRecord {
    pub user_id: String,
    pub expiry: DateTime<Utc>,
    pub attributes: BTreeMap<String, String>,
}

/// Repository for token rows.
pub struct TokenRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> TokenRepository<'a> {
    /// Create a new token repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a token row under `token_hash`.
    pub async fn insert(&self, token_hash: &str, record: &TokenRecord) -> Result<(), DbError> {
        let attributes = serde_json::to_string(&record.attributes)
            .map_err(|e| DbError::Corrupt(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO tokens (token_id, user_id, expiry, attributes)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(token_hash)
        .bind(&record.user_id)
        .bind(record.expiry.timestamp_millis())
        .bind(attributes)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Look up a token row. Expired rows are returned; the caller decides.
    pub async fn find(&self, token_hash: &str) -> Result<Option<TokenRecord>, DbError> {
        let row = sqlx::query_as::<_, (String, i64, String)>(
            r#"
            SELECT user_id, expiry, attributes
            FROM tokens
            WHERE token_id = ?
            "#,
        )
        .bind(token_hash)
        .fetch_optional(self.pool)
        .await?;

        row.map(|(user_id, expiry, attributes)| {
            let expiry = DateTime::from_timestamp_millis(expiry)
                .ok_or_else(|| DbError::Corrupt(format!("token expiry {expiry}")))?;
            let attributes = serde_json::from_str(&attributes)
                .map_err(|e| DbError::Corrupt(e.to_string()))?;
            Ok(TokenRecord {
                user_id,
                expiry,
                attributes,
            })
        })
        .transpose()
    }

    /// Delete a token row. Deleting a missing row is not an error.
    pub async fn delete(&self, token_hash: &str) -> Result<(), DbError> {
        sqlx::query("DELETE FROM tokens WHERE token_id = ?")
            .bind(token_hash)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Delete every row whose expiry is at or before `now`.
    pub async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, DbError> {
        let result = sqlx::query("DELETE FROM tokens WHERE expiry <= ?")
            .bind(now.timestamp_millis())
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
