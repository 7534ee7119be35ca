//! User repository.
//!
//! Handles registration and password verification.

use super::DbError;
use crate::security::password::{hash_password, verify_password};
use argon2::PasswordHash;
use sqlx::SqlitePool;
use std::sync::OnceLock;

/// Hash verified against when a user does not exist, so that unknown and
/// known usernames take the same time.
static DUMMY_HASH: OnceLock<String> = OnceLock::new();

fn dummy_hash() -> String {
    DUMMY_HASH
        .get_or_init(|| hash_password("natter-dummy-password").unwrap_or_default())
        .clone()
}

/// Repository for user operations.
pub struct UserRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> UserRepository<'a> {
    /// Create a new user repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Register a new user.
    pub async fn register(&self, username: &str, password: &str) -> Result<(), DbError> {
        let pw_hash = hash_password(password).map_err(|e| DbError::Corrupt(e.to_string()))?;
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO users (user_id, pw_hash, created_at)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(username)
        .bind(&pw_hash)
        .bind(now)
        .execute(self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return DbError::UserExists(username.to_string());
            }
            DbError::from(e)
        })?;

        Ok(())
    }

    /// Check a username/password pair.
    ///
    /// Unknown users still pay for one Argon2 verification.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<bool, DbError> {
        let stored = sqlx::query_scalar::<_, String>("SELECT pw_hash FROM users WHERE user_id = ?")
            .bind(username)
            .fetch_optional(self.pool)
            .await?;

        let (hash_text, exists) = match stored {
            Some(hash) => (hash, true),
            None => (dummy_hash(), false),
        };

        let Ok(parsed) = PasswordHash::new(&hash_text) else {
            tracing::warn!(user = %username, "Stored password hash is unparseable");
            return Ok(false);
        };
        let verified = verify_password(password, &parsed).unwrap_or(false);
        Ok(exists && verified)
    }

    /// Whether a user exists.
    pub async fn exists(&self, username: &str) -> Result<bool, DbError> {
        let found = sqlx::query_scalar::<_, i64>("SELECT 1 FROM users WHERE user_id = ?")
            .bind(username)
            .fetch_optional(self.pool)
            .await?;
        Ok(found.is_some())
    }
}

#[cfg(test)]
mod tests {
    use crate::db::{Database, DbError};

    #[tokio::test]
    async fn register_then_authenticate() {
        let db = Database::new(":memory:").await.unwrap();
        db.users().register("alice", "correct horse").await.unwrap();

        assert!(db.users().authenticate("alice", "correct horse").await.unwrap());
        assert!(!db.users().authenticate("alice", "wrong").await.unwrap());
        assert!(!db.users().authenticate("bob", "correct horse").await.unwrap());
        assert!(db.users().exists("alice").await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_registration_is_reported() {
        let db = Database::new(":memory:").await.unwrap();
        db.users().register("alice", "password1").await.unwrap();
        let err = db.users().register("alice", "password2").await.unwrap_err();
        assert!(matches!(err, DbError::UserExists(name) if name == "alice"));
    }
}
