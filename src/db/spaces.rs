//! Space and message repository.

use super::DbError;
use crate::authz::Permissions;
use crate::config::PermissionModel;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

/// A space row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpaceRecord {
    pub space_id: i64,
    pub name: String,
    pub owner: String,
}

/// A message row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub space_id: i64,
    pub msg_id: i64,
    pub author: String,
    pub time: DateTime<Utc>,
    pub text: String,
}

/// Repository for spaces and their messages.
pub struct SpaceRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> SpaceRepository<'a> {
    /// Create a new space repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a space and grant its owner full control, atomically.
    pub async fn create(
        &self,
        name: &str,
        owner: &str,
        model: PermissionModel,
    ) -> Result<SpaceRecord, DbError> {
        let mut tx = self.pool.begin().await?;

        let space_id = sqlx::query("INSERT INTO spaces (name, owner) VALUES (?, ?)")
            .bind(name)
            .bind(owner)
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();

        match model {
            PermissionModel::Acl => {
                sqlx::query("INSERT INTO permissions (space_id, user_id, perms) VALUES (?, ?, ?)")
                    .bind(space_id)
                    .bind(owner)
                    .bind(Permissions::ALL.to_string())
                    .execute(&mut *tx)
                    .await?;
            }
            PermissionModel::Roles => {
                sqlx::query(
                    "INSERT INTO user_roles (space_id, user_id, role_id) VALUES (?, ?, 'owner')",
                )
                .bind(space_id)
                .bind(owner)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;

        Ok(SpaceRecord {
            space_id,
            name: name.to_string(),
            owner: owner.to_string(),
        })
    }

    /// Look up a space.
    pub async fn find(&self, space_id: i64) -> Result<Option<SpaceRecord>, DbError> {
        let row = sqlx::query_as::<_, (i64, String, String)>(
            "SELECT space_id, name, owner FROM spaces WHERE space_id = ?",
        )
        .bind(space_id)
        .fetch_optional(self.pool)
        .await?;

        Ok(row.map(|(space_id, name, owner)| SpaceRecord {
            space_id,
            name,
            owner,
        }))
    }

    /// Append a message to a space.
    pub async fn post_message(
        &self,
        space_id: i64,
        author: &str,
        text: &str,
        time: DateTime<Utc>,
    ) -> Result<MessageRecord, DbError> {
        let result = sqlx::query(
            r#"
            INSERT INTO messages (space_id, author, msg_time, msg_text)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(space_id)
        .bind(author)
        .bind(time.timestamp_millis())
        .bind(text)
        .execute(self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_foreign_key_violation()
            {
                return DbError::SpaceNotFound(space_id);
            }
            DbError::from(e)
        })?;

        Ok(MessageRecord {
            space_id,
            msg_id: result.last_insert_rowid(),
            author: author.to_string(),
            time,
            text: text.to_string(),
        })
    }

    /// Read one message.
    pub async fn read_message(
        &self,
        space_id: i64,
        msg_id: i64,
    ) -> Result<Option<MessageRecord>, DbError> {
        let row = sqlx::query_as::<_, (String, i64, String)>(
            r#"
            SELECT author, msg_time, msg_text
            FROM messages
            WHERE space_id = ? AND msg_id = ?
            "#,
        )
        .bind(space_id)
        .bind(msg_id)
        .fetch_optional(self.pool)
        .await?;

        row.map(|(author, time, text)| {
            let time = DateTime::from_timestamp_millis(time)
                .ok_or_else(|| DbError::Corrupt(format!("message time {time}")))?;
            Ok(MessageRecord {
                space_id,
                msg_id,
                author,
                time,
                text,
            })
        })
        .transpose()
    }

    /// Message ids posted at or after `since`, oldest first.
    pub async fn list_messages(
        &self,
        space_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<i64>, DbError> {
        let ids = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT msg_id FROM messages
            WHERE space_id = ? AND msg_time >= ?
            ORDER BY msg_time, msg_id
            "#,
        )
        .bind(space_id)
        .bind(since.timestamp_millis())
        .fetch_all(self.pool)
        .await?;
        Ok(ids)
    }

    /// Delete a message. Returns whether a row was removed.
    pub async fn delete_message(&self, space_id: i64, msg_id: i64) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM messages WHERE space_id = ? AND msg_id = ?")
            .bind(space_id)
            .bind(msg_id)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
