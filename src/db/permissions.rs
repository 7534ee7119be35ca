//! ACL and role repository.
//!
//! Both models key on `(space_id, user_id)` with one row per pair; a re-grant
//! replaces the previous row.

use super::DbError;
use crate::authz::{Permissions, Role};
use crate::config::PermissionModel;
use sqlx::SqlitePool;

/// Repository for per-space grants.
pub struct PermissionRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> PermissionRepository<'a> {
    /// Create a new permission repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Store a bitstring ACL entry.
    pub async fn grant(
        &self,
        space_id: i64,
        user_id: &str,
        perms: Permissions,
    ) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO permissions (space_id, user_id, perms)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(space_id)
        .bind(user_id)
        .bind(perms.to_string())
        .execute(self.pool)
        .await
        .map_err(|e| foreign_key_to_space(e, space_id))?;
        Ok(())
    }

    /// Assign a role.
    pub async fn assign_role(
        &self,
        space_id: i64,
        user_id: &str,
        role: Role,
    ) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO user_roles (space_id, user_id, role_id)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(space_id)
        .bind(user_id)
        .bind(role.as_str())
        .execute(self.pool)
        .await
        .map_err(|e| foreign_key_to_space(e, space_id))?;
        Ok(())
    }

    /// The stored ACL entry, if any.
    pub async fn find_acl(
        &self,
        space_id: i64,
        user_id: &str,
    ) -> Result<Option<Permissions>, DbError> {
        let perms = sqlx::query_scalar::<_, String>(
            "SELECT perms FROM permissions WHERE space_id = ? AND user_id = ?",
        )
        .bind(space_id)
        .bind(user_id)
        .fetch_optional(self.pool)
        .await?;

        perms
            .map(|p| p.parse().map_err(|_| DbError::Corrupt(format!("perms {p:?}"))))
            .transpose()
    }

    /// The assigned role, if any.
    pub async fn find_role(&self, space_id: i64, user_id: &str) -> Result<Option<Role>, DbError> {
        let role = sqlx::query_scalar::<_, String>(
            "SELECT role_id FROM user_roles WHERE space_id = ? AND user_id = ?",
        )
        .bind(space_id)
        .bind(user_id)
        .fetch_optional(self.pool)
        .await?;

        role.map(|r| r.parse().map_err(|_| DbError::UnknownRole(r)))
            .transpose()
    }

    /// Effective permissions of `user_id` on `space_id` under `model`.
    ///
    /// No row means no permissions.
    pub async fn lookup(
        &self,
        model: PermissionModel,
        space_id: i64,
        user_id: &str,
    ) -> Result<Permissions, DbError> {
        let perms = match model {
            PermissionModel::Acl => self.find_acl(space_id, user_id).await?,
            PermissionModel::Roles => {
                // Role bits live in the seeded table so an operator can inspect them.
                let perms = sqlx::query_scalar::<_, String>(
                    r#"
                    SELECT rp.perms
                    FROM user_roles ur
                    JOIN role_permissions rp ON rp.role_id = ur.role_id
                    WHERE ur.space_id = ? AND ur.user_id = ?
                    "#,
                )
                .bind(space_id)
                .bind(user_id)
                .fetch_optional(self.pool)
                .await?;
                perms
                    .map(|p| p.parse().map_err(|_| DbError::Corrupt(format!("role perms {p:?}"))))
                    .transpose()?
            }
        };
        Ok(perms.unwrap_or_default())
    }
}

fn foreign_key_to_space(e: sqlx::Error, space_id: i64) -> DbError {
    if let sqlx::Error::Database(ref db_err) = e
        && db_err.is_foreign_key_violation()
    {
        return DbError::SpaceNotFound(space_id);
    }
    DbError::from(e)
}
