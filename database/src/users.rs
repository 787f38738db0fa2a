use async_trait::async_trait;
use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite};
use task_core::{
    error::Result,
    models::{NewUser, ProfileChanges, User},
    repository::UserRepository,
};
use uuid::Uuid;

use crate::common::{row_to_user, sqlx_error_to_core_error};
use crate::sqlite::SqliteStore;

const USER_COLUMNS: &str =
    "id, email, password_hash, display_name, avatar_url, created_at, updated_at";

#[async_trait]
impl UserRepository for SqliteStore {
    async fn create_user(&self, user: NewUser) -> Result<User> {
        let now = Utc::now();
        let id = Uuid::new_v4();

        // the case-folded unique index turns races into Conflict
        sqlx::query(
            "INSERT INTO users (id, email, password_hash, display_name, avatar_url, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.display_name)
        .bind(&user.avatar_url)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await
        .map_err(sqlx_error_to_core_error)?;

        Ok(User {
            id,
            email: user.email,
            password_hash: user.password_hash,
            display_name: user.display_name,
            avatar_url: user.avatar_url,
            created_at: now,
            updated_at: now,
        })
    }

    async fn get_user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(self.pool())
            .await
            .map_err(sqlx_error_to_core_error)?;
        row.as_ref().map(row_to_user).transpose()
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE lower(email) = lower(?)"
        ))
        .bind(email.trim())
        .fetch_optional(self.pool())
        .await
        .map_err(sqlx_error_to_core_error)?;
        row.as_ref().map(row_to_user).transpose()
    }

    async fn update_profile(&self, id: Uuid, changes: ProfileChanges) -> Result<Option<User>> {
        if changes.email.is_none()
            && changes.display_name.is_none()
            && changes.avatar_url.is_none()
        {
            return self.get_user_by_id(id).await;
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE users SET updated_at = ");
        qb.push_bind(Utc::now());

        if let Some(email) = &changes.email {
            qb.push(", email = ");
            qb.push_bind(email.trim().to_string());
        }
        if let Some(display_name) = &changes.display_name {
            qb.push(", display_name = ");
            qb.push_bind(display_name.trim().to_string());
        }
        if let Some(avatar_url) = &changes.avatar_url {
            qb.push(", avatar_url = ");
            qb.push_bind(avatar_url.clone());
        }

        qb.push(" WHERE id = ");
        qb.push_bind(id.to_string());
        qb.push(format!(" RETURNING {USER_COLUMNS}"));

        let row = qb
            .build()
            .fetch_optional(self.pool())
            .await
            .map_err(sqlx_error_to_core_error)?;
        row.as_ref().map(row_to_user).transpose()
    }
}
