//! User operations for PostgreSQL database.

use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use super::{SqlResult, log_error};

/// A row of `users`.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct UserRecord {
    pub id: Uuid,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Creates a user.
///
/// # Arguments
/// * `tx` - PostgreSQL transaction
/// * `email` - Login email, unique case-insensitively
/// * `first_name` / `last_name` - Optional display names
///
/// # Returns
/// * `Ok(UserRecord)` - The stored user
/// * `Err(DataStoreError::Constraint("users_unique_email"))` - Email taken
pub async fn create(
    tx: &mut Transaction<'_, Postgres>,
    email: &str,
    first_name: Option<&str>,
    last_name: Option<&str>,
) -> SqlResult<UserRecord> {
    sqlx::query_as::<_, UserRecord>(
        r#"
        INSERT INTO users (id, email, first_name, last_name)
        VALUES ($1, $2, $3, $4)
        RETURNING id, email, first_name, last_name, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(email)
    .bind(first_name)
    .bind(last_name)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| log_error("creating user", e))
}

/// Retrieves a live user by id.
pub async fn get(tx: &mut Transaction<'_, Postgres>, id: Uuid) -> SqlResult<UserRecord> {
    sqlx::query_as::<_, UserRecord>(
        r#"
        SELECT id, email, first_name, last_name, created_at
        FROM users
        WHERE id = $1 AND (deleted_at IS NULL OR deleted_at > now())
        "#,
    )
    .bind(id)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| log_error("getting user", e))
}

/// Retrieves a live user by email, ignoring case.
pub async fn get_by_email(
    tx: &mut Transaction<'_, Postgres>,
    email: &str,
) -> SqlResult<UserRecord> {
    sqlx::query_as::<_, UserRecord>(
        r#"
        SELECT id, email, first_name, last_name, created_at
        FROM users
        WHERE lower(email) = lower($1) AND (deleted_at IS NULL OR deleted_at > now())
        "#,
    )
    .bind(email)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| log_error("getting user by email", e))
}
