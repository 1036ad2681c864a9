//! OAuth connection operations for PostgreSQL database.
//!
//! A connection moves `pending -> active` when its provider approves it and
//! ends `revoked` when deleted. Credentials hold the encrypted provider
//! tokens of an active connection; grants say who may use, manage or revoke
//! it.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use super::{SqlResult, log_error};
use crate::DataStoreError;
use crate::pagination::Pagination;

/// A row of `oauth_connections`.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct ConnectionRecord {
    pub id: Uuid,
    pub vessel_id: Uuid,
    pub charter_id: Uuid,
    #[sqlx(rename = "type")]
    pub connection_type: String,
    pub provider: String,
    pub status: String,
    pub display_name: Option<String>,
    pub created_by_user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_validated_at: Option<DateTime<Utc>>,
    pub scopes: Value,
    pub provider_account_id: Option<String>,
}

/// Column values of a pending connection.
#[derive(Debug, Clone, PartialEq)]
pub struct NewConnection<'a> {
    pub vessel_id: Uuid,
    pub charter_id: Uuid,
    pub connection_type: &'a str,
    pub provider: &'a str,
    pub display_name: Option<&'a str>,
    pub created_by_user_id: Uuid,
    pub scopes: Value,
}

/// List filters; each present filter must match.
#[derive(Debug, Clone, Default)]
pub struct ConnectionFilter<'a> {
    pub provider: Option<&'a str>,
    pub connection_type: Option<&'a str>,
    pub status: Option<&'a str>,
}

/// Column values of a stored credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCredential {
    pub connection_id: Uuid,
    pub credential_kind: String,
    pub access_token_encrypted: String,
    pub refresh_token_encrypted: Option<String>,
    pub token_type: String,
    pub expires_in: Option<i64>,
    pub installation_id: Option<i64>,
    pub account_login: Option<String>,
    pub account_type: Option<String>,
}

const COLUMNS: &str = "id, vessel_id, charter_id, type, provider, status, display_name, \
                       created_by_user_id, created_at, updated_at, last_validated_at, scopes, \
                       provider_account_id";

/// Removes pending connections a new connection attempt replaces.
///
/// # Returns
/// * `Ok(n)` - Number of pending connections removed
pub async fn delete_pending(
    tx: &mut Transaction<'_, Postgres>,
    vessel_id: Uuid,
    charter_id: Uuid,
    provider: &str,
    connection_type: &str,
) -> SqlResult<u64> {
    let result = sqlx::query(
        r#"
        DELETE FROM oauth_connections
        WHERE vessel_id = $1 AND charter_id = $2 AND provider = $3 AND type = $4
          AND status = 'pending'
          AND NOT EXISTS (SELECT 1 FROM oauth_credentials c WHERE c.connection_id = oauth_connections.id)
          AND NOT EXISTS (SELECT 1 FROM oauth_connection_grants g WHERE g.connection_id = oauth_connections.id)
        "#,
    )
    .bind(vessel_id)
    .bind(charter_id)
    .bind(provider)
    .bind(connection_type)
    .execute(&mut **tx)
    .await
    .map_err(|e| log_error("deleting pending connections", e))?;
    Ok(result.rows_affected())
}

/// Stores a pending connection.
pub async fn create(
    tx: &mut Transaction<'_, Postgres>,
    connection: &NewConnection<'_>,
) -> SqlResult<ConnectionRecord> {
    sqlx::query_as::<_, ConnectionRecord>(&format!(
        r#"
        INSERT INTO oauth_connections (
            id, vessel_id, charter_id, type, provider, status, display_name,
            created_by_user_id, scopes
        )
        VALUES ($1, $2, $3, $4, $5, 'pending', $6, $7, $8)
        RETURNING {COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(connection.vessel_id)
    .bind(connection.charter_id)
    .bind(connection.connection_type)
    .bind(connection.provider)
    .bind(connection.display_name)
    .bind(connection.created_by_user_id)
    .bind(&connection.scopes)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| log_error("creating connection", e))
}

/// Retrieves a live connection of a charter.
pub async fn get(
    tx: &mut Transaction<'_, Postgres>,
    vessel_id: Uuid,
    charter_id: Uuid,
    id: Uuid,
) -> SqlResult<ConnectionRecord> {
    sqlx::query_as::<_, ConnectionRecord>(&format!(
        r#"
        SELECT {COLUMNS}
        FROM oauth_connections
        WHERE vessel_id = $1 AND charter_id = $2 AND id = $3
          AND (deleted_at IS NULL OR deleted_at > now())
        "#
    ))
    .bind(vessel_id)
    .bind(charter_id)
    .bind(id)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| log_error("getting connection", e))
}

/// Lists the live connections of a charter.
pub async fn list(
    tx: &mut Transaction<'_, Postgres>,
    vessel_id: Uuid,
    charter_id: Uuid,
    filter: &ConnectionFilter<'_>,
    pagination: &Pagination,
) -> SqlResult<(Vec<ConnectionRecord>, i64)> {
    const WHERE: &str = r#"
        WHERE vessel_id = $1 AND charter_id = $2
          AND (deleted_at IS NULL OR deleted_at > now())
          AND ($3::text IS NULL OR provider = $3)
          AND ($4::text IS NULL OR type = $4)
          AND ($5::text IS NULL OR status = $5)
    "#;

    let records = sqlx::query_as::<_, ConnectionRecord>(&format!(
        "SELECT {COLUMNS} FROM oauth_connections {WHERE} ORDER BY created_at, id OFFSET $6 LIMIT $7"
    ))
    .bind(vessel_id)
    .bind(charter_id)
    .bind(filter.provider)
    .bind(filter.connection_type)
    .bind(filter.status)
    .bind(pagination.offset())
    .bind(pagination.limit())
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| log_error("listing connections", e))?;

    let total = sqlx::query_scalar::<_, i64>(&format!(
        "SELECT COUNT(*) FROM oauth_connections {WHERE}"
    ))
    .bind(vessel_id)
    .bind(charter_id)
    .bind(filter.provider)
    .bind(filter.connection_type)
    .bind(filter.status)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| log_error("counting connections", e))?;

    Ok((records, total))
}

/// Marks a pending connection active after provider approval.
pub async fn activate(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    provider_account_id: &str,
    display_name: Option<&str>,
) -> SqlResult<ConnectionRecord> {
    sqlx::query_as::<_, ConnectionRecord>(&format!(
        r#"
        UPDATE oauth_connections
        SET status = 'active',
            provider_account_id = $2,
            display_name = COALESCE($3, display_name),
            last_validated_at = now(),
            updated_at = now()
        WHERE id = $1 AND status = 'pending'
          AND (deleted_at IS NULL OR deleted_at > now())
        RETURNING {COLUMNS}
        "#
    ))
    .bind(id)
    .bind(provider_account_id)
    .bind(display_name)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| log_error("activating connection", e))
}

/// Marks a still pending connection as failed.
///
/// A connection another approval already activated is left alone.
///
/// # Returns
/// * `Ok(true)` - The connection moved `pending -> error`
/// * `Ok(false)` - The connection was no longer pending
pub async fn mark_error(tx: &mut Transaction<'_, Postgres>, id: Uuid) -> SqlResult<bool> {
    let result = sqlx::query(
        r#"
        UPDATE oauth_connections
        SET status = 'error', updated_at = now()
        WHERE id = $1 AND status = 'pending'
        "#,
    )
    .bind(id)
    .execute(&mut **tx)
    .await
    .map_err(|e| log_error("marking connection failed", e))?;
    Ok(result.rows_affected() == 1)
}

/// Revokes and soft-deletes a live connection.
pub async fn revoke(
    tx: &mut Transaction<'_, Postgres>,
    vessel_id: Uuid,
    charter_id: Uuid,
    id: Uuid,
) -> SqlResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE oauth_connections
        SET status = 'revoked', deleted_at = now(), updated_at = now()
        WHERE vessel_id = $1 AND charter_id = $2 AND id = $3
          AND (deleted_at IS NULL OR deleted_at > now())
        "#,
    )
    .bind(vessel_id)
    .bind(charter_id)
    .bind(id)
    .execute(&mut **tx)
    .await
    .map_err(|e| log_error("revoking connection", e))?;
    if result.rows_affected() == 0 {
        return Err(DataStoreError::NotFound);
    }
    Ok(())
}

/// Replaces every stored credential of a connection with `credential`.
pub async fn replace_credentials(
    tx: &mut Transaction<'_, Postgres>,
    credential: &NewCredential,
) -> SqlResult<Uuid> {
    sqlx::query("DELETE FROM oauth_credentials WHERE connection_id = $1")
        .bind(credential.connection_id)
        .execute(&mut **tx)
        .await
        .map_err(|e| log_error("deleting credentials", e))?;

    sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO oauth_credentials (
            id, connection_id, credential_kind, access_token_encrypted, refresh_token_encrypted,
            token_type, expires_in, installation_id, account_login, account_type
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(credential.connection_id)
    .bind(&credential.credential_kind)
    .bind(&credential.access_token_encrypted)
    .bind(&credential.refresh_token_encrypted)
    .bind(&credential.token_type)
    .bind(credential.expires_in)
    .bind(credential.installation_id)
    .bind(&credential.account_login)
    .bind(&credential.account_type)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| log_error("storing credential", e))
}

/// Grants `permission` on a connection; granting twice is a no-op.
pub async fn grant(
    tx: &mut Transaction<'_, Postgres>,
    connection_id: Uuid,
    principal_type: &str,
    principal_id: &str,
    permission: &str,
) -> SqlResult<()> {
    sqlx::query(
        r#"
        INSERT INTO oauth_connection_grants (id, connection_id, principal_type, principal_id, permission)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT ON CONSTRAINT oauth_connection_grants_unique_grant DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(connection_id)
    .bind(principal_type)
    .bind(principal_id)
    .bind(permission)
    .execute(&mut **tx)
    .await
    .map_err(|e| log_error("granting connection permission", e))?;
    Ok(())
}
