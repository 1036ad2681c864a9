//! Session operations for PostgreSQL database.
//!
//! A session stands for one issued refresh token. Only the peppered hash of
//! the token is stored. A session is live while it is neither revoked nor
//! expired.

use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use super::{SqlResult, log_error};

/// A row of `sessions`.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct SessionRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub device_name: Option<String>,
    pub refresh_token_hash: String,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Fields of a session about to be recorded.
#[derive(Debug, Clone)]
pub struct NewSession<'a> {
    pub user_id: Uuid,
    pub refresh_token_hash: &'a str,
    pub expires_at: DateTime<Utc>,
    pub device_name: Option<&'a str>,
    pub user_agent: Option<&'a str>,
    pub ip_address: Option<&'a str>,
}

const COLUMNS: &str = "id, user_id, device_name, refresh_token_hash, user_agent, ip_address, \
                       issued_at, expires_at, revoked_at, last_used_at";

/// Records a session.
pub async fn create(
    tx: &mut Transaction<'_, Postgres>,
    session: &NewSession<'_>,
) -> SqlResult<SessionRecord> {
    sqlx::query_as::<_, SessionRecord>(&format!(
        r#"
        INSERT INTO sessions (id, user_id, refresh_token_hash, expires_at, device_name, user_agent, ip_address)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING {COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(session.user_id)
    .bind(session.refresh_token_hash)
    .bind(session.expires_at)
    .bind(session.device_name)
    .bind(session.user_agent)
    .bind(session.ip_address)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| log_error("creating session", e))
}

/// Finds the live session of a user holding `refresh_token_hash`.
///
/// # Returns
/// * `Ok(SessionRecord)` - The session is neither revoked nor expired
/// * `Err(DataStoreError::NotFound)` - Unknown, revoked or expired
pub async fn get_live(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    refresh_token_hash: &str,
) -> SqlResult<SessionRecord> {
    sqlx::query_as::<_, SessionRecord>(&format!(
        r#"
        SELECT {COLUMNS}
        FROM sessions
        WHERE user_id = $1 AND refresh_token_hash = $2
          AND revoked_at IS NULL AND expires_at > now()
        "#
    ))
    .bind(user_id)
    .bind(refresh_token_hash)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| log_error("getting live session", e))
}

/// Replaces the token hash of a live session.
pub async fn rotate(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    refresh_token_hash: &str,
    expires_at: DateTime<Utc>,
) -> SqlResult<SessionRecord> {
    sqlx::query_as::<_, SessionRecord>(&format!(
        r#"
        UPDATE sessions
        SET refresh_token_hash = $2, expires_at = $3, last_used_at = now()
        WHERE id = $1 AND revoked_at IS NULL AND expires_at > now()
        RETURNING {COLUMNS}
        "#
    ))
    .bind(id)
    .bind(refresh_token_hash)
    .bind(expires_at)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| log_error("rotating session", e))
}

/// Stamps `last_used_at`.
pub async fn touch(tx: &mut Transaction<'_, Postgres>, id: Uuid) -> SqlResult<()> {
    sqlx::query("UPDATE sessions SET last_used_at = now() WHERE id = $1")
        .bind(id)
        .execute(&mut **tx)
        .await
        .map_err(|e| log_error("touching session", e))?;
    Ok(())
}

/// Revokes every live session of a user and returns how many were revoked.
pub async fn revoke_all(tx: &mut Transaction<'_, Postgres>, user_id: Uuid) -> SqlResult<u64> {
    let result = sqlx::query(
        r#"
        UPDATE sessions
        SET revoked_at = now()
        WHERE user_id = $1 AND revoked_at IS NULL
        "#,
    )
    .bind(user_id)
    .execute(&mut **tx)
    .await
    .map_err(|e| log_error("revoking sessions", e))?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DataStoreError;
    use crate::sql::tests::{seed, setup_test_db};
    use chrono::Duration;

    fn new_session(user_id: Uuid, hash: &str, expires_at: DateTime<Utc>) -> NewSession<'_> {
        NewSession {
            user_id,
            refresh_token_hash: hash,
            expires_at,
            device_name: None,
            user_agent: Some("galleyctl"),
            ip_address: None,
        }
    }

    #[tokio::test]
    async fn rotate_then_old_hash_is_gone() {
        let Some(pool) = setup_test_db().await else {
            return;
        };
        let fixture = seed(&pool, "session@example.com").await;
        let mut tx = pool.begin().await.unwrap();
        let expires = Utc::now() + Duration::days(1);
        let session = create(&mut tx, &new_session(fixture.user_id, "aa", expires))
            .await
            .unwrap();

        let rotated = rotate(&mut tx, session.id, "bb", expires).await.unwrap();
        assert_eq!(rotated.refresh_token_hash, "bb");
        assert!(rotated.last_used_at.is_some());
        assert_eq!(
            get_live(&mut tx, fixture.user_id, "aa").await.unwrap_err(),
            DataStoreError::NotFound
        );
        assert!(get_live(&mut tx, fixture.user_id, "bb").await.is_ok());
    }

    #[tokio::test]
    async fn expired_and_revoked_sessions_are_not_live() {
        let Some(pool) = setup_test_db().await else {
            return;
        };
        let fixture = seed(&pool, "revoke@example.com").await;
        let mut tx = pool.begin().await.unwrap();
        let past = Utc::now() - Duration::minutes(1);
        create(&mut tx, &new_session(fixture.user_id, "old", past))
            .await
            .unwrap();
        assert!(get_live(&mut tx, fixture.user_id, "old").await.is_err());

        let future = Utc::now() + Duration::days(1);
        create(&mut tx, &new_session(fixture.user_id, "live", future))
            .await
            .unwrap();
        assert_eq!(revoke_all(&mut tx, fixture.user_id).await.unwrap(), 2);
        assert!(get_live(&mut tx, fixture.user_id, "live").await.is_err());
    }

    #[tokio::test]
    async fn hash_belongs_to_its_user() {
        let Some(pool) = setup_test_db().await else {
            return;
        };
        let owner = seed(&pool, "owner@example.com").await;
        let other = seed(&pool, "other@example.com").await;
        let mut tx = pool.begin().await.unwrap();
        let future = Utc::now() + Duration::days(1);
        create(&mut tx, &new_session(owner.user_id, "mine", future))
            .await
            .unwrap();
        assert!(get_live(&mut tx, other.user_id, "mine").await.is_err());
    }
}
