//! Vessel operations for PostgreSQL database.

use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use super::{SqlResult, log_error};
use crate::pagination::Pagination;

/// A row of `vessels`.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct VesselRecord {
    pub id: Uuid,
    pub name: String,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Creates a vessel owned by `user_id`.
pub async fn create(
    tx: &mut Transaction<'_, Postgres>,
    name: &str,
    user_id: Uuid,
) -> SqlResult<VesselRecord> {
    sqlx::query_as::<_, VesselRecord>(
        r#"
        INSERT INTO vessels (id, name, user_id)
        VALUES ($1, $2, $3)
        RETURNING id, name, user_id, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(user_id)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| log_error("creating vessel", e))
}

/// Retrieves a live vessel.
pub async fn get(tx: &mut Transaction<'_, Postgres>, id: Uuid) -> SqlResult<VesselRecord> {
    sqlx::query_as::<_, VesselRecord>(
        r#"
        SELECT id, name, user_id, created_at
        FROM vessels
        WHERE id = $1 AND (deleted_at IS NULL OR deleted_at > now())
        "#,
    )
    .bind(id)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| log_error("getting vessel", e))
}

/// Lists the live vessels among `ids`.
///
/// # Returns
/// * `Ok((records, total))` - One page of vessels and the total match count
pub async fn list(
    tx: &mut Transaction<'_, Postgres>,
    ids: &[Uuid],
    pagination: &Pagination,
) -> SqlResult<(Vec<VesselRecord>, i64)> {
    let records = sqlx::query_as::<_, VesselRecord>(
        r#"
        SELECT id, name, user_id, created_at
        FROM vessels
        WHERE id = ANY($1) AND (deleted_at IS NULL OR deleted_at > now())
        ORDER BY created_at, id
        OFFSET $2 LIMIT $3
        "#,
    )
    .bind(ids)
    .bind(pagination.offset())
    .bind(pagination.limit())
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| log_error("listing vessels", e))?;

    let total = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*)
        FROM vessels
        WHERE id = ANY($1) AND (deleted_at IS NULL OR deleted_at > now())
        "#,
    )
    .bind(ids)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| log_error("counting vessels", e))?;

    Ok((records, total))
}

/// Renames a live vessel.
pub async fn update_name(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    name: &str,
) -> SqlResult<VesselRecord> {
    sqlx::query_as::<_, VesselRecord>(
        r#"
        UPDATE vessels
        SET name = $2
        WHERE id = $1 AND (deleted_at IS NULL OR deleted_at > now())
        RETURNING id, name, user_id, created_at
        "#,
    )
    .bind(id)
    .bind(name)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| log_error("updating vessel", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DataStoreError;
    use crate::sql::tests::{seed, setup_test_db};

    #[tokio::test]
    async fn list_only_returns_requested_ids() {
        let Some(pool) = setup_test_db().await else {
            return;
        };
        let first = seed(&pool, "one@example.com").await;
        let _second = seed(&pool, "two@example.com").await;

        let mut tx = pool.begin().await.unwrap();
        let (vessels, total) = list(&mut tx, &[first.vessel_id], &Pagination::default())
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(vessels[0].id, first.vessel_id);
    }

    #[tokio::test]
    async fn rename() {
        let Some(pool) = setup_test_db().await else {
            return;
        };
        let fixture = seed(&pool, "rename@example.com").await;
        let mut tx = pool.begin().await.unwrap();
        let renamed = update_name(&mut tx, fixture.vessel_id, "Resolution")
            .await
            .unwrap();
        assert_eq!(renamed.name, "Resolution");
        assert_eq!(
            update_name(&mut tx, Uuid::new_v4(), "Ghost").await.unwrap_err(),
            DataStoreError::NotFound
        );
    }
}
