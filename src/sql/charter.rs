//! Charter operations for PostgreSQL database.

use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use super::{SqlResult, log_error};
use crate::pagination::Pagination;

/// A row of `charters`.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct CharterRecord {
    pub id: Uuid,
    pub vessel_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Creates a charter.
///
/// # Arguments
/// * `tx` - PostgreSQL transaction
/// * `vessel_id` - The owning vessel
/// * `name` - Unique among the vessel's live charters, ignoring case
/// * `description` - Optional free text
/// * `user_id` - The creating user
///
/// # Returns
/// * `Ok(CharterRecord)` - The stored charter
/// * `Err(DataStoreError::Constraint("charters_unique_name"))` - Name taken
pub async fn create(
    tx: &mut Transaction<'_, Postgres>,
    vessel_id: Uuid,
    name: &str,
    description: Option<&str>,
    user_id: Uuid,
) -> SqlResult<CharterRecord> {
    sqlx::query_as::<_, CharterRecord>(
        r#"
        INSERT INTO charters (id, vessel_id, name, description, user_id)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id, vessel_id, name, description, user_id, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(vessel_id)
    .bind(name)
    .bind(description)
    .bind(user_id)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| log_error("creating charter", e))
}

/// Retrieves a live charter of a vessel.
pub async fn get(
    tx: &mut Transaction<'_, Postgres>,
    vessel_id: Uuid,
    id: Uuid,
) -> SqlResult<CharterRecord> {
    sqlx::query_as::<_, CharterRecord>(
        r#"
        SELECT id, vessel_id, name, description, user_id, created_at
        FROM charters
        WHERE vessel_id = $1 AND id = $2 AND (deleted_at IS NULL OR deleted_at > now())
        "#,
    )
    .bind(vessel_id)
    .bind(id)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| log_error("getting charter", e))
}

/// Lists the live charters of a vessel.
///
/// When `only` is given, the list is restricted to those charter ids.
pub async fn list(
    tx: &mut Transaction<'_, Postgres>,
    vessel_id: Uuid,
    only: Option<&[Uuid]>,
    pagination: &Pagination,
) -> SqlResult<(Vec<CharterRecord>, i64)> {
    let records = sqlx::query_as::<_, CharterRecord>(
        r#"
        SELECT id, vessel_id, name, description, user_id, created_at
        FROM charters
        WHERE vessel_id = $1 AND (deleted_at IS NULL OR deleted_at > now())
          AND ($2::uuid[] IS NULL OR id = ANY($2))
        ORDER BY created_at, id
        OFFSET $3 LIMIT $4
        "#,
    )
    .bind(vessel_id)
    .bind(only)
    .bind(pagination.offset())
    .bind(pagination.limit())
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| log_error("listing charters", e))?;

    let total = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*)
        FROM charters
        WHERE vessel_id = $1 AND (deleted_at IS NULL OR deleted_at > now())
          AND ($2::uuid[] IS NULL OR id = ANY($2))
        "#,
    )
    .bind(vessel_id)
    .bind(only)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| log_error("counting charters", e))?;

    Ok((records, total))
}

/// Updates the given fields of a live charter; `None` leaves a field as is.
pub async fn update(
    tx: &mut Transaction<'_, Postgres>,
    vessel_id: Uuid,
    id: Uuid,
    name: Option<&str>,
    description: Option<&str>,
) -> SqlResult<CharterRecord> {
    sqlx::query_as::<_, CharterRecord>(
        r#"
        UPDATE charters
        SET name = COALESCE($3, name), description = COALESCE($4, description)
        WHERE vessel_id = $1 AND id = $2 AND (deleted_at IS NULL OR deleted_at > now())
        RETURNING id, vessel_id, name, description, user_id, created_at
        "#,
    )
    .bind(vessel_id)
    .bind(id)
    .bind(name)
    .bind(description)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| log_error("updating charter", e))
}

/// Soft-deletes a live charter.
///
/// # Returns
/// * `Ok(())` - The charter is now deleted
/// * `Err(DataStoreError::NotFound)` - No live charter matched
pub async fn soft_delete(
    tx: &mut Transaction<'_, Postgres>,
    vessel_id: Uuid,
    id: Uuid,
) -> SqlResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE charters
        SET deleted_at = now()
        WHERE vessel_id = $1 AND id = $2 AND (deleted_at IS NULL OR deleted_at > now())
        "#,
    )
    .bind(vessel_id)
    .bind(id)
    .execute(&mut **tx)
    .await
    .map_err(|e| log_error("deleting charter", e))?;
    if result.rows_affected() == 0 {
        return Err(crate::DataStoreError::NotFound);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DataStoreError;
    use crate::sql::tests::{seed, setup_test_db};

    #[tokio::test]
    async fn duplicate_names_conflict_until_deleted() {
        let Some(pool) = setup_test_db().await else {
            return;
        };
        let fixture = seed(&pool, "charter@example.com").await;
        let mut tx = pool.begin().await.unwrap();
        let err = create(&mut tx, fixture.vessel_id, "SURVEY", None, fixture.user_id)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            DataStoreError::Constraint("charters_unique_name".to_string())
        );
        tx.rollback().await.unwrap();

        let mut tx = pool.begin().await.unwrap();
        soft_delete(&mut tx, fixture.vessel_id, fixture.charter_id)
            .await
            .unwrap();
        create(&mut tx, fixture.vessel_id, "Survey", None, fixture.user_id)
            .await
            .unwrap();
        assert_eq!(
            get(&mut tx, fixture.vessel_id, fixture.charter_id)
                .await
                .unwrap_err(),
            DataStoreError::NotFound
        );
    }

    #[tokio::test]
    async fn list_restricts_to_scoped_ids() {
        let Some(pool) = setup_test_db().await else {
            return;
        };
        let fixture = seed(&pool, "scoped@example.com").await;
        let mut tx = pool.begin().await.unwrap();
        let other = create(&mut tx, fixture.vessel_id, "Salvage", Some("wrecks"), fixture.user_id)
            .await
            .unwrap();

        let (all, total) = list(&mut tx, fixture.vessel_id, None, &Pagination::default())
            .await
            .unwrap();
        assert_eq!((all.len(), total), (2, 2));

        let only = [other.id];
        let (scoped, total) = list(
            &mut tx,
            fixture.vessel_id,
            Some(&only),
            &Pagination::default(),
        )
        .await
        .unwrap();
        assert_eq!(total, 1);
        assert_eq!(scoped[0].description.as_deref(), Some("wrecks"));
    }

    #[tokio::test]
    async fn charters_are_scoped_to_their_vessel() {
        let Some(pool) = setup_test_db().await else {
            return;
        };
        let first = seed(&pool, "first@example.com").await;
        let second = seed(&pool, "second@example.com").await;
        let mut tx = pool.begin().await.unwrap();
        assert!(get(&mut tx, second.vessel_id, first.charter_id).await.is_err());
        let updated = update(&mut tx, first.vessel_id, first.charter_id, None, Some("maps"))
            .await
            .unwrap();
        assert_eq!(updated.name, "Survey");
        assert_eq!(updated.description.as_deref(), Some("maps"));
    }
}
