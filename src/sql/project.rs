//! Project operations for PostgreSQL database.

use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use super::{SqlResult, log_error};
use crate::DataStoreError;
use crate::pagination::Pagination;

/// A row of `charter_projects`.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ProjectRecord {
    pub id: Uuid,
    pub vessel_id: Uuid,
    pub charter_id: Uuid,
    pub name: String,
    pub environment: String,
    pub purpose: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Updatable project fields; `None` leaves a field as is.
#[derive(Debug, Clone, Default)]
pub struct ProjectChanges<'a> {
    pub name: Option<&'a str>,
    pub environment: Option<&'a str>,
    pub purpose: Option<&'a str>,
}

/// Creates a project.
///
/// # Returns
/// * `Ok(ProjectRecord)` - The stored project
/// * `Err(DataStoreError::Constraint("charter_projects_unique_name"))` - A
///   live project of the charter already uses the name in that environment
pub async fn create(
    tx: &mut Transaction<'_, Postgres>,
    vessel_id: Uuid,
    charter_id: Uuid,
    name: &str,
    environment: &str,
    purpose: Option<&str>,
) -> SqlResult<ProjectRecord> {
    sqlx::query_as::<_, ProjectRecord>(
        r#"
        INSERT INTO charter_projects (id, vessel_id, charter_id, name, environment, purpose)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id, vessel_id, charter_id, name, environment, purpose, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(vessel_id)
    .bind(charter_id)
    .bind(name)
    .bind(environment)
    .bind(purpose)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| log_error("creating project", e))
}

/// Retrieves a live project.
pub async fn get(
    tx: &mut Transaction<'_, Postgres>,
    vessel_id: Uuid,
    charter_id: Uuid,
    id: Uuid,
) -> SqlResult<ProjectRecord> {
    sqlx::query_as::<_, ProjectRecord>(
        r#"
        SELECT id, vessel_id, charter_id, name, environment, purpose, created_at
        FROM charter_projects
        WHERE vessel_id = $1 AND charter_id = $2 AND id = $3
          AND (deleted_at IS NULL OR deleted_at > now())
        "#,
    )
    .bind(vessel_id)
    .bind(charter_id)
    .bind(id)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| log_error("getting project", e))
}

/// Lists the live projects of a charter.
pub async fn list(
    tx: &mut Transaction<'_, Postgres>,
    vessel_id: Uuid,
    charter_id: Uuid,
    pagination: &Pagination,
) -> SqlResult<(Vec<ProjectRecord>, i64)> {
    let records = sqlx::query_as::<_, ProjectRecord>(
        r#"
        SELECT id, vessel_id, charter_id, name, environment, purpose, created_at
        FROM charter_projects
        WHERE vessel_id = $1 AND charter_id = $2
          AND (deleted_at IS NULL OR deleted_at > now())
        ORDER BY created_at, id
        OFFSET $3 LIMIT $4
        "#,
    )
    .bind(vessel_id)
    .bind(charter_id)
    .bind(pagination.offset())
    .bind(pagination.limit())
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| log_error("listing projects", e))?;

    let total = count_live(tx, vessel_id, charter_id).await?;
    Ok((records, total))
}

/// Counts the live projects of a charter.
pub async fn count_live(
    tx: &mut Transaction<'_, Postgres>,
    vessel_id: Uuid,
    charter_id: Uuid,
) -> SqlResult<i64> {
    sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*)
        FROM charter_projects
        WHERE vessel_id = $1 AND charter_id = $2
          AND (deleted_at IS NULL OR deleted_at > now())
        "#,
    )
    .bind(vessel_id)
    .bind(charter_id)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| log_error("counting projects", e))
}

/// Updates a live project.
pub async fn update(
    tx: &mut Transaction<'_, Postgres>,
    vessel_id: Uuid,
    charter_id: Uuid,
    id: Uuid,
    changes: &ProjectChanges<'_>,
) -> SqlResult<ProjectRecord> {
    sqlx::query_as::<_, ProjectRecord>(
        r#"
        UPDATE charter_projects
        SET name = COALESCE($4, name),
            environment = COALESCE($5, environment),
            purpose = COALESCE($6, purpose)
        WHERE vessel_id = $1 AND charter_id = $2 AND id = $3
          AND (deleted_at IS NULL OR deleted_at > now())
        RETURNING id, vessel_id, charter_id, name, environment, purpose, created_at
        "#,
    )
    .bind(vessel_id)
    .bind(charter_id)
    .bind(id)
    .bind(changes.name)
    .bind(changes.environment)
    .bind(changes.purpose)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| log_error("updating project", e))
}

/// Soft-deletes a live project.
pub async fn soft_delete(
    tx: &mut Transaction<'_, Postgres>,
    vessel_id: Uuid,
    charter_id: Uuid,
    id: Uuid,
) -> SqlResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE charter_projects
        SET deleted_at = now()
        WHERE vessel_id = $1 AND charter_id = $2 AND id = $3
          AND (deleted_at IS NULL OR deleted_at > now())
        "#,
    )
    .bind(vessel_id)
    .bind(charter_id)
    .bind(id)
    .execute(&mut **tx)
    .await
    .map_err(|e| log_error("deleting project", e))?;
    if result.rows_affected() == 0 {
        return Err(DataStoreError::NotFound);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::tests::{seed, setup_test_db};

    #[tokio::test]
    async fn same_name_allowed_across_environments() {
        let Some(pool) = setup_test_db().await else {
            return;
        };
        let f = seed(&pool, "project@example.com").await;
        let mut tx = pool.begin().await.unwrap();
        create(&mut tx, f.vessel_id, f.charter_id, "website.com", "production", None)
            .await
            .unwrap();
        create(&mut tx, f.vessel_id, f.charter_id, "website.com", "staging", None)
            .await
            .unwrap();
        let err = create(&mut tx, f.vessel_id, f.charter_id, "Website.com", "staging", None)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            DataStoreError::Constraint("charter_projects_unique_name".to_string())
        );
    }

    #[tokio::test]
    async fn delete_hides_and_decrements_count() {
        let Some(pool) = setup_test_db().await else {
            return;
        };
        let f = seed(&pool, "count@example.com").await;
        let mut tx = pool.begin().await.unwrap();
        let project = create(&mut tx, f.vessel_id, f.charter_id, "api", "production", Some("web"))
            .await
            .unwrap();
        assert_eq!(count_live(&mut tx, f.vessel_id, f.charter_id).await.unwrap(), 1);

        soft_delete(&mut tx, f.vessel_id, f.charter_id, project.id)
            .await
            .unwrap();
        assert_eq!(count_live(&mut tx, f.vessel_id, f.charter_id).await.unwrap(), 0);
        assert_eq!(
            soft_delete(&mut tx, f.vessel_id, f.charter_id, project.id)
                .await
                .unwrap_err(),
            DataStoreError::NotFound
        );
    }

    #[tokio::test]
    async fn update_keeps_unset_fields() {
        let Some(pool) = setup_test_db().await else {
            return;
        };
        let f = seed(&pool, "patch@example.com").await;
        let mut tx = pool.begin().await.unwrap();
        let project = create(&mut tx, f.vessel_id, f.charter_id, "api", "production", Some("web"))
            .await
            .unwrap();
        let changes = ProjectChanges {
            environment: Some("staging"),
            ..Default::default()
        };
        let updated = update(&mut tx, f.vessel_id, f.charter_id, project.id, &changes)
            .await
            .unwrap();
        assert_eq!(updated.name, "api");
        assert_eq!(updated.environment, "staging");
        assert_eq!(updated.purpose.as_deref(), Some("web"));
    }
}
