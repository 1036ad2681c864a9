//! Compute plan operations for PostgreSQL database.

use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use super::{SqlResult, log_error};
use crate::DataStoreError;
use crate::pagination::Pagination;

/// A row of `charter_compute_plans`.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ComputePlanRecord {
    pub id: Uuid,
    pub vessel_id: Uuid,
    pub charter_id: Uuid,
    pub name: String,
    pub application: Option<String>,
    pub requests_cpu: String,
    pub requests_memory: String,
    pub limits_cpu: Option<String>,
    pub limits_memory: Option<String>,
    pub billing_enabled: bool,
    pub billing_period: Option<String>,
    pub billing_unit_price: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Column values of a compute plan about to be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewComputePlan {
    pub vessel_id: Uuid,
    pub charter_id: Uuid,
    pub name: String,
    pub application: Option<String>,
    pub requests_cpu: String,
    pub requests_memory: String,
    pub limits_cpu: Option<String>,
    pub limits_memory: Option<String>,
    pub billing_enabled: bool,
    pub billing_period: Option<String>,
    pub billing_unit_price: Option<String>,
}

/// Updatable compute plan columns; `None` leaves a column as is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComputePlanChanges {
    pub name: Option<String>,
    pub application: Option<String>,
    pub requests_cpu: Option<String>,
    pub requests_memory: Option<String>,
    pub limits_cpu: Option<String>,
    pub limits_memory: Option<String>,
    pub billing_enabled: Option<bool>,
    pub billing_period: Option<String>,
    pub billing_unit_price: Option<String>,
}

const COLUMNS: &str = "id, vessel_id, charter_id, name, application, requests_cpu, \
                       requests_memory, limits_cpu, limits_memory, billing_enabled, \
                       billing_period, billing_unit_price, created_at";

/// Creates a compute plan.
///
/// # Returns
/// * `Ok(ComputePlanRecord)` - The stored plan
/// * `Err(DataStoreError::Constraint("charter_compute_plans_unique_name"))` -
///   A live plan of the charter already uses the name
pub async fn create(
    tx: &mut Transaction<'_, Postgres>,
    plan: &NewComputePlan,
) -> SqlResult<ComputePlanRecord> {
    sqlx::query_as::<_, ComputePlanRecord>(&format!(
        r#"
        INSERT INTO charter_compute_plans (
            id, vessel_id, charter_id, name, application, requests_cpu, requests_memory,
            limits_cpu, limits_memory, billing_enabled, billing_period, billing_unit_price
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        RETURNING {COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(plan.vessel_id)
    .bind(plan.charter_id)
    .bind(&plan.name)
    .bind(&plan.application)
    .bind(&plan.requests_cpu)
    .bind(&plan.requests_memory)
    .bind(&plan.limits_cpu)
    .bind(&plan.limits_memory)
    .bind(plan.billing_enabled)
    .bind(&plan.billing_period)
    .bind(&plan.billing_unit_price)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| log_error("creating compute plan", e))
}

/// Retrieves a live compute plan.
pub async fn get(
    tx: &mut Transaction<'_, Postgres>,
    vessel_id: Uuid,
    charter_id: Uuid,
    id: Uuid,
) -> SqlResult<ComputePlanRecord> {
    sqlx::query_as::<_, ComputePlanRecord>(&format!(
        r#"
        SELECT {COLUMNS}
        FROM charter_compute_plans
        WHERE vessel_id = $1 AND charter_id = $2 AND id = $3
          AND (deleted_at IS NULL OR deleted_at > now())
        "#
    ))
    .bind(vessel_id)
    .bind(charter_id)
    .bind(id)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| log_error("getting compute plan", e))
}

/// Lists the live compute plans of a charter.
pub async fn list(
    tx: &mut Transaction<'_, Postgres>,
    vessel_id: Uuid,
    charter_id: Uuid,
    pagination: &Pagination,
) -> SqlResult<(Vec<ComputePlanRecord>, i64)> {
    let records = sqlx::query_as::<_, ComputePlanRecord>(&format!(
        r#"
        SELECT {COLUMNS}
        FROM charter_compute_plans
        WHERE vessel_id = $1 AND charter_id = $2
          AND (deleted_at IS NULL OR deleted_at > now())
        ORDER BY created_at, id
        OFFSET $3 LIMIT $4
        "#
    ))
    .bind(vessel_id)
    .bind(charter_id)
    .bind(pagination.offset())
    .bind(pagination.limit())
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| log_error("listing compute plans", e))?;

    let total = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*)
        FROM charter_compute_plans
        WHERE vessel_id = $1 AND charter_id = $2
          AND (deleted_at IS NULL OR deleted_at > now())
        "#,
    )
    .bind(vessel_id)
    .bind(charter_id)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| log_error("counting compute plans", e))?;

    Ok((records, total))
}

/// Updates a live compute plan.
pub async fn update(
    tx: &mut Transaction<'_, Postgres>,
    vessel_id: Uuid,
    charter_id: Uuid,
    id: Uuid,
    changes: &ComputePlanChanges,
) -> SqlResult<ComputePlanRecord> {
    sqlx::query_as::<_, ComputePlanRecord>(&format!(
        r#"
        UPDATE charter_compute_plans
        SET name = COALESCE($4, name),
            application = COALESCE($5, application),
            requests_cpu = COALESCE($6, requests_cpu),
            requests_memory = COALESCE($7, requests_memory),
            limits_cpu = COALESCE($8, limits_cpu),
            limits_memory = COALESCE($9, limits_memory),
            billing_enabled = COALESCE($10, billing_enabled),
            billing_period = COALESCE($11, billing_period),
            billing_unit_price = COALESCE($12, billing_unit_price)
        WHERE vessel_id = $1 AND charter_id = $2 AND id = $3
          AND (deleted_at IS NULL OR deleted_at > now())
        RETURNING {COLUMNS}
        "#
    ))
    .bind(vessel_id)
    .bind(charter_id)
    .bind(id)
    .bind(&changes.name)
    .bind(&changes.application)
    .bind(&changes.requests_cpu)
    .bind(&changes.requests_memory)
    .bind(&changes.limits_cpu)
    .bind(&changes.limits_memory)
    .bind(changes.billing_enabled)
    .bind(&changes.billing_period)
    .bind(&changes.billing_unit_price)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| log_error("updating compute plan", e))
}

/// Soft-deletes a live compute plan.
pub async fn soft_delete(
    tx: &mut Transaction<'_, Postgres>,
    vessel_id: Uuid,
    charter_id: Uuid,
    id: Uuid,
) -> SqlResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE charter_compute_plans
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
    .map_err(|e| log_error("deleting compute plan", e))?;
    if result.rows_affected() == 0 {
        return Err(DataStoreError::NotFound);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::tests::{seed, setup_test_db};

    fn plan(vessel_id: Uuid, charter_id: Uuid, name: &str) -> NewComputePlan {
        NewComputePlan {
            vessel_id,
            charter_id,
            name: name.to_string(),
            application: Some("applications".to_string()),
            requests_cpu: "0.5".to_string(),
            requests_memory: "512Mi".to_string(),
            limits_cpu: None,
            limits_memory: None,
            billing_enabled: true,
            billing_period: Some("monthly".to_string()),
            billing_unit_price: Some("12.50".to_string()),
        }
    }

    #[tokio::test]
    async fn create_get_and_patch() {
        let Some(pool) = setup_test_db().await else {
            return;
        };
        let f = seed(&pool, "plans@example.com").await;
        let mut tx = pool.begin().await.unwrap();
        let created = create(&mut tx, &plan(f.vessel_id, f.charter_id, "Burst"))
            .await
            .unwrap();
        assert_eq!(
            get(&mut tx, f.vessel_id, f.charter_id, created.id)
                .await
                .unwrap(),
            created
        );

        let changes = ComputePlanChanges {
            limits_cpu: Some("1".to_string()),
            billing_enabled: Some(false),
            ..Default::default()
        };
        let updated = update(&mut tx, f.vessel_id, f.charter_id, created.id, &changes)
            .await
            .unwrap();
        assert_eq!(updated.limits_cpu.as_deref(), Some("1"));
        assert!(!updated.billing_enabled);
        assert_eq!(updated.requests_memory, "512Mi");
    }

    #[tokio::test]
    async fn names_are_unique_per_charter() {
        let Some(pool) = setup_test_db().await else {
            return;
        };
        let f = seed(&pool, "unique-plans@example.com").await;
        let mut tx = pool.begin().await.unwrap();
        create(&mut tx, &plan(f.vessel_id, f.charter_id, "Burst"))
            .await
            .unwrap();
        let err = create(&mut tx, &plan(f.vessel_id, f.charter_id, "burst"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            DataStoreError::Constraint("charter_compute_plans_unique_name".to_string())
        );
    }
}
