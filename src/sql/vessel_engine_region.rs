//! Engine region operations for PostgreSQL database.

use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use super::{SqlResult, log_error};
use crate::pagination::Pagination;

/// A row of `vessel_engine_regions`.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct VesselEngineRegionRecord {
    pub id: Uuid,
    pub vessel_id: Uuid,
    pub vessel_engine_id: Option<Uuid>,
    pub name: String,
    pub provider_name: Option<String>,
    /// `eu`, `usa`, `na`, `latam`, `apac` or `africa`.
    pub geo_region: String,
    pub location_city: Option<String>,
    pub location_country: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The writable fields of a region. On update, `None` keeps a field.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegionFields<'a> {
    pub vessel_engine_id: Option<Uuid>,
    pub name: Option<&'a str>,
    pub provider_name: Option<&'a str>,
    pub geo_region: Option<&'a str>,
    pub location_city: Option<&'a str>,
    pub location_country: Option<&'a str>,
}

/// Creates a region.
///
/// # Returns
/// * `Ok(VesselEngineRegionRecord)` - The stored region
/// * `Err(DataStoreError::Constraint("vessel_engine_regions_unique_name"))` - Name taken
pub async fn create(
    tx: &mut Transaction<'_, Postgres>,
    vessel_id: Uuid,
    fields: &RegionFields<'_>,
) -> SqlResult<VesselEngineRegionRecord> {
    sqlx::query_as::<_, VesselEngineRegionRecord>(
        r#"
        INSERT INTO vessel_engine_regions
            (id, vessel_id, vessel_engine_id, name, provider_name, geo_region,
             location_city, location_country)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING id, vessel_id, vessel_engine_id, name, provider_name, geo_region,
                  location_city, location_country, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(vessel_id)
    .bind(fields.vessel_engine_id)
    .bind(fields.name)
    .bind(fields.provider_name)
    .bind(fields.geo_region)
    .bind(fields.location_city)
    .bind(fields.location_country)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| log_error("creating engine region", e))
}

/// Retrieves a live region of a vessel.
pub async fn get(
    tx: &mut Transaction<'_, Postgres>,
    vessel_id: Uuid,
    id: Uuid,
) -> SqlResult<VesselEngineRegionRecord> {
    sqlx::query_as::<_, VesselEngineRegionRecord>(
        r#"
        SELECT id, vessel_id, vessel_engine_id, name, provider_name, geo_region,
               location_city, location_country, created_at
        FROM vessel_engine_regions
        WHERE vessel_id = $1 AND id = $2 AND (deleted_at IS NULL OR deleted_at > now())
        "#,
    )
    .bind(vessel_id)
    .bind(id)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| log_error("getting engine region", e))
}

/// Lists the live regions of a vessel.
pub async fn list(
    tx: &mut Transaction<'_, Postgres>,
    vessel_id: Uuid,
    pagination: &Pagination,
) -> SqlResult<(Vec<VesselEngineRegionRecord>, i64)> {
    let records = sqlx::query_as::<_, VesselEngineRegionRecord>(
        r#"
        SELECT id, vessel_id, vessel_engine_id, name, provider_name, geo_region,
               location_city, location_country, created_at
        FROM vessel_engine_regions
        WHERE vessel_id = $1 AND (deleted_at IS NULL OR deleted_at > now())
        ORDER BY created_at, id
        OFFSET $2 LIMIT $3
        "#,
    )
    .bind(vessel_id)
    .bind(pagination.offset())
    .bind(pagination.limit())
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| log_error("listing engine regions", e))?;

    let total = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*)
        FROM vessel_engine_regions
        WHERE vessel_id = $1 AND (deleted_at IS NULL OR deleted_at > now())
        "#,
    )
    .bind(vessel_id)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| log_error("counting engine regions", e))?;

    Ok((records, total))
}

/// Updates the given fields of a live region.
pub async fn update(
    tx: &mut Transaction<'_, Postgres>,
    vessel_id: Uuid,
    id: Uuid,
    fields: &RegionFields<'_>,
) -> SqlResult<VesselEngineRegionRecord> {
    sqlx::query_as::<_, VesselEngineRegionRecord>(
        r#"
        UPDATE vessel_engine_regions
        SET vessel_engine_id = COALESCE($3, vessel_engine_id),
            name = COALESCE($4, name),
            provider_name = COALESCE($5, provider_name),
            geo_region = COALESCE($6, geo_region),
            location_city = COALESCE($7, location_city),
            location_country = COALESCE($8, location_country)
        WHERE vessel_id = $1 AND id = $2 AND (deleted_at IS NULL OR deleted_at > now())
        RETURNING id, vessel_id, vessel_engine_id, name, provider_name, geo_region,
                  location_city, location_country, created_at
        "#,
    )
    .bind(vessel_id)
    .bind(id)
    .bind(fields.vessel_engine_id)
    .bind(fields.name)
    .bind(fields.provider_name)
    .bind(fields.geo_region)
    .bind(fields.location_city)
    .bind(fields.location_country)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| log_error("updating engine region", e))
}

/// Soft-deletes a live region.
pub async fn soft_delete(
    tx: &mut Transaction<'_, Postgres>,
    vessel_id: Uuid,
    id: Uuid,
) -> SqlResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE vessel_engine_regions
        SET deleted_at = now()
        WHERE vessel_id = $1 AND id = $2 AND (deleted_at IS NULL OR deleted_at > now())
        "#,
    )
    .bind(vessel_id)
    .bind(id)
    .execute(&mut **tx)
    .await
    .map_err(|e| log_error("deleting engine region", e))?;
    if result.rows_affected() == 0 {
        return Err(crate::DataStoreError::NotFound);
    }
    Ok(())
}
