//! Vessel engine operations for PostgreSQL database.
//!
//! An engine is the cluster a vessel runs its workloads on. Every vessel gets
//! a `default` engine when it is created; agents dial in on behalf of one
//! engine and the tunnel routes only check engines of the vessel in the URL.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{SqlResult, log_error};
use crate::pagination::Pagination;

/// Name of the engine every vessel starts with.
pub const DEFAULT_ENGINE_NAME: &str = "default";

/// A row of `vessel_engines`.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct VesselEngineRecord {
    pub id: Uuid,
    pub vessel_id: Uuid,
    pub name: String,
    /// `controlled_engine` or `managed_cloud`.
    pub mode: String,
    /// `disconnected`, `connected` or `error`.
    pub agent_connection_status: String,
    pub last_connection_error: Option<String>,
    pub last_agent_connection_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Creates a controlled engine for a vessel.
pub async fn create(
    tx: &mut Transaction<'_, Postgres>,
    vessel_id: Uuid,
    name: &str,
) -> SqlResult<VesselEngineRecord> {
    sqlx::query_as::<_, VesselEngineRecord>(
        r#"
        INSERT INTO vessel_engines (id, vessel_id, name)
        VALUES ($1, $2, $3)
        RETURNING id, vessel_id, name, mode, agent_connection_status, last_connection_error,
                  last_agent_connection_at, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(vessel_id)
    .bind(name)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| log_error("creating vessel engine", e))
}

/// Retrieves a live engine of a vessel.
///
/// # Returns
/// * `Ok(VesselEngineRecord)` - The engine belongs to `vessel_id`
/// * `Err(DataStoreError::NotFound)` - No live engine with that id on that vessel
pub async fn get(
    tx: &mut Transaction<'_, Postgres>,
    vessel_id: Uuid,
    id: Uuid,
) -> SqlResult<VesselEngineRecord> {
    sqlx::query_as::<_, VesselEngineRecord>(
        r#"
        SELECT id, vessel_id, name, mode, agent_connection_status, last_connection_error,
               last_agent_connection_at, created_at
        FROM vessel_engines
        WHERE vessel_id = $1 AND id = $2 AND (deleted_at IS NULL OR deleted_at > now())
        "#,
    )
    .bind(vessel_id)
    .bind(id)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| log_error("getting vessel engine", e))
}

/// True when a live engine with this id exists on any vessel.
///
/// Runs on the pool; the agent handshake holds no transaction.
pub async fn exists(pool: &PgPool, id: Uuid) -> SqlResult<bool> {
    sqlx::query_scalar::<_, bool>(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM vessel_engines
            WHERE id = $1 AND (deleted_at IS NULL OR deleted_at > now())
        )
        "#,
    )
    .bind(id)
    .fetch_one(pool)
    .await
    .map_err(|e| log_error("checking vessel engine", e))
}

/// Lists the live engines of a vessel, oldest first.
pub async fn list(
    tx: &mut Transaction<'_, Postgres>,
    vessel_id: Uuid,
    pagination: &Pagination,
) -> SqlResult<(Vec<VesselEngineRecord>, i64)> {
    let records = sqlx::query_as::<_, VesselEngineRecord>(
        r#"
        SELECT id, vessel_id, name, mode, agent_connection_status, last_connection_error,
               last_agent_connection_at, created_at
        FROM vessel_engines
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
    .map_err(|e| log_error("listing vessel engines", e))?;

    let total = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*)
        FROM vessel_engines
        WHERE vessel_id = $1 AND (deleted_at IS NULL OR deleted_at > now())
        "#,
    )
    .bind(vessel_id)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| log_error("counting vessel engines", e))?;

    Ok((records, total))
}

/// The vessel's oldest live engine, which new nodes join.
pub async fn first(
    tx: &mut Transaction<'_, Postgres>,
    vessel_id: Uuid,
) -> SqlResult<VesselEngineRecord> {
    sqlx::query_as::<_, VesselEngineRecord>(
        r#"
        SELECT id, vessel_id, name, mode, agent_connection_status, last_connection_error,
               last_agent_connection_at, created_at
        FROM vessel_engines
        WHERE vessel_id = $1 AND (deleted_at IS NULL OR deleted_at > now())
        ORDER BY created_at, id
        LIMIT 1
        "#,
    )
    .bind(vessel_id)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| log_error("getting first vessel engine", e))
}

/// Switches an engine's mode.
pub async fn set_mode(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    mode: &str,
) -> SqlResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE vessel_engines
        SET mode = $2
        WHERE id = $1 AND (deleted_at IS NULL OR deleted_at > now())
        "#,
    )
    .bind(id)
    .bind(mode)
    .execute(&mut **tx)
    .await
    .map_err(|e| log_error("setting vessel engine mode", e))?;
    if result.rows_affected() == 0 {
        return Err(crate::DataStoreError::NotFound);
    }
    Ok(())
}

/// Records the agent connection state of an engine.
///
/// `connected` also stamps `last_agent_connection_at`; `error` keeps
/// `message` as the last connection error.
pub async fn record_connection(
    pool: &PgPool,
    id: Uuid,
    status: &str,
    message: Option<&str>,
) -> SqlResult<()> {
    sqlx::query(
        r#"
        UPDATE vessel_engines
        SET agent_connection_status = $2,
            last_agent_connection_at = CASE WHEN $2::text = 'connected' THEN now()
                                            ELSE last_agent_connection_at END,
            last_connection_error = COALESCE($3, last_connection_error)
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(status)
    .bind(message)
    .execute(pool)
    .await
    .map_err(|e| log_error("recording agent connection", e))?;
    Ok(())
}
