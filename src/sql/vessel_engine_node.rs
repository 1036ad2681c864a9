//! Engine node operations for PostgreSQL database.
//!
//! Nodes a captain adds start `open` and wait for their node agent to report
//! in, which moves them to `ready`. Nodes discovered in the engine's cluster
//! are stored as `imported` workers.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use super::{SqlResult, log_error};
use crate::DataStoreError;
use crate::pagination::Pagination;

/// A row of `vessel_engine_nodes`.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct VesselEngineNodeRecord {
    pub id: Uuid,
    pub vessel_id: Uuid,
    pub vessel_engine_id: Uuid,
    pub vessel_engine_region_id: Option<Uuid>,
    pub name: String,
    /// `controller`, `worker` or `controller_worker`.
    pub node_type: String,
    /// `applications`, `databases` or `applications_databases`.
    pub deploy_mode: String,
    pub ip_address: Option<String>,
    pub cpu: Option<String>,
    pub memory: Option<String>,
    pub storage: Option<String>,
    pub provisioning: bool,
    /// `open`, `ready` or `imported`.
    pub provisioning_status: String,
    pub os_metadata: Value,
    pub created_at: DateTime<Utc>,
}

impl VesselEngineNodeRecord {
    pub fn is_open(&self) -> bool {
        self.provisioning_status == "open"
    }
}

/// The writable fields of a node. On update, `None` keeps a field.
#[derive(Debug, Clone, Default)]
pub struct NodeFields<'a> {
    pub vessel_engine_region_id: Option<Uuid>,
    pub name: Option<&'a str>,
    pub node_type: Option<&'a str>,
    pub deploy_mode: Option<&'a str>,
    pub ip_address: Option<&'a str>,
    pub cpu: Option<&'a str>,
    pub memory: Option<&'a str>,
    pub storage: Option<&'a str>,
    pub provisioning: Option<bool>,
    pub provisioning_status: Option<&'a str>,
    pub os_metadata: Option<Value>,
}

const COLUMNS: &str = "id, vessel_id, vessel_engine_id, vessel_engine_region_id, name, node_type, \
                       deploy_mode, ip_address, cpu, memory, storage, provisioning, \
                       provisioning_status, os_metadata, created_at";

/// Live rows only.
const LIVE: &str = "(deleted_at IS NULL OR deleted_at > now())";

/// Creates a node on an engine. Absent type, mode and status fall back to
/// `worker`, `applications` and `open`.
pub async fn create(
    tx: &mut Transaction<'_, Postgres>,
    vessel_id: Uuid,
    vessel_engine_id: Uuid,
    fields: &NodeFields<'_>,
) -> SqlResult<VesselEngineNodeRecord> {
    sqlx::query_as::<_, VesselEngineNodeRecord>(&format!(
        r#"
        INSERT INTO vessel_engine_nodes (
            id, vessel_id, vessel_engine_id, vessel_engine_region_id, name, node_type,
            deploy_mode, ip_address, cpu, memory, storage, provisioning, provisioning_status,
            os_metadata
        )
        VALUES (
            $1, $2, $3, $4, $5, COALESCE($6, 'worker'), COALESCE($7, 'applications'),
            $8, $9, $10, $11, COALESCE($12, false), COALESCE($13, 'open'),
            COALESCE($14, '{{}}'::jsonb)
        )
        RETURNING {COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(vessel_id)
    .bind(vessel_engine_id)
    .bind(fields.vessel_engine_region_id)
    .bind(fields.name)
    .bind(fields.node_type)
    .bind(fields.deploy_mode)
    .bind(fields.ip_address)
    .bind(fields.cpu)
    .bind(fields.memory)
    .bind(fields.storage)
    .bind(fields.provisioning)
    .bind(fields.provisioning_status)
    .bind(fields.os_metadata.as_ref())
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| log_error("creating engine node", e))
}

/// Retrieves a live node of a vessel.
pub async fn get(
    tx: &mut Transaction<'_, Postgres>,
    vessel_id: Uuid,
    id: Uuid,
) -> SqlResult<VesselEngineNodeRecord> {
    sqlx::query_as::<_, VesselEngineNodeRecord>(&format!(
        "SELECT {COLUMNS} FROM vessel_engine_nodes WHERE vessel_id = $1 AND id = $2 AND {LIVE}"
    ))
    .bind(vessel_id)
    .bind(id)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| log_error("getting engine node", e))
}

/// Retrieves a live node still waiting for its node agent.
///
/// The node agent only knows its node id, so no vessel is matched.
pub async fn get_open(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
) -> SqlResult<VesselEngineNodeRecord> {
    sqlx::query_as::<_, VesselEngineNodeRecord>(&format!(
        "SELECT {COLUMNS} FROM vessel_engine_nodes \
         WHERE id = $1 AND provisioning_status = 'open' AND {LIVE}"
    ))
    .bind(id)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| log_error("getting open engine node", e))
}

/// Lists the live nodes of a vessel across its engines.
pub async fn list(
    tx: &mut Transaction<'_, Postgres>,
    vessel_id: Uuid,
    pagination: &Pagination,
) -> SqlResult<(Vec<VesselEngineNodeRecord>, i64)> {
    let records = sqlx::query_as::<_, VesselEngineNodeRecord>(&format!(
        r#"
        SELECT {COLUMNS}
        FROM vessel_engine_nodes
        WHERE vessel_id = $1 AND {LIVE}
        ORDER BY created_at, id
        OFFSET $2 LIMIT $3
        "#
    ))
    .bind(vessel_id)
    .bind(pagination.offset())
    .bind(pagination.limit())
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| log_error("listing engine nodes", e))?;

    let total = sqlx::query_scalar::<_, i64>(&format!(
        "SELECT COUNT(*) FROM vessel_engine_nodes WHERE vessel_id = $1 AND {LIVE}"
    ))
    .bind(vessel_id)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| log_error("counting engine nodes", e))?;

    Ok((records, total))
}

/// Counts the live nodes placed in a region.
pub async fn count_in_region(
    tx: &mut Transaction<'_, Postgres>,
    vessel_id: Uuid,
    region_id: Uuid,
) -> SqlResult<i64> {
    sqlx::query_scalar::<_, i64>(&format!(
        "SELECT COUNT(*) FROM vessel_engine_nodes \
         WHERE vessel_id = $1 AND vessel_engine_region_id = $2 AND {LIVE}"
    ))
    .bind(vessel_id)
    .bind(region_id)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| log_error("counting nodes in region", e))
}

/// Shared `SET` list of the update statements; parameters start at `$3`.
const SET_FIELDS: &str = r#"
    vessel_engine_region_id = COALESCE($3, vessel_engine_region_id),
    name = COALESCE($4, name),
    node_type = COALESCE($5, node_type),
    deploy_mode = COALESCE($6, deploy_mode),
    ip_address = COALESCE($7, ip_address),
    cpu = COALESCE($8, cpu),
    memory = COALESCE($9, memory),
    storage = COALESCE($10, storage),
    provisioning = COALESCE($11, provisioning),
    provisioning_status = COALESCE($12, provisioning_status),
    os_metadata = COALESCE($13, os_metadata)
"#;

async fn update_where(
    tx: &mut Transaction<'_, Postgres>,
    filter: &str,
    key: Uuid,
    id: Uuid,
    fields: &NodeFields<'_>,
    context: &'static str,
) -> SqlResult<VesselEngineNodeRecord> {
    sqlx::query_as::<_, VesselEngineNodeRecord>(&format!(
        "UPDATE vessel_engine_nodes SET {SET_FIELDS} WHERE {filter} AND id = $2 AND {LIVE} \
         RETURNING {COLUMNS}"
    ))
    .bind(key)
    .bind(id)
    .bind(fields.vessel_engine_region_id)
    .bind(fields.name)
    .bind(fields.node_type)
    .bind(fields.deploy_mode)
    .bind(fields.ip_address)
    .bind(fields.cpu)
    .bind(fields.memory)
    .bind(fields.storage)
    .bind(fields.provisioning)
    .bind(fields.provisioning_status)
    .bind(fields.os_metadata.as_ref())
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| log_error(context, e))
}

/// Updates the given fields of a live node of a vessel.
pub async fn update(
    tx: &mut Transaction<'_, Postgres>,
    vessel_id: Uuid,
    id: Uuid,
    fields: &NodeFields<'_>,
) -> SqlResult<VesselEngineNodeRecord> {
    update_where(tx, "vessel_id = $1", vessel_id, id, fields, "updating engine node").await
}

/// Updates a node on behalf of its node agent, only while it is `open`.
pub async fn update_open(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    fields: &NodeFields<'_>,
) -> SqlResult<VesselEngineNodeRecord> {
    // $1 repeats the id so both updates share one parameter layout.
    update_where(
        tx,
        "id = $1 AND provisioning_status = 'open'",
        id,
        id,
        fields,
        "updating open engine node",
    )
    .await
}

/// Soft-deletes a node that is still `open`.
///
/// # Returns
/// * `Ok(())` - The node is now deleted
/// * `Err(DataStoreError::NotFound)` - No live open node matched
pub async fn soft_delete_open(
    tx: &mut Transaction<'_, Postgres>,
    vessel_id: Uuid,
    id: Uuid,
) -> SqlResult<()> {
    let result = sqlx::query(&format!(
        "UPDATE vessel_engine_nodes SET deleted_at = now() \
         WHERE vessel_id = $1 AND id = $2 AND provisioning_status = 'open' AND {LIVE}"
    ))
    .bind(vessel_id)
    .bind(id)
    .execute(&mut **tx)
    .await
    .map_err(|e| log_error("deleting engine node", e))?;
    if result.rows_affected() == 0 {
        return Err(DataStoreError::NotFound);
    }
    Ok(())
}

/// A node as reported by the engine's cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterNode {
    pub name: String,
    pub ip_address: Option<String>,
    pub cpu: Option<String>,
    pub memory: Option<String>,
}

/// Stores what the cluster reports about a node: the engine's node with the
/// same address is updated, otherwise an `imported` worker is added.
pub async fn upsert_from_cluster(
    tx: &mut Transaction<'_, Postgres>,
    vessel_id: Uuid,
    vessel_engine_id: Uuid,
    node: &ClusterNode,
) -> SqlResult<VesselEngineNodeRecord> {
    let known = sqlx::query_scalar::<_, Uuid>(&format!(
        "SELECT id FROM vessel_engine_nodes \
         WHERE vessel_engine_id = $1 AND ip_address = $2 AND {LIVE} \
         ORDER BY created_at, id LIMIT 1"
    ))
    .bind(vessel_engine_id)
    .bind(node.ip_address.as_deref())
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| log_error("finding cluster node", e))?;

    let fields = NodeFields {
        name: Some(node.name.as_str()),
        ip_address: node.ip_address.as_deref(),
        cpu: node.cpu.as_deref(),
        memory: node.memory.as_deref(),
        ..NodeFields::default()
    };
    match known {
        Some(id) => update(tx, vessel_id, id, &fields).await,
        None => {
            let imported = NodeFields {
                node_type: Some("worker"),
                provisioning_status: Some("imported"),
                ..fields
            };
            create(tx, vessel_id, vessel_engine_id, &imported).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::sql::tests::{seed, setup_test_db};
    use crate::sql::vessel_engine_region::{self, RegionFields};

    fn controller() -> NodeFields<'static> {
        NodeFields {
            name: Some("controller-1"),
            node_type: Some("controller"),
            ip_address: Some("10.0.0.10"),
            ..NodeFields::default()
        }
    }

    #[tokio::test]
    async fn open_nodes_are_patched_then_settle() {
        let Some(pool) = setup_test_db().await else {
            return;
        };
        let f = seed(&pool, "nodes@example.com").await;
        let mut tx = pool.begin().await.unwrap();
        let node = create(&mut tx, f.vessel_id, f.engine_id, &controller())
            .await
            .unwrap();
        assert!(node.is_open());
        assert_eq!(node.deploy_mode, "applications");
        assert_eq!(node.os_metadata, json!({}));

        let ready = update_open(
            &mut tx,
            node.id,
            &NodeFields {
                provisioning_status: Some("ready"),
                os_metadata: Some(json!({"os": "linux", "arch": "arm64"})),
                ..NodeFields::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(ready.provisioning_status, "ready");
        assert_eq!(ready.os_metadata["arch"], "arm64");
        assert_eq!(ready.name, "controller-1");

        assert_eq!(
            get_open(&mut tx, node.id).await.unwrap_err(),
            DataStoreError::NotFound
        );
        assert_eq!(
            soft_delete_open(&mut tx, f.vessel_id, node.id)
                .await
                .unwrap_err(),
            DataStoreError::NotFound
        );
        assert!(get(&mut tx, f.vessel_id, node.id).await.is_ok());
    }

    #[tokio::test]
    async fn cluster_nodes_update_by_address() {
        let Some(pool) = setup_test_db().await else {
            return;
        };
        let f = seed(&pool, "cluster@example.com").await;
        let mut tx = pool.begin().await.unwrap();
        let known = create(&mut tx, f.vessel_id, f.engine_id, &controller())
            .await
            .unwrap();

        let reported = ClusterNode {
            name: "k0s-controller".to_string(),
            ip_address: Some("10.0.0.10".to_string()),
            cpu: Some("4".to_string()),
            memory: Some("3887084Ki".to_string()),
        };
        let updated = upsert_from_cluster(&mut tx, f.vessel_id, f.engine_id, &reported)
            .await
            .unwrap();
        assert_eq!(updated.id, known.id);
        assert_eq!(updated.cpu.as_deref(), Some("4"));
        assert_eq!(updated.node_type, "controller");

        let worker = ClusterNode {
            name: "worker-1".to_string(),
            ip_address: Some("10.0.0.11".to_string()),
            ..reported
        };
        let imported = upsert_from_cluster(&mut tx, f.vessel_id, f.engine_id, &worker)
            .await
            .unwrap();
        assert_ne!(imported.id, known.id);
        assert_eq!(imported.provisioning_status, "imported");
        assert_eq!(imported.node_type, "worker");

        let (_, total) = list(&mut tx, f.vessel_id, &Pagination::default())
            .await
            .unwrap();
        assert_eq!(total, 2);
    }

    #[tokio::test]
    async fn region_counts_follow_placement() {
        let Some(pool) = setup_test_db().await else {
            return;
        };
        let f = seed(&pool, "placed@example.com").await;
        let mut tx = pool.begin().await.unwrap();
        let region = vessel_engine_region::create(
            &mut tx,
            f.vessel_id,
            &RegionFields {
                name: Some("ams-1"),
                geo_region: Some("eu"),
                ..RegionFields::default()
            },
        )
        .await
        .unwrap();
        let placed = NodeFields {
            vessel_engine_region_id: Some(region.id),
            ..controller()
        };
        let node = create(&mut tx, f.vessel_id, f.engine_id, &placed)
            .await
            .unwrap();
        assert_eq!(count_in_region(&mut tx, f.vessel_id, region.id).await.unwrap(), 1);
        soft_delete_open(&mut tx, f.vessel_id, node.id).await.unwrap();
        assert_eq!(count_in_region(&mut tx, f.vessel_id, region.id).await.unwrap(), 0);
    }
}
