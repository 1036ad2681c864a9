//! HTTP endpoints that relay work to a vessel engine's agent.

use std::sync::Arc;

use axum::extract::{Path, State};
use serde_json::{Value, json};
use sqlx::PgPool;
use uuid::Uuid;

use super::server::AgentServer;
use crate::api_status::ApiError;
use crate::auth::AuthUser;
use crate::json_api::ApiResponse;
use crate::jwt::CrewRole;
use crate::region::require_engine;
use crate::sql::vessel_engine_node::{self, ClusterNode};
use crate::validate::{ApiJson, parse_uuid};

pub const GET_NODES: &str = "k8s.nodes.get";
pub const APPLY: &str = "k8s.apply";

fn engine_path(vessel_id: &str, vessel_engine_id: &str) -> Result<(Uuid, Uuid), ApiError> {
    Ok((parse_uuid(vessel_id)?, parse_uuid(vessel_engine_id)?))
}

/// Wraps an agent reply as a resource object of the engine.
fn engine_resource(kind: &str, vessel_engine_id: Uuid, reply: Value) -> Value {
    json!({
        "type": kind,
        "id": vessel_engine_id,
        "attributes": reply,
    })
}

/// Reads the nodes out of a Kubernetes `NodeList`. Nodes are matched by
/// internal address, so nodes without one are skipped.
pub fn cluster_nodes(reply: &Value) -> Vec<ClusterNode> {
    let Some(items) = reply["items"].as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let name = item["metadata"]["name"].as_str()?.to_string();
            let ip_address = item["status"]["addresses"]
                .as_array()
                .and_then(|addresses| {
                    addresses
                        .iter()
                        .find(|address| address["type"] == "InternalIP")
                })
                .and_then(|address| address["address"].as_str())?
                .to_string();
            let allocatable = &item["status"]["allocatable"];
            Some(ClusterNode {
                name,
                ip_address: Some(ip_address),
                cpu: allocatable["cpu"].as_str().map(str::to_string),
                memory: allocatable["memory"].as_str().map(str::to_string),
            })
        })
        .collect()
}

/// Relays `k8s.nodes.get` and records the reported nodes on the engine.
pub(super) async fn get_nodes(
    State(agents): State<Arc<AgentServer>>,
    State(pool): State<PgPool>,
    caller: AuthUser,
    Path((vessel_id, vessel_engine_id)): Path<(String, String)>,
) -> Result<ApiResponse, ApiError> {
    let (vessel_id, vessel_engine_id) = engine_path(&vessel_id, &vessel_engine_id)?;
    caller.authorize(&[CrewRole::VesselCaptain], vessel_id, None)?;
    let mut tx = pool.begin().await?;
    require_engine(&mut tx, vessel_id, vessel_engine_id).await?;
    tx.commit().await?;
    let reply = agents.request(vessel_engine_id, GET_NODES, json!({})).await?;
    let nodes = cluster_nodes(&reply);
    let mut tx = pool.begin().await?;
    for node in &nodes {
        vessel_engine_node::upsert_from_cluster(&mut tx, vessel_id, vessel_engine_id, node)
            .await?;
    }
    tx.commit().await?;
    tracing::debug!(%vessel_engine_id, nodes = nodes.len(), "synced cluster nodes");
    Ok(ApiResponse::ok(engine_resource(
        "VesselEngineNodes",
        vessel_engine_id,
        reply,
    )))
}

pub(super) async fn apply(
    State(agents): State<Arc<AgentServer>>,
    State(pool): State<PgPool>,
    caller: AuthUser,
    Path((vessel_id, vessel_engine_id)): Path<(String, String)>,
    ApiJson(payload): ApiJson<Value>,
) -> Result<ApiResponse, ApiError> {
    let (vessel_id, vessel_engine_id) = engine_path(&vessel_id, &vessel_engine_id)?;
    caller.authorize(&[CrewRole::VesselCaptain], vessel_id, None)?;
    let mut tx = pool.begin().await?;
    require_engine(&mut tx, vessel_id, vessel_engine_id).await?;
    tx.commit().await?;
    tracing::info!(%vessel_engine_id, user_id = %caller.user_id, "relaying apply");
    let reply = agents.request(vessel_engine_id, APPLY, payload).await?;
    Ok(ApiResponse::ok(engine_resource(
        "VesselEngineApply",
        vessel_engine_id,
        reply,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_lists_yield_addresses_and_capacity() {
        let reply = json!({
            "kind": "NodeList",
            "items": [
                {
                    "metadata": {"name": "worker-1"},
                    "status": {
                        "addresses": [
                            {"type": "Hostname", "address": "worker-1"},
                            {"type": "InternalIP", "address": "10.0.0.4"}
                        ],
                        "allocatable": {"cpu": "4", "memory": "16Gi"}
                    }
                },
                {"metadata": {"name": "bare"}, "status": {}},
                {"metadata": {}}
            ]
        });
        let nodes = cluster_nodes(&reply);
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].name, "worker-1");
        assert_eq!(nodes[0].ip_address.as_deref(), Some("10.0.0.4"));
        assert_eq!(nodes[0].cpu.as_deref(), Some("4"));
        assert_eq!(nodes[0].memory.as_deref(), Some("16Gi"));
        assert!(cluster_nodes(&json!({"kind": "Status"})).is_empty());
    }
}
