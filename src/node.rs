//! Engine nodes and the node agent routes.
//!
//! A captain adds a node, which starts `open`. While it stays open the
//! captain reads it with a node agent token attached. The node agent on the
//! machine presents that token to read its node and report its hardware,
//! which settles the node and switches its engine to `managed_cloud`.

use std::sync::Arc;

use axum::Router;
use axum::async_trait;
use axum::extract::{FromRef, FromRequestParts, Path, State};
use axum::http::request::Parts;
use axum::routing::get;
use serde::Deserialize;
use serde_json::{Value, json};
use sqlx::PgPool;
use uuid::Uuid;

use crate::api_status::{ApiError, ApiStatus};
use crate::auth::{ANY_ROLE, AuthUser, bearer_token, check_token_chars};
use crate::json_api::{ApiResponse, Resource, collection};
use crate::jwt::{CrewRole, JwtKeys, TokenType};
use crate::pagination::{PageQuery, Pagination};
use crate::router::AppState;
use crate::sql::vessel_engine_node::{self, NodeFields, VesselEngineNodeRecord};
use crate::sql::{vessel_engine, vessel_engine_region};
use crate::validate::{self, ApiJson, ApiQuery, ValidationError, parse_uuid};

pub const NODE_TYPES: &[&str] = &["controller", "worker", "controller_worker"];
pub const DEPLOY_MODES: &[&str] = &["applications", "databases", "applications_databases"];

const WRITE_ROLES: &[CrewRole] = &[CrewRole::VesselCaptain];

impl Resource for VesselEngineNodeRecord {
    const TYPE: &'static str = "VesselEngineNode";

    fn id(&self) -> Uuid {
        self.id
    }

    fn attributes(&self) -> Value {
        json!({
            "vesselId": self.vessel_id,
            "vesselEngineId": self.vessel_engine_id,
            "vesselEngineRegionId": self.vessel_engine_region_id,
            "name": self.name,
            "nodeType": self.node_type,
            "deployMode": self.deploy_mode,
            "ipAddress": self.ip_address,
            "cpu": self.cpu,
            "memory": self.memory,
            "storage": self.storage,
            "provisioning": self.provisioning,
            "provisioningStatus": self.provisioning_status,
            "osMetadata": self.os_metadata,
            "createdAt": self.created_at,
        })
    }
}

////////////////////////////////////////////// Bodies //////////////////////////////////////////////

/// Body of the captain's create and patch requests.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeBody {
    pub vessel_engine_region_id: Option<String>,
    pub name: Option<String>,
    pub node_type: Option<String>,
    pub deploy_mode: Option<String>,
    pub ip_address: Option<String>,
    pub cpu: Option<String>,
    pub memory: Option<String>,
    pub storage: Option<String>,
    pub provisioning: Option<bool>,
}

fn check_choice(
    value: &Option<String>,
    property: &str,
    allowed: &[&str],
) -> Result<(), ValidationError> {
    if let Some(value) = validate::not_blank(value, property)? {
        validate::one_of(value, property, allowed)?;
    }
    Ok(())
}

fn check_hardware(
    cpu: &Option<String>,
    memory: &Option<String>,
    storage: &Option<String>,
) -> Result<(), ValidationError> {
    if let Some(cpu) = cpu {
        validate::cpu_quantity(cpu, "cpu")?;
    }
    if let Some(memory) = memory {
        validate::memory_quantity(memory, "memory")?;
    }
    if let Some(storage) = storage {
        validate::memory_quantity(storage, "storage")?;
    }
    Ok(())
}

impl NodeBody {
    fn region_id(&self) -> Result<Option<Uuid>, ApiError> {
        self.vessel_engine_region_id
            .as_deref()
            .map(parse_uuid)
            .transpose()
    }

    /// Validates the body into node fields; `name` is required on create.
    pub fn to_fields(
        &self,
        region_id: Option<Uuid>,
        creating: bool,
    ) -> Result<NodeFields<'_>, ValidationError> {
        let name = if creating {
            Some(validate::required(&self.name, "name")?)
        } else {
            validate::not_blank(&self.name, "name")?
        };
        check_choice(&self.node_type, "nodeType", NODE_TYPES)?;
        check_choice(&self.deploy_mode, "deployMode", DEPLOY_MODES)?;
        check_hardware(&self.cpu, &self.memory, &self.storage)?;
        Ok(NodeFields {
            vessel_engine_region_id: region_id,
            name,
            node_type: self.node_type.as_deref(),
            deploy_mode: self.deploy_mode.as_deref(),
            ip_address: self.ip_address.as_deref(),
            cpu: self.cpu.as_deref(),
            memory: self.memory.as_deref(),
            storage: self.storage.as_deref(),
            provisioning: self.provisioning,
            ..NodeFields::default()
        })
    }
}

/// What a node agent reports about its machine.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeReport {
    pub provisioning_status: Option<String>,
    pub ip_address: Option<String>,
    pub cpu: Option<String>,
    pub memory: Option<String>,
    pub storage: Option<String>,
    pub os_metadata: Option<Value>,
}

impl NodeReport {
    /// Validates a report; a node agent may only settle its node as `ready`.
    pub fn to_fields(&self) -> Result<NodeFields<'_>, ValidationError> {
        check_choice(&self.provisioning_status, "provisioningStatus", &["ready"])?;
        check_hardware(&self.cpu, &self.memory, &self.storage)?;
        if self.os_metadata.as_ref().is_some_and(|v| !v.is_object()) {
            return Err(ValidationError::InvalidProperty {
                property: "osMetadata".to_string(),
                expected: "an object".to_string(),
            });
        }
        Ok(NodeFields {
            provisioning_status: self.provisioning_status.as_deref(),
            ip_address: self.ip_address.as_deref(),
            cpu: self.cpu.as_deref(),
            memory: self.memory.as_deref(),
            storage: self.storage.as_deref(),
            os_metadata: self.os_metadata.clone(),
            ..NodeFields::default()
        })
    }
}

//////////////////////////////////////////// NodeAgent /////////////////////////////////////////////

/// A node agent authenticated by its node agent token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeAgent {
    pub node_id: Uuid,
}

#[async_trait]
impl<S> FromRequestParts<S> for NodeAgent
where
    Arc<JwtKeys>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)?;
        check_token_chars(token)?;
        let keys = Arc::<JwtKeys>::from_ref(state);
        let claims = keys.verify(token, TokenType::NodeAgent).map_err(|e| {
            tracing::debug!(error = %e, "rejecting node agent token");
            ApiError::new(ApiStatus::FAILED_AUTHORIZATION)
        })?;
        let node_id = claims
            .subject_id()
            .ok_or_else(|| ApiError::new(ApiStatus::VESSEL_ENGINE_NODE_ID_INCORRECT))?;
        Ok(NodeAgent { node_id })
    }
}

impl NodeAgent {
    /// Fails unless the path names the node the token was issued for.
    fn check_path(&self, node_id: &str) -> Result<Uuid, ApiError> {
        let node_id = parse_uuid(node_id)?;
        if node_id != self.node_id {
            return Err(ApiError::new(ApiStatus::VESSEL_ENGINE_NODE_ID_INCORRECT));
        }
        Ok(node_id)
    }
}

/// Renders a node for its captain, adding the node agent token while it is open.
fn node_object(keys: &JwtKeys, node: &VesselEngineNodeRecord) -> Result<Value, ApiError> {
    let mut object = node.to_resource_object();
    if node.is_open() {
        let token = keys.issue_node_agent(node.id).map_err(|e| {
            tracing::error!(error = %e, "node agent token issuance failed");
            ApiError::new(ApiStatus::FAILED)
        })?;
        object["attributes"]["token"] = json!(token);
    }
    Ok(object)
}

fn node_path(vessel_id: &str, node_id: &str) -> Result<(Uuid, Uuid), ApiError> {
    Ok((parse_uuid(vessel_id)?, parse_uuid(node_id)?))
}

///////////////////////////////////////////// Handlers /////////////////////////////////////////////

async fn list_nodes(
    State(pool): State<PgPool>,
    caller: AuthUser,
    Path(vessel_id): Path<String>,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> Result<ApiResponse, ApiError> {
    let vessel_id = parse_uuid(&vessel_id)?;
    caller.authorize(ANY_ROLE, vessel_id, None)?;
    let pagination = Pagination::from(&query);
    let mut tx = pool.begin().await?;
    let (nodes, total) = vessel_engine_node::list(&mut tx, vessel_id, &pagination).await?;
    tx.commit().await?;
    Ok(ApiResponse::ok(collection(&nodes)).with_meta(pagination.meta(total)))
}

async fn get_node(
    State(pool): State<PgPool>,
    State(keys): State<Arc<JwtKeys>>,
    caller: AuthUser,
    Path((vessel_id, node_id)): Path<(String, String)>,
) -> Result<ApiResponse, ApiError> {
    let (vessel_id, node_id) = node_path(&vessel_id, &node_id)?;
    caller.authorize(ANY_ROLE, vessel_id, None)?;
    let mut tx = pool.begin().await?;
    let node = vessel_engine_node::get(&mut tx, vessel_id, node_id)
        .await
        .map_err(ApiError::not_found(ApiStatus::VESSEL_ENGINE_NODE_NOT_FOUND))?;
    tx.commit().await?;
    if caller.vessel_role(vessel_id) == Some(CrewRole::VesselCaptain) {
        Ok(ApiResponse::ok(node_object(&keys, &node)?))
    } else {
        Ok(ApiResponse::ok(node.to_resource_object()))
    }
}

/// Adds a node to the vessel's first engine.
async fn create_node(
    State(pool): State<PgPool>,
    State(keys): State<Arc<JwtKeys>>,
    caller: AuthUser,
    Path(vessel_id): Path<String>,
    ApiJson(body): ApiJson<NodeBody>,
) -> Result<ApiResponse, ApiError> {
    let vessel_id = parse_uuid(&vessel_id)?;
    caller.authorize(WRITE_ROLES, vessel_id, None)?;
    let region_id = body.region_id()?;
    let fields = body.to_fields(region_id, true)?;
    let mut tx = pool.begin().await?;
    let engine = vessel_engine::first(&mut tx, vessel_id)
        .await
        .map_err(ApiError::not_found(ApiStatus::VESSEL_ENGINE_NOT_FOUND))?;
    if let Some(region_id) = region_id {
        vessel_engine_region::get(&mut tx, vessel_id, region_id)
            .await
            .map_err(ApiError::not_found(ApiStatus::VESSEL_REGION_NOT_FOUND))?;
    }
    let node = vessel_engine_node::create(&mut tx, vessel_id, engine.id, &fields).await?;
    tx.commit().await?;
    tracing::info!(node_id = %node.id, engine_id = %engine.id, "created engine node");
    Ok(ApiResponse::created(node_object(&keys, &node)?))
}

async fn patch_node(
    State(pool): State<PgPool>,
    caller: AuthUser,
    Path((vessel_id, node_id)): Path<(String, String)>,
    ApiJson(body): ApiJson<NodeBody>,
) -> Result<ApiResponse, ApiError> {
    let (vessel_id, node_id) = node_path(&vessel_id, &node_id)?;
    caller.authorize(WRITE_ROLES, vessel_id, None)?;
    let region_id = body.region_id()?;
    let changes = body.to_fields(region_id, false)?;
    let mut tx = pool.begin().await?;
    if let Some(region_id) = region_id {
        vessel_engine_region::get(&mut tx, vessel_id, region_id)
            .await
            .map_err(ApiError::not_found(ApiStatus::VESSEL_REGION_NOT_FOUND))?;
    }
    let node = vessel_engine_node::update(&mut tx, vessel_id, node_id, &changes)
        .await
        .map_err(ApiError::not_found(ApiStatus::VESSEL_ENGINE_NODE_NOT_FOUND))?;
    tx.commit().await?;
    Ok(ApiResponse::ok(node.to_resource_object()))
}

/// Deletes a node that its node agent has not settled yet.
async fn delete_node(
    State(pool): State<PgPool>,
    caller: AuthUser,
    Path((vessel_id, node_id)): Path<(String, String)>,
) -> Result<ApiResponse, ApiError> {
    let (vessel_id, node_id) = node_path(&vessel_id, &node_id)?;
    caller.authorize(WRITE_ROLES, vessel_id, None)?;
    let mut tx = pool.begin().await?;
    vessel_engine_node::soft_delete_open(&mut tx, vessel_id, node_id)
        .await
        .map_err(ApiError::not_found(ApiStatus::VESSEL_ENGINE_NODE_NOT_FOUND))?;
    tx.commit().await?;
    tracing::info!(%node_id, %vessel_id, "deleted engine node");
    Ok(ApiResponse::no_content())
}

async fn get_node_for_agent(
    State(pool): State<PgPool>,
    agent: NodeAgent,
    Path(node_id): Path<String>,
) -> Result<ApiResponse, ApiError> {
    let node_id = agent.check_path(&node_id)?;
    let mut tx = pool.begin().await?;
    let node = vessel_engine_node::get_open(&mut tx, node_id)
        .await
        .map_err(ApiError::not_found(ApiStatus::VESSEL_ENGINE_NODE_NOT_FOUND))?;
    tx.commit().await?;
    Ok(ApiResponse::ok(node.to_resource_object()))
}

async fn patch_node_by_agent(
    State(pool): State<PgPool>,
    agent: NodeAgent,
    Path(node_id): Path<String>,
    ApiJson(report): ApiJson<NodeReport>,
) -> Result<ApiResponse, ApiError> {
    let node_id = agent.check_path(&node_id)?;
    let fields = report.to_fields()?;
    let mut tx = pool.begin().await?;
    let node = vessel_engine_node::update_open(&mut tx, node_id, &fields)
        .await
        .map_err(ApiError::not_found(ApiStatus::VESSEL_ENGINE_NODE_NOT_FOUND))?;
    vessel_engine::set_mode(&mut tx, node.vessel_engine_id, "managed_cloud").await?;
    tx.commit().await?;
    tracing::info!(
        %node_id,
        status = %node.provisioning_status,
        "node agent reported"
    );
    Ok(ApiResponse::ok(node.to_resource_object()))
}

pub fn create_node_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/vessels/:vessel_id/engine/nodes",
            get(list_nodes).post(create_node),
        )
        .route(
            "/vessels/:vessel_id/engine/nodes/:node_id",
            get(get_node).patch(patch_node).delete(delete_node),
        )
        .route(
            "/vessels/engine/node/:node_id",
            get(get_node_for_agent).patch(patch_node_by_agent),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    use crate::jwt::charter_scope;
    use crate::negotiation::NODE_AGENT_MEDIA_TYPE;
    use crate::vessel::tests::{MEDIA, captain, harness, token};

    #[test]
    fn node_bodies_validate_choices() {
        let body: NodeBody =
            serde_json::from_value(json!({"name": "n1", "nodeType": "master"})).unwrap();
        assert_eq!(body.to_fields(None, true).unwrap_err().pointer(), "/nodeType");

        let body: NodeBody = serde_json::from_value(json!({"cpu": "4"})).unwrap();
        assert_eq!(body.to_fields(None, true).unwrap_err().pointer(), "/name");
        assert_eq!(body.to_fields(None, false).unwrap().cpu, Some("4"));
    }

    #[test]
    fn reports_may_only_settle_nodes() {
        let report: NodeReport =
            serde_json::from_value(json!({"provisioningStatus": "imported"})).unwrap();
        assert!(report.to_fields().is_err());

        let report: NodeReport =
            serde_json::from_value(json!({"osMetadata": ["linux"]})).unwrap();
        assert_eq!(report.to_fields().unwrap_err().pointer(), "/osMetadata");

        let report: NodeReport = serde_json::from_value(json!({
            "provisioningStatus": "ready",
            "memory": "16777216000",
            "osMetadata": {"os": "linux"}
        }))
        .unwrap();
        let fields = report.to_fields().unwrap();
        assert_eq!(fields.provisioning_status, Some("ready"));
        assert_eq!(fields.os_metadata, Some(json!({"os": "linux"})));
    }

    #[tokio::test]
    async fn node_agent_settles_its_node() {
        let Some((server, keys, fixture)) = harness().await else {
            return;
        };
        let captain = captain(&keys, &fixture);
        let base = format!("/vessels/{}/engine/nodes", fixture.vessel_id);
        let response = server
            .post(&base)
            .authorization_bearer(&captain)
            .json(&json!({"name": "controller-1", "nodeType": "controller", "ipAddress": "10.0.0.10"}))
            .content_type(MEDIA)
            .await;
        response.assert_status(StatusCode::CREATED);
        let created: Value = response.json();
        let node_id = created["data"]["id"].as_str().unwrap().to_string();
        assert_eq!(created["data"]["attributes"]["vesselEngineId"], json!(fixture.engine_id));
        let node_token = created["data"]["attributes"]["token"]
            .as_str()
            .unwrap()
            .to_string();

        // the captain's access token is not a node agent token
        server
            .get(&format!("/vessels/engine/node/{}", node_id))
            .authorization_bearer(&captain)
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
        let response = server
            .get(&format!("/vessels/engine/node/{}", Uuid::new_v4()))
            .authorization_bearer(&node_token)
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json::<Value>()["errors"][0]["status"], 2301);

        let deckhand = token(
            &keys,
            Uuid::new_v4(),
            &[(
                charter_scope(fixture.vessel_id, fixture.charter_id),
                CrewRole::CharterDeckhand,
            )],
        );
        let response = server
            .get(&format!("{}/{}", base, node_id))
            .authorization_bearer(&deckhand)
            .await;
        response.assert_status_ok();
        assert!(response.json::<Value>()["data"]["attributes"]
            .get("token")
            .is_none());

        server
            .get(&format!("/vessels/engine/node/{}", node_id))
            .authorization_bearer(&node_token)
            .await
            .assert_status_ok();
        let response = server
            .patch(&format!("/vessels/engine/node/{}", node_id))
            .authorization_bearer(&node_token)
            .json(&json!({
                "provisioningStatus": "ready",
                "cpu": "8",
                "memory": "16777216000",
                "osMetadata": {"os": "linux", "arch": "amd64"}
            }))
            .content_type(NODE_AGENT_MEDIA_TYPE)
            .await;
        response.assert_status_ok();
        assert_eq!(
            response.json::<Value>()["data"]["attributes"]["provisioningStatus"],
            "ready"
        );

        // a settled node is closed to its agent, keeps no token and cannot be deleted
        server
            .get(&format!("/vessels/engine/node/{}", node_id))
            .authorization_bearer(&node_token)
            .await
            .assert_status(StatusCode::NOT_FOUND);
        let response = server
            .get(&format!("{}/{}", base, node_id))
            .authorization_bearer(&captain)
            .await;
        response.assert_status_ok();
        assert!(response.json::<Value>()["data"]["attributes"]
            .get("token")
            .is_none());
        server
            .delete(&format!("{}/{}", base, node_id))
            .authorization_bearer(&captain)
            .await
            .assert_status(StatusCode::NOT_FOUND);

        let response = server
            .get(&format!("/vessels/{}/engines", fixture.vessel_id))
            .authorization_bearer(&captain)
            .await;
        assert_eq!(
            response.json::<Value>()["data"][0]["attributes"]["mode"],
            "managed_cloud"
        );
    }

    #[tokio::test]
    async fn regions_with_nodes_stay() {
        let Some((server, keys, fixture)) = harness().await else {
            return;
        };
        let captain = captain(&keys, &fixture);
        let regions = format!("/vessels/{}/engine/regions", fixture.vessel_id);
        let response = server
            .post(&regions)
            .authorization_bearer(&captain)
            .json(&json!({"name": "ams-1", "geoRegion": "eu"}))
            .content_type(MEDIA)
            .await;
        let region_id = response.json::<Value>()["data"]["id"]
            .as_str()
            .unwrap()
            .to_string();
        let response = server
            .post(&format!("/vessels/{}/engine/nodes", fixture.vessel_id))
            .authorization_bearer(&captain)
            .json(&json!({"name": "worker-1", "vesselEngineRegionId": region_id}))
            .content_type(MEDIA)
            .await;
        response.assert_status(StatusCode::CREATED);
        let node_id = response.json::<Value>()["data"]["id"]
            .as_str()
            .unwrap()
            .to_string();

        let response = server
            .delete(&format!("{}/{}", regions, region_id))
            .authorization_bearer(&captain)
            .await;
        response.assert_status(StatusCode::CONFLICT);
        assert_eq!(response.json::<Value>()["errors"][0]["status"], 2201);

        server
            .delete(&format!(
                "/vessels/{}/engine/nodes/{}",
                fixture.vessel_id, node_id
            ))
            .authorization_bearer(&captain)
            .await
            .assert_status(StatusCode::NO_CONTENT);
        server
            .delete(&format!("{}/{}", regions, region_id))
            .authorization_bearer(&captain)
            .await
            .assert_status(StatusCode::NO_CONTENT);
    }
}
