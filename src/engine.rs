//! Vessel engines: the clusters a vessel's workloads run on.

use axum::Router;
use axum::extract::{Path, State};
use axum::routing::get;
use serde_json::{Value, json};
use sqlx::PgPool;
use uuid::Uuid;

use crate::api_status::ApiError;
use crate::auth::{ANY_ROLE, AuthUser};
use crate::json_api::{ApiResponse, Resource, collection};
use crate::pagination::{PageQuery, Pagination};
use crate::router::AppState;
use crate::sql::vessel_engine::{self, VesselEngineRecord};
use crate::validate::{ApiQuery, parse_uuid};

impl Resource for VesselEngineRecord {
    const TYPE: &'static str = "VesselEngine";

    fn id(&self) -> Uuid {
        self.id
    }

    fn attributes(&self) -> Value {
        json!({
            "vesselId": self.vessel_id,
            "name": self.name,
            "mode": self.mode,
            "agentConnectionStatus": self.agent_connection_status,
            "lastConnectionError": self.last_connection_error,
            "lastAgentConnectionAt": self.last_agent_connection_at,
            "createdAt": self.created_at,
        })
    }
}

async fn list_engines(
    State(pool): State<PgPool>,
    caller: AuthUser,
    Path(vessel_id): Path<String>,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> Result<ApiResponse, ApiError> {
    let vessel_id = parse_uuid(&vessel_id)?;
    caller.authorize(ANY_ROLE, vessel_id, None)?;
    let pagination = Pagination::from(&query);
    let mut tx = pool.begin().await?;
    let (engines, total) = vessel_engine::list(&mut tx, vessel_id, &pagination).await?;
    tx.commit().await?;
    Ok(ApiResponse::ok(collection(&engines)).with_meta(pagination.meta(total)))
}

pub fn create_engine_router(state: AppState) -> Router {
    Router::new()
        .route("/vessels/:vessel_id/engines", get(list_engines))
        .with_state(state)
}
