//! Vessels, the top-level tenant.

use axum::Router;
use axum::extract::{Path, State};
use axum::routing::get;
use serde::Deserialize;
use serde_json::{Value, json};
use sqlx::PgPool;
use uuid::Uuid;

use crate::api_status::{ApiError, ApiStatus};
use crate::auth::{ANY_ROLE, AuthUser};
use crate::json_api::{ApiResponse, Resource, collection};
use crate::jwt::CrewRole;
use crate::pagination::{PageQuery, Pagination};
use crate::router::AppState;
use crate::sql::vessel::{self, VesselRecord};
use crate::validate::{self, ApiJson, ApiQuery, parse_uuid};

impl Resource for VesselRecord {
    const TYPE: &'static str = "Vessel";

    fn id(&self) -> Uuid {
        self.id
    }

    fn attributes(&self) -> Value {
        json!({
            "name": self.name,
            "userId": self.user_id,
            "createdAt": self.created_at,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PatchVessel {
    pub name: Option<String>,
}

/// Lists the vessels the caller holds a role in.
async fn list_vessels(
    State(pool): State<PgPool>,
    caller: AuthUser,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> Result<ApiResponse, ApiError> {
    let pagination = Pagination::from(&query);
    let ids = caller.vessel_ids();
    let mut tx = pool.begin().await?;
    let (vessels, total) = vessel::list(&mut tx, &ids, &pagination).await?;
    tx.commit().await?;
    Ok(ApiResponse::ok(collection(&vessels)).with_meta(pagination.meta(total)))
}

async fn get_vessel(
    State(pool): State<PgPool>,
    caller: AuthUser,
    Path(vessel_id): Path<String>,
) -> Result<ApiResponse, ApiError> {
    let vessel_id = parse_uuid(&vessel_id)?;
    caller.authorize(ANY_ROLE, vessel_id, None)?;
    let mut tx = pool.begin().await?;
    let vessel = vessel::get(&mut tx, vessel_id)
        .await
        .map_err(ApiError::not_found(ApiStatus::VESSEL_NOT_FOUND))?;
    tx.commit().await?;
    Ok(ApiResponse::ok(vessel.to_resource_object()))
}

/// Renames a vessel.
async fn patch_vessel(
    State(pool): State<PgPool>,
    caller: AuthUser,
    Path(vessel_id): Path<String>,
    ApiJson(patch): ApiJson<PatchVessel>,
) -> Result<ApiResponse, ApiError> {
    let vessel_id = parse_uuid(&vessel_id)?;
    caller.authorize(&[CrewRole::VesselCaptain], vessel_id, None)?;
    let name = validate::required(&patch.name, "name")?;
    let mut tx = pool.begin().await?;
    let vessel = vessel::update_name(&mut tx, vessel_id, name)
        .await
        .map_err(ApiError::not_found(ApiStatus::VESSEL_NOT_FOUND))?;
    tx.commit().await?;
    tracing::info!(vessel_id = %vessel.id, "renamed vessel");
    Ok(ApiResponse::ok(vessel.to_resource_object()))
}

pub fn create_vessel_router(state: AppState) -> Router {
    Router::new()
        .route("/vessels", get(list_vessels))
        .route("/vessels/:vessel_id", get(get_vessel).patch(patch_vessel))
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use axum::http::StatusCode;
    use axum_test::TestServer;
    use chrono::Utc;

    use crate::config::ServerConfig;
    use crate::jwt::{JwtKeys, charter_scope, vessel_scope};
    use crate::sql::tests::{Fixture, seed, setup_test_db};

    pub(crate) const MEDIA: &str = "application/vnd.galley.v1+json";

    /// A full router over a fresh database, with a seeded captain.
    pub(crate) async fn harness() -> Option<(TestServer, JwtKeys, Fixture)> {
        harness_with(ServerConfig::default()).await
    }

    pub(crate) async fn harness_with(
        mut config: ServerConfig,
    ) -> Option<(TestServer, JwtKeys, Fixture)> {
        let pool = setup_test_db().await?;
        let fixture = seed(&pool, "captain@example.com").await;
        config.jwt.secret = "test-secret".to_string();
        config.jwt.pepper = "test-pepper".to_string();
        let keys = JwtKeys::new(b"test-secret", b"test-pepper");
        let state = AppState::new(pool, config);
        let server = TestServer::new(crate::router::create_router(state)).ok()?;
        Some((server, keys, fixture))
    }

    /// An access token holding exactly `scopes`.
    pub(crate) fn token(keys: &JwtKeys, user_id: Uuid, scopes: &[(String, CrewRole)]) -> String {
        let scp: BTreeMap<String, CrewRole> = scopes.iter().cloned().collect();
        keys.issue_access(user_id, scp, false).unwrap()
    }

    pub(crate) fn captain(keys: &JwtKeys, fixture: &Fixture) -> String {
        token(
            keys,
            fixture.user_id,
            &[(vessel_scope(fixture.vessel_id), CrewRole::VesselCaptain)],
        )
    }

    #[test]
    fn vessel_resource() {
        let record = VesselRecord {
            id: Uuid::new_v4(),
            name: "Endeavour".to_string(),
            user_id: Uuid::new_v4(),
            created_at: Utc::now(),
        };
        let object = record.to_resource_object();
        assert_eq!(object["type"], "Vessel");
        assert_eq!(object["attributes"]["name"], "Endeavour");
        assert_eq!(object["attributes"]["userId"], json!(record.user_id));
    }

    #[tokio::test]
    async fn captain_reads_and_renames() {
        let Some((server, keys, fixture)) = harness().await else {
            return;
        };
        let token = captain(&keys, &fixture);

        let response = server.get("/vessels").authorization_bearer(&token).await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["data"][0]["id"], json!(fixture.vessel_id));
        assert_eq!(body["meta"]["count"], 1);

        let response = server
            .patch(&format!("/vessels/{}", fixture.vessel_id))
            .authorization_bearer(&token)
            .json(&json!({"name": "Resolution"}))
            .content_type(MEDIA)
            .await;
        response.assert_status_ok();
        assert_eq!(
            response.json::<Value>()["data"]["attributes"]["name"],
            "Resolution"
        );
    }

    #[tokio::test]
    async fn charter_crew_reads_but_cannot_rename() {
        let Some((server, keys, fixture)) = harness().await else {
            return;
        };
        let token = token(
            &keys,
            Uuid::new_v4(),
            &[(
                charter_scope(fixture.vessel_id, fixture.charter_id),
                CrewRole::CharterDeckhand,
            )],
        );
        server
            .get(&format!("/vessels/{}", fixture.vessel_id))
            .authorization_bearer(&token)
            .await
            .assert_status_ok();
        server
            .patch(&format!("/vessels/{}", fixture.vessel_id))
            .authorization_bearer(&token)
            .json(&json!({"name": "Mutiny"}))
            .content_type(MEDIA)
            .await
            .assert_status(StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn other_vessels_are_forbidden() {
        let Some((server, keys, fixture)) = harness().await else {
            return;
        };
        let token = captain(&keys, &fixture);
        let response = server
            .get(&format!("/vessels/{}", Uuid::new_v4()))
            .authorization_bearer(&token)
            .await;
        response.assert_status(StatusCode::FORBIDDEN);
        assert_eq!(response.json::<Value>()["errors"][0]["status"], 1100);

        server
            .get("/vessels/not-a-uuid")
            .authorization_bearer(&token)
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }
}
