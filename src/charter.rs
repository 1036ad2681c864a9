//! Charters: the sub-teams of a vessel that own projects, compute plans and
//! connections.

use axum::Router;
use axum::extract::{Path, State};
use axum::routing::get;
use serde::Deserialize;
use serde_json::{Value, json};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::api_status::{ApiError, ApiStatus};
use crate::auth::{ANY_ROLE, AuthUser};
use crate::compute_plan::initial_compute_plans;
use crate::json_api::{ApiResponse, Resource, collection};
use crate::jwt::CrewRole;
use crate::pagination::{PageQuery, Pagination};
use crate::router::AppState;
use crate::sql::charter::{self, CharterRecord};
use crate::sql::{compute_plan, project};
use crate::validate::{self, ApiJson, ApiQuery, parse_uuid};

/// Roles that may read a single charter.
const READ_ROLES: &[CrewRole] = &[
    CrewRole::VesselCaptain,
    CrewRole::CharterCaptain,
    CrewRole::CharterBoatswain,
    CrewRole::CharterPurser,
    CrewRole::CharterSteward,
    CrewRole::CharterDeckhand,
];

/// Roles that may change a charter.
const PATCH_ROLES: &[CrewRole] = &[CrewRole::VesselCaptain, CrewRole::CharterCaptain];

impl Resource for CharterRecord {
    const TYPE: &'static str = "Charter";

    fn id(&self) -> Uuid {
        self.id
    }

    fn attributes(&self) -> Value {
        json!({
            "vesselId": self.vessel_id,
            "name": self.name,
            "description": self.description,
            "userId": self.user_id,
            "createdAt": self.created_at,
        })
    }
}

/// Parses the `{vesselId}/charters/{charterId}` path segments.
pub(crate) fn charter_path(vessel_id: &str, charter_id: &str) -> Result<(Uuid, Uuid), ApiError> {
    Ok((parse_uuid(vessel_id)?, parse_uuid(charter_id)?))
}

/// Fails with `CHARTER_NOT_FOUND` unless the charter is live.
pub(crate) async fn require_charter(
    tx: &mut Transaction<'_, Postgres>,
    vessel_id: Uuid,
    charter_id: Uuid,
) -> Result<CharterRecord, ApiError> {
    charter::get(tx, vessel_id, charter_id)
        .await
        .map_err(ApiError::not_found(ApiStatus::CHARTER_NOT_FOUND))
}

#[derive(Debug, Default, Deserialize)]
pub struct CharterBody {
    pub name: Option<String>,
    pub description: Option<String>,
}

/// Lists every charter to a vessel captain and the caller's own charters to
/// everyone else.
async fn list_charters(
    State(pool): State<PgPool>,
    caller: AuthUser,
    Path(vessel_id): Path<String>,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> Result<ApiResponse, ApiError> {
    let vessel_id = parse_uuid(&vessel_id)?;
    caller.authorize(ANY_ROLE, vessel_id, None)?;
    let pagination = Pagination::from(&query);
    let only = match caller.vessel_role(vessel_id) {
        Some(CrewRole::VesselCaptain) => None,
        _ => Some(caller.charter_ids(vessel_id)),
    };
    let mut tx = pool.begin().await?;
    let (charters, total) = charter::list(&mut tx, vessel_id, only.as_deref(), &pagination).await?;
    tx.commit().await?;
    Ok(ApiResponse::ok(collection(&charters)).with_meta(pagination.meta(total)))
}

/// Creates a charter together with its initial compute plans.
async fn create_charter(
    State(pool): State<PgPool>,
    caller: AuthUser,
    Path(vessel_id): Path<String>,
    ApiJson(body): ApiJson<CharterBody>,
) -> Result<ApiResponse, ApiError> {
    let vessel_id = parse_uuid(&vessel_id)?;
    caller.authorize(&[CrewRole::VesselCaptain], vessel_id, None)?;
    let name = validate::required(&body.name, "name")?;
    let description = validate::not_blank(&body.description, "description")?;

    let mut tx = pool.begin().await?;
    let created = charter::create(&mut tx, vessel_id, name, description, caller.user_id).await?;
    for plan in initial_compute_plans(vessel_id, created.id) {
        compute_plan::create(&mut tx, &plan).await?;
    }
    tx.commit().await?;

    tracing::info!(charter_id = %created.id, %vessel_id, "created charter");
    Ok(ApiResponse::created(created.to_resource_object()))
}

async fn get_charter(
    State(pool): State<PgPool>,
    caller: AuthUser,
    Path((vessel_id, charter_id)): Path<(String, String)>,
) -> Result<ApiResponse, ApiError> {
    let (vessel_id, charter_id) = charter_path(&vessel_id, &charter_id)?;
    caller.authorize(READ_ROLES, vessel_id, Some(charter_id))?;
    let mut tx = pool.begin().await?;
    let found = require_charter(&mut tx, vessel_id, charter_id).await?;
    tx.commit().await?;
    Ok(ApiResponse::ok(found.to_resource_object()))
}

async fn patch_charter(
    State(pool): State<PgPool>,
    caller: AuthUser,
    Path((vessel_id, charter_id)): Path<(String, String)>,
    ApiJson(body): ApiJson<CharterBody>,
) -> Result<ApiResponse, ApiError> {
    let (vessel_id, charter_id) = charter_path(&vessel_id, &charter_id)?;
    caller.authorize(PATCH_ROLES, vessel_id, Some(charter_id))?;
    let name = validate::not_blank(&body.name, "name")?;
    let description = body.description.as_deref();
    let mut tx = pool.begin().await?;
    let updated = charter::update(&mut tx, vessel_id, charter_id, name, description)
        .await
        .map_err(ApiError::not_found(ApiStatus::CHARTER_NOT_FOUND))?;
    tx.commit().await?;
    Ok(ApiResponse::ok(updated.to_resource_object()))
}

/// Soft-deletes a charter that has no live projects.
async fn delete_charter(
    State(pool): State<PgPool>,
    caller: AuthUser,
    Path((vessel_id, charter_id)): Path<(String, String)>,
) -> Result<ApiResponse, ApiError> {
    let (vessel_id, charter_id) = charter_path(&vessel_id, &charter_id)?;
    caller.authorize(&[CrewRole::VesselCaptain], vessel_id, Some(charter_id))?;
    let mut tx = pool.begin().await?;
    require_charter(&mut tx, vessel_id, charter_id).await?;
    let projects = project::count_live(&mut tx, vessel_id, charter_id).await?;
    if projects > 0 {
        tracing::debug!(%charter_id, projects, "refusing to delete charter with projects");
        return Err(ApiError::new(ApiStatus::CHARTER_DELETE_FAILURE_ACTIVE_PROJECTS));
    }
    charter::soft_delete(&mut tx, vessel_id, charter_id)
        .await
        .map_err(ApiError::not_found(ApiStatus::CHARTER_NOT_FOUND))?;
    tx.commit().await?;
    tracing::info!(%charter_id, %vessel_id, "deleted charter");
    Ok(ApiResponse::no_content())
}

pub fn create_charter_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/vessels/:vessel_id/charters",
            get(list_charters).post(create_charter),
        )
        .route(
            "/vessels/:vessel_id/charters/:charter_id",
            get(get_charter).patch(patch_charter).delete(delete_charter),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use chrono::Utc;

    use crate::jwt::{charter_scope, vessel_scope};
    use crate::vessel::tests::{MEDIA, captain, harness, token};

    #[test]
    fn charter_resource() {
        let record = CharterRecord {
            id: Uuid::new_v4(),
            vessel_id: Uuid::new_v4(),
            name: "Survey".to_string(),
            description: None,
            user_id: Uuid::new_v4(),
            created_at: Utc::now(),
        };
        let object = record.to_resource_object();
        assert_eq!(object["type"], "Charter");
        assert_eq!(object["attributes"]["name"], "Survey");
        assert!(object["attributes"]["description"].is_null());
    }

    #[test]
    fn path_ids() {
        let vessel = Uuid::new_v4();
        let charter = Uuid::new_v4();
        assert_eq!(
            charter_path(&vessel.to_string(), &charter.to_string()).unwrap(),
            (vessel, charter)
        );
        assert_eq!(
            charter_path(&vessel.to_string(), "x").unwrap_err().status,
            ApiStatus::UUID_PARSE
        );
    }

    #[tokio::test]
    async fn create_seeds_compute_plans() {
        let Some((server, keys, fixture)) = harness().await else {
            return;
        };
        let token = captain(&keys, &fixture);
        let response = server
            .post(&format!("/vessels/{}/charters", fixture.vessel_id))
            .authorization_bearer(&token)
            .json(&json!({"name": "Platform", "description": "Shared services"}))
            .content_type(MEDIA)
            .await;
        response.assert_status(StatusCode::CREATED);
        let id = response.json::<Value>()["data"]["id"]
            .as_str()
            .unwrap()
            .to_string();

        let response = server
            .get(&format!(
                "/vessels/{}/charters/{}/compute-plans",
                fixture.vessel_id, id
            ))
            .authorization_bearer(&token)
            .await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["meta"]["count"], 5);

        let response = server
            .post(&format!("/vessels/{}/charters", fixture.vessel_id))
            .authorization_bearer(&token)
            .json(&json!({"name": "Platform"}))
            .content_type(MEDIA)
            .await;
        response.assert_status(StatusCode::CONFLICT);
        assert_eq!(response.json::<Value>()["errors"][0]["status"], 1404);
    }

    #[tokio::test]
    async fn crew_sees_only_their_charters() {
        let Some((server, keys, fixture)) = harness().await else {
            return;
        };
        let captain_token = captain(&keys, &fixture);
        server
            .post(&format!("/vessels/{}/charters", fixture.vessel_id))
            .authorization_bearer(&captain_token)
            .json(&json!({"name": "Hidden"}))
            .content_type(MEDIA)
            .await
            .assert_status(StatusCode::CREATED);

        let member = token(
            &keys,
            Uuid::new_v4(),
            &[
                (vessel_scope(fixture.vessel_id), CrewRole::VesselMember),
                (
                    charter_scope(fixture.vessel_id, fixture.charter_id),
                    CrewRole::CharterSteward,
                ),
            ],
        );
        let response = server
            .get(&format!("/vessels/{}/charters", fixture.vessel_id))
            .authorization_bearer(&member)
            .await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["meta"]["count"], 1);
        assert_eq!(body["data"][0]["id"], json!(fixture.charter_id));

        let response = server
            .get(&format!("/vessels/{}/charters", fixture.vessel_id))
            .authorization_bearer(&captain_token)
            .await;
        assert_eq!(response.json::<Value>()["meta"]["count"], 2);
    }

    #[tokio::test]
    async fn delete_refused_while_projects_live() {
        let Some((server, keys, fixture)) = harness().await else {
            return;
        };
        let token = captain(&keys, &fixture);
        let charter_url = format!(
            "/vessels/{}/charters/{}",
            fixture.vessel_id, fixture.charter_id
        );
        let response = server
            .post(&format!("{}/projects", charter_url))
            .authorization_bearer(&token)
            .json(&json!({"name": "api", "environment": "production"}))
            .content_type(MEDIA)
            .await;
        response.assert_status(StatusCode::CREATED);
        let project_id = response.json::<Value>()["data"]["id"]
            .as_str()
            .unwrap()
            .to_string();

        let response = server.delete(&charter_url).authorization_bearer(&token).await;
        response.assert_status(StatusCode::CONFLICT);
        assert_eq!(response.json::<Value>()["errors"][0]["status"], 1403);

        server
            .delete(&format!("{}/projects/{}", charter_url, project_id))
            .authorization_bearer(&token)
            .await
            .assert_status(StatusCode::NO_CONTENT);
        server
            .delete(&charter_url)
            .authorization_bearer(&token)
            .await
            .assert_status(StatusCode::NO_CONTENT);
        server
            .get(&charter_url)
            .authorization_bearer(&token)
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn charter_captain_patches_but_cannot_delete() {
        let Some((server, keys, fixture)) = harness().await else {
            return;
        };
        let charter_url = format!(
            "/vessels/{}/charters/{}",
            fixture.vessel_id, fixture.charter_id
        );
        let charter_captain = token(
            &keys,
            Uuid::new_v4(),
            &[(
                charter_scope(fixture.vessel_id, fixture.charter_id),
                CrewRole::CharterCaptain,
            )],
        );
        let response = server
            .patch(&charter_url)
            .authorization_bearer(&charter_captain)
            .json(&json!({"description": "Coastal survey"}))
            .content_type(MEDIA)
            .await;
        response.assert_status_ok();
        assert_eq!(
            response.json::<Value>()["data"]["attributes"]["description"],
            "Coastal survey"
        );
        server
            .delete(&charter_url)
            .authorization_bearer(&charter_captain)
            .await
            .assert_status(StatusCode::FORBIDDEN);
    }
}
