//! Projects: the workloads of a charter, one per name and environment.

use axum::Router;
use axum::extract::{Path, State};
use axum::routing::get;
use serde::Deserialize;
use serde_json::{Value, json};
use sqlx::PgPool;
use uuid::Uuid;

use crate::api_status::{ApiError, ApiStatus};
use crate::auth::{ANY_ROLE, AuthUser};
use crate::charter::{charter_path, require_charter};
use crate::json_api::{ApiResponse, Resource, collection};
use crate::jwt::CrewRole;
use crate::pagination::{PageQuery, Pagination};
use crate::router::AppState;
use crate::sql::project::{self, ProjectChanges, ProjectRecord};
use crate::validate::{self, ApiJson, ApiQuery, parse_uuid};

/// Roles that may create, change or delete projects.
pub const WRITE_ROLES: &[CrewRole] = &[
    CrewRole::VesselCaptain,
    CrewRole::CharterCaptain,
    CrewRole::CharterBoatswain,
];

impl Resource for ProjectRecord {
    const TYPE: &'static str = "CharterProject";

    fn id(&self) -> Uuid {
        self.id
    }

    fn attributes(&self) -> Value {
        json!({
            "vesselId": self.vessel_id,
            "charterId": self.charter_id,
            "name": self.name,
            "environment": self.environment,
            "purpose": self.purpose,
            "createdAt": self.created_at,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ProjectBody {
    pub name: Option<String>,
    pub environment: Option<String>,
    pub purpose: Option<String>,
}

async fn list_projects(
    State(pool): State<PgPool>,
    caller: AuthUser,
    Path((vessel_id, charter_id)): Path<(String, String)>,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> Result<ApiResponse, ApiError> {
    let (vessel_id, charter_id) = charter_path(&vessel_id, &charter_id)?;
    caller.authorize(ANY_ROLE, vessel_id, Some(charter_id))?;
    let pagination = Pagination::from(&query);
    let mut tx = pool.begin().await?;
    require_charter(&mut tx, vessel_id, charter_id).await?;
    let (projects, total) = project::list(&mut tx, vessel_id, charter_id, &pagination).await?;
    tx.commit().await?;
    Ok(ApiResponse::ok(collection(&projects)).with_meta(pagination.meta(total)))
}

async fn get_project(
    State(pool): State<PgPool>,
    caller: AuthUser,
    Path((vessel_id, charter_id, project_id)): Path<(String, String, String)>,
) -> Result<ApiResponse, ApiError> {
    let (vessel_id, charter_id) = charter_path(&vessel_id, &charter_id)?;
    let project_id = parse_uuid(&project_id)?;
    caller.authorize(ANY_ROLE, vessel_id, Some(charter_id))?;
    let mut tx = pool.begin().await?;
    let found = project::get(&mut tx, vessel_id, charter_id, project_id)
        .await
        .map_err(ApiError::not_found(ApiStatus::PROJECT_NOT_FOUND))?;
    tx.commit().await?;
    Ok(ApiResponse::ok(found.to_resource_object()))
}

async fn create_project(
    State(pool): State<PgPool>,
    caller: AuthUser,
    Path((vessel_id, charter_id)): Path<(String, String)>,
    ApiJson(body): ApiJson<ProjectBody>,
) -> Result<ApiResponse, ApiError> {
    let (vessel_id, charter_id) = charter_path(&vessel_id, &charter_id)?;
    caller.authorize(WRITE_ROLES, vessel_id, Some(charter_id))?;
    let name = validate::required(&body.name, "name")?;
    let environment = validate::required(&body.environment, "environment")?;
    let purpose = validate::not_blank(&body.purpose, "purpose")?;

    let mut tx = pool.begin().await?;
    require_charter(&mut tx, vessel_id, charter_id).await?;
    let created = project::create(&mut tx, vessel_id, charter_id, name, environment, purpose).await?;
    tx.commit().await?;
    tracing::info!(project_id = %created.id, %charter_id, "created project");
    Ok(ApiResponse::created(created.to_resource_object()))
}

async fn patch_project(
    State(pool): State<PgPool>,
    caller: AuthUser,
    Path((vessel_id, charter_id, project_id)): Path<(String, String, String)>,
    ApiJson(body): ApiJson<ProjectBody>,
) -> Result<ApiResponse, ApiError> {
    let (vessel_id, charter_id) = charter_path(&vessel_id, &charter_id)?;
    let project_id = parse_uuid(&project_id)?;
    caller.authorize(WRITE_ROLES, vessel_id, Some(charter_id))?;
    let changes = ProjectChanges {
        name: validate::not_blank(&body.name, "name")?,
        environment: validate::not_blank(&body.environment, "environment")?,
        purpose: body.purpose.as_deref(),
    };
    let mut tx = pool.begin().await?;
    let updated = project::update(&mut tx, vessel_id, charter_id, project_id, &changes)
        .await
        .map_err(ApiError::not_found(ApiStatus::PROJECT_NOT_FOUND))?;
    tx.commit().await?;
    Ok(ApiResponse::ok(updated.to_resource_object()))
}

async fn delete_project(
    State(pool): State<PgPool>,
    caller: AuthUser,
    Path((vessel_id, charter_id, project_id)): Path<(String, String, String)>,
) -> Result<ApiResponse, ApiError> {
    let (vessel_id, charter_id) = charter_path(&vessel_id, &charter_id)?;
    let project_id = parse_uuid(&project_id)?;
    caller.authorize(WRITE_ROLES, vessel_id, Some(charter_id))?;
    let mut tx = pool.begin().await?;
    project::soft_delete(&mut tx, vessel_id, charter_id, project_id)
        .await
        .map_err(ApiError::not_found(ApiStatus::PROJECT_NOT_FOUND))?;
    tx.commit().await?;
    tracing::info!(%project_id, %charter_id, "deleted project");
    Ok(ApiResponse::no_content())
}

pub fn create_project_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/vessels/:vessel_id/charters/:charter_id/projects",
            get(list_projects).post(create_project),
        )
        .route(
            "/vessels/:vessel_id/charters/:charter_id/projects/:project_id",
            get(get_project).patch(patch_project).delete(delete_project),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    use crate::jwt::charter_scope;
    use crate::vessel::tests::{MEDIA, captain, harness, token};

    #[tokio::test]
    async fn boatswain_manages_projects() {
        let Some((server, keys, fixture)) = harness().await else {
            return;
        };
        let base = format!(
            "/vessels/{}/charters/{}/projects",
            fixture.vessel_id, fixture.charter_id
        );
        let boatswain = token(
            &keys,
            Uuid::new_v4(),
            &[(
                charter_scope(fixture.vessel_id, fixture.charter_id),
                CrewRole::CharterBoatswain,
            )],
        );
        let response = server
            .post(&base)
            .authorization_bearer(&boatswain)
            .json(&json!({"name": "web", "environment": "staging", "purpose": "storefront"}))
            .content_type(MEDIA)
            .await;
        response.assert_status(StatusCode::CREATED);
        let body: Value = response.json();
        assert_eq!(body["data"]["type"], "CharterProject");
        let id = body["data"]["id"].as_str().unwrap().to_string();

        let response = server
            .patch(&format!("{}/{}", base, id))
            .authorization_bearer(&boatswain)
            .json(&json!({"environment": "production"}))
            .content_type(MEDIA)
            .await;
        response.assert_status_ok();
        let attributes = &response.json::<Value>()["data"]["attributes"];
        assert_eq!(attributes["environment"], "production");
        assert_eq!(attributes["purpose"], "storefront");

        let response = server.get(&base).authorization_bearer(&boatswain).await;
        assert_eq!(response.json::<Value>()["meta"]["count"], 1);
    }

    #[tokio::test]
    async fn same_name_other_environment() {
        let Some((server, keys, fixture)) = harness().await else {
            return;
        };
        let base = format!(
            "/vessels/{}/charters/{}/projects",
            fixture.vessel_id, fixture.charter_id
        );
        let token = captain(&keys, &fixture);
        for environment in ["staging", "production"] {
            server
                .post(&base)
                .authorization_bearer(&token)
                .json(&json!({"name": "api", "environment": environment}))
                .content_type(MEDIA)
                .await
                .assert_status(StatusCode::CREATED);
        }
        let response = server
            .post(&base)
            .authorization_bearer(&token)
            .json(&json!({"name": "API", "environment": "staging"}))
            .content_type(MEDIA)
            .await;
        response.assert_status(StatusCode::CONFLICT);
        assert_eq!(response.json::<Value>()["errors"][0]["status"], 1701);
    }

    #[tokio::test]
    async fn validation_and_missing_charter() {
        let Some((server, keys, fixture)) = harness().await else {
            return;
        };
        let token = captain(&keys, &fixture);
        let base = format!(
            "/vessels/{}/charters/{}/projects",
            fixture.vessel_id, fixture.charter_id
        );
        let response = server
            .post(&base)
            .authorization_bearer(&token)
            .json(&json!({"name": "api"}))
            .content_type(MEDIA)
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let error = &response.json::<Value>()["errors"][0];
        assert_eq!(error["status"], 1101);
        assert_eq!(error["source"]["pointer"], "/environment");

        let response = server
            .post(&format!(
                "/vessels/{}/charters/{}/projects",
                fixture.vessel_id,
                Uuid::new_v4()
            ))
            .authorization_bearer(&token)
            .json(&json!({"name": "api", "environment": "staging"}))
            .content_type(MEDIA)
            .await;
        response.assert_status(StatusCode::NOT_FOUND);
        assert_eq!(response.json::<Value>()["errors"][0]["status"], 1401);
    }

    #[tokio::test]
    async fn deckhand_cannot_write() {
        let Some((server, keys, fixture)) = harness().await else {
            return;
        };
        let deckhand = token(
            &keys,
            Uuid::new_v4(),
            &[(
                charter_scope(fixture.vessel_id, fixture.charter_id),
                CrewRole::CharterDeckhand,
            )],
        );
        server
            .post(&format!(
                "/vessels/{}/charters/{}/projects",
                fixture.vessel_id, fixture.charter_id
            ))
            .authorization_bearer(&deckhand)
            .json(&json!({"name": "api", "environment": "staging"}))
            .content_type(MEDIA)
            .await
            .assert_status(StatusCode::FORBIDDEN);
    }
}
