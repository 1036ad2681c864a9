//! Engine regions: where a vessel's nodes are placed.
//!
//! Any crew member reads regions; only the vessel captain changes them. A
//! region that still holds nodes cannot be deleted.

use axum::Router;
use axum::extract::{Path, State};
use axum::routing::get;
use serde::Deserialize;
use serde_json::{Value, json};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::api_status::{ApiError, ApiStatus};
use crate::auth::{ANY_ROLE, AuthUser};
use crate::json_api::{ApiResponse, Resource, collection};
use crate::jwt::CrewRole;
use crate::pagination::{PageQuery, Pagination};
use crate::router::AppState;
use crate::sql::vessel_engine_region::{self, RegionFields, VesselEngineRegionRecord};
use crate::sql::{vessel_engine, vessel_engine_node};
use crate::validate::{self, ApiJson, ApiQuery, ValidationError, parse_uuid};

/// Geographic regions a region may be placed in.
pub const GEO_REGIONS: &[&str] = &["eu", "usa", "na", "latam", "apac", "africa"];

const WRITE_ROLES: &[CrewRole] = &[CrewRole::VesselCaptain];

impl Resource for VesselEngineRegionRecord {
    const TYPE: &'static str = "VesselEngineRegion";

    fn id(&self) -> Uuid {
        self.id
    }

    fn attributes(&self) -> Value {
        json!({
            "vesselId": self.vessel_id,
            "vesselEngineId": self.vessel_engine_id,
            "name": self.name,
            "providerName": self.provider_name,
            "geoRegion": self.geo_region,
            "locationCity": self.location_city,
            "locationCountry": self.location_country,
            "createdAt": self.created_at,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionBody {
    pub vessel_engine_id: Option<String>,
    pub name: Option<String>,
    pub provider_name: Option<String>,
    pub geo_region: Option<String>,
    pub location_city: Option<String>,
    pub location_country: Option<String>,
}

impl RegionBody {
    fn engine_id(&self) -> Result<Option<Uuid>, ApiError> {
        self.vessel_engine_id.as_deref().map(parse_uuid).transpose()
    }

    fn geo_region(&self) -> Result<Option<&str>, ValidationError> {
        let geo_region = validate::not_blank(&self.geo_region, "geoRegion")?;
        if let Some(geo_region) = geo_region {
            validate::one_of(geo_region, "geoRegion", GEO_REGIONS)?;
        }
        Ok(geo_region)
    }

    /// Validates a create body; `name` and `geoRegion` are required.
    pub fn to_new(&self, vessel_engine_id: Option<Uuid>) -> Result<RegionFields<'_>, ValidationError> {
        let name = validate::required(&self.name, "name")?;
        validate::required(&self.geo_region, "geoRegion")?;
        Ok(RegionFields {
            vessel_engine_id,
            name: Some(name),
            provider_name: self.provider_name.as_deref(),
            geo_region: self.geo_region()?,
            location_city: self.location_city.as_deref(),
            location_country: self.location_country.as_deref(),
        })
    }

    /// Validates a patch body; absent properties are kept.
    pub fn to_changes(
        &self,
        vessel_engine_id: Option<Uuid>,
    ) -> Result<RegionFields<'_>, ValidationError> {
        Ok(RegionFields {
            vessel_engine_id,
            name: validate::not_blank(&self.name, "name")?,
            provider_name: self.provider_name.as_deref(),
            geo_region: self.geo_region()?,
            location_city: self.location_city.as_deref(),
            location_country: self.location_country.as_deref(),
        })
    }
}

/// Fails with `VESSEL_ENGINE_NOT_FOUND` unless the engine is live on the vessel.
pub(crate) async fn require_engine(
    tx: &mut Transaction<'_, Postgres>,
    vessel_id: Uuid,
    vessel_engine_id: Uuid,
) -> Result<vessel_engine::VesselEngineRecord, ApiError> {
    vessel_engine::get(tx, vessel_id, vessel_engine_id)
        .await
        .map_err(ApiError::not_found(ApiStatus::VESSEL_ENGINE_NOT_FOUND))
}

fn region_path(vessel_id: &str, region_id: &str) -> Result<(Uuid, Uuid), ApiError> {
    Ok((parse_uuid(vessel_id)?, parse_uuid(region_id)?))
}

async fn list_regions(
    State(pool): State<PgPool>,
    caller: AuthUser,
    Path(vessel_id): Path<String>,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> Result<ApiResponse, ApiError> {
    let vessel_id = parse_uuid(&vessel_id)?;
    caller.authorize(ANY_ROLE, vessel_id, None)?;
    let pagination = Pagination::from(&query);
    let mut tx = pool.begin().await?;
    let (regions, total) = vessel_engine_region::list(&mut tx, vessel_id, &pagination).await?;
    tx.commit().await?;
    Ok(ApiResponse::ok(collection(&regions)).with_meta(pagination.meta(total)))
}

async fn get_region(
    State(pool): State<PgPool>,
    caller: AuthUser,
    Path((vessel_id, region_id)): Path<(String, String)>,
) -> Result<ApiResponse, ApiError> {
    let (vessel_id, region_id) = region_path(&vessel_id, &region_id)?;
    caller.authorize(ANY_ROLE, vessel_id, None)?;
    let mut tx = pool.begin().await?;
    let region = vessel_engine_region::get(&mut tx, vessel_id, region_id)
        .await
        .map_err(ApiError::not_found(ApiStatus::VESSEL_REGION_NOT_FOUND))?;
    tx.commit().await?;
    Ok(ApiResponse::ok(region.to_resource_object()))
}

async fn create_region(
    State(pool): State<PgPool>,
    caller: AuthUser,
    Path(vessel_id): Path<String>,
    ApiJson(body): ApiJson<RegionBody>,
) -> Result<ApiResponse, ApiError> {
    let vessel_id = parse_uuid(&vessel_id)?;
    caller.authorize(WRITE_ROLES, vessel_id, None)?;
    let engine_id = body.engine_id()?;
    let fields = body.to_new(engine_id)?;
    let mut tx = pool.begin().await?;
    if let Some(engine_id) = engine_id {
        require_engine(&mut tx, vessel_id, engine_id).await?;
    }
    let region = vessel_engine_region::create(&mut tx, vessel_id, &fields).await?;
    tx.commit().await?;
    tracing::info!(region_id = %region.id, %vessel_id, "created engine region");
    Ok(ApiResponse::created(region.to_resource_object()))
}

async fn patch_region(
    State(pool): State<PgPool>,
    caller: AuthUser,
    Path((vessel_id, region_id)): Path<(String, String)>,
    ApiJson(body): ApiJson<RegionBody>,
) -> Result<ApiResponse, ApiError> {
    let (vessel_id, region_id) = region_path(&vessel_id, &region_id)?;
    caller.authorize(WRITE_ROLES, vessel_id, None)?;
    let engine_id = body.engine_id()?;
    let changes = body.to_changes(engine_id)?;
    let mut tx = pool.begin().await?;
    if let Some(engine_id) = engine_id {
        require_engine(&mut tx, vessel_id, engine_id).await?;
    }
    let region = vessel_engine_region::update(&mut tx, vessel_id, region_id, &changes)
        .await
        .map_err(ApiError::not_found(ApiStatus::VESSEL_REGION_NOT_FOUND))?;
    tx.commit().await?;
    Ok(ApiResponse::ok(region.to_resource_object()))
}

async fn delete_region(
    State(pool): State<PgPool>,
    caller: AuthUser,
    Path((vessel_id, region_id)): Path<(String, String)>,
) -> Result<ApiResponse, ApiError> {
    let (vessel_id, region_id) = region_path(&vessel_id, &region_id)?;
    caller.authorize(WRITE_ROLES, vessel_id, None)?;
    let mut tx = pool.begin().await?;
    if vessel_engine_node::count_in_region(&mut tx, vessel_id, region_id).await? > 0 {
        return Err(ApiError::new(
            ApiStatus::VESSEL_REGION_DELETE_FAILURE_ACTIVE_NODES,
        ));
    }
    vessel_engine_region::soft_delete(&mut tx, vessel_id, region_id)
        .await
        .map_err(ApiError::not_found(ApiStatus::VESSEL_REGION_NOT_FOUND))?;
    tx.commit().await?;
    tracing::info!(%region_id, %vessel_id, "deleted engine region");
    Ok(ApiResponse::no_content())
}

pub fn create_region_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/vessels/:vessel_id/engine/regions",
            get(list_regions).post(create_region),
        )
        .route(
            "/vessels/:vessel_id/engine/regions/:region_id",
            get(get_region).patch(patch_region).delete(delete_region),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    use crate::jwt::charter_scope;
    use crate::vessel::tests::{MEDIA, captain, harness, token};

    #[test]
    fn create_body_requires_known_geo_region() {
        let body: RegionBody = serde_json::from_value(json!({"name": "ams-1"})).unwrap();
        assert_eq!(body.to_new(None).unwrap_err().pointer(), "/geoRegion");

        let body: RegionBody =
            serde_json::from_value(json!({"name": "ams-1", "geoRegion": "mars"})).unwrap();
        assert_eq!(
            body.to_new(None).unwrap_err().to_string(),
            "property \"geoRegion\" must be one of eu, usa, na, latam, apac, africa"
        );

        let body: RegionBody = serde_json::from_value(json!({"geoRegion": "apac"})).unwrap();
        let changes = body.to_changes(None).unwrap();
        assert_eq!(changes.geo_region, Some("apac"));
        assert!(changes.name.is_none());
    }

    #[tokio::test]
    async fn captain_manages_regions() {
        let Some((server, keys, fixture)) = harness().await else {
            return;
        };
        let captain = captain(&keys, &fixture);
        let base = format!("/vessels/{}/engine/regions", fixture.vessel_id);
        let response = server
            .post(&base)
            .authorization_bearer(&captain)
            .json(&json!({
                "name": "fra-1",
                "geoRegion": "eu",
                "providerName": "Hetzner",
                "vesselEngineId": fixture.engine_id,
            }))
            .content_type(MEDIA)
            .await;
        response.assert_status(StatusCode::CREATED);
        let id = response.json::<Value>()["data"]["id"]
            .as_str()
            .unwrap()
            .to_string();

        let response = server
            .post(&base)
            .authorization_bearer(&captain)
            .json(&json!({"name": "FRA-1", "geoRegion": "eu"}))
            .content_type(MEDIA)
            .await;
        response.assert_status(StatusCode::CONFLICT);
        assert_eq!(response.json::<Value>()["errors"][0]["status"], 2202);

        let response = server
            .patch(&format!("{}/{}", base, id))
            .authorization_bearer(&captain)
            .json(&json!({"locationCity": "Falkenstein"}))
            .content_type(MEDIA)
            .await;
        response.assert_status_ok();
        assert_eq!(
            response.json::<Value>()["data"]["attributes"]["providerName"],
            "Hetzner"
        );

        server
            .delete(&format!("{}/{}", base, id))
            .authorization_bearer(&captain)
            .await
            .assert_status(StatusCode::NO_CONTENT);
        let response = server
            .get(&format!("{}/{}", base, id))
            .authorization_bearer(&captain)
            .await;
        response.assert_status(StatusCode::NOT_FOUND);
        assert_eq!(response.json::<Value>()["errors"][0]["status"], 2200);
    }

    #[tokio::test]
    async fn regions_refuse_foreign_engines_and_non_captains() {
        let Some((server, keys, fixture)) = harness().await else {
            return;
        };
        let base = format!("/vessels/{}/engine/regions", fixture.vessel_id);
        let response = server
            .post(&base)
            .authorization_bearer(&captain(&keys, &fixture))
            .json(&json!({"name": "x", "geoRegion": "eu", "vesselEngineId": Uuid::new_v4()}))
            .content_type(MEDIA)
            .await;
        response.assert_status(StatusCode::NOT_FOUND);
        assert_eq!(response.json::<Value>()["errors"][0]["status"], 2100);

        let charter_captain = token(
            &keys,
            Uuid::new_v4(),
            &[(
                charter_scope(fixture.vessel_id, fixture.charter_id),
                CrewRole::CharterCaptain,
            )],
        );
        server
            .get(&base)
            .authorization_bearer(&charter_captain)
            .await
            .assert_status_ok();
        server
            .post(&base)
            .authorization_bearer(&charter_captain)
            .json(&json!({"name": "y", "geoRegion": "eu"}))
            .content_type(MEDIA)
            .await
            .assert_status(StatusCode::FORBIDDEN);
    }
}
