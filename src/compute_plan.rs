//! Compute plans: the resource requests, limits and billing settings a
//! charter's workloads are scheduled with.
//!
//! Columns are stored flat; the API nests them as `requests`, `limits` and
//! `billing` objects in both request bodies and resource attributes.

use axum::Router;
use axum::extract::{Path, State};
use axum::routing::get;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use sqlx::PgPool;
use uuid::Uuid;

use crate::api_status::{ApiError, ApiStatus};
use crate::auth::{ANY_ROLE, AuthUser};
use crate::charter::{charter_path, require_charter};
use crate::json_api::{ApiResponse, Resource, collection};
use crate::jwt::CrewRole;
use crate::pagination::{PageQuery, Pagination};
use crate::router::AppState;
use crate::sql::compute_plan::{self, ComputePlanChanges, ComputePlanRecord, NewComputePlan};
use crate::validate::{self, ApiJson, ApiQuery, ValidationError, parse_uuid};

/// Roles that may create, change or delete compute plans.
pub const WRITE_ROLES: &[CrewRole] = &[
    CrewRole::VesselCaptain,
    CrewRole::CharterCaptain,
    CrewRole::CharterPurser,
];

/// Application class of the plans every charter starts with.
pub const DEFAULT_APPLICATION: &str = "applications_databases";

/// Name, CPU and memory of the plans every charter starts with.
const INITIAL_PLANS: [(&str, &str, &str); 5] = [
    ("Compute XS", "0.25", "256Mi"),
    ("Compute S", "0.5", "512Mi"),
    ("Compute M", "1", "1Gi"),
    ("Compute L", "2", "2Gi"),
    ("Compute XL", "4", "4Gi"),
];

/// The plans created together with a charter. Limits equal requests and
/// billing is off.
pub fn initial_compute_plans(vessel_id: Uuid, charter_id: Uuid) -> Vec<NewComputePlan> {
    INITIAL_PLANS
        .iter()
        .map(|(name, cpu, memory)| NewComputePlan {
            vessel_id,
            charter_id,
            name: name.to_string(),
            application: Some(DEFAULT_APPLICATION.to_string()),
            requests_cpu: cpu.to_string(),
            requests_memory: memory.to_string(),
            limits_cpu: Some(cpu.to_string()),
            limits_memory: Some(memory.to_string()),
            billing_enabled: false,
            billing_period: None,
            billing_unit_price: None,
        })
        .collect()
}

impl Resource for ComputePlanRecord {
    const TYPE: &'static str = "CharterComputePlan";

    fn id(&self) -> Uuid {
        self.id
    }

    fn attributes(&self) -> Value {
        let mut attributes = Map::new();
        attributes.insert("vesselId".to_string(), json!(self.vessel_id));
        attributes.insert("charterId".to_string(), json!(self.charter_id));
        attributes.insert("name".to_string(), json!(self.name));
        attributes.insert("application".to_string(), json!(self.application));
        attributes.insert(
            "requests".to_string(),
            json!({"cpu": self.requests_cpu, "memory": self.requests_memory}),
        );
        if self.limits_cpu.is_some() || self.limits_memory.is_some() {
            attributes.insert(
                "limits".to_string(),
                json!({"cpu": self.limits_cpu, "memory": self.limits_memory}),
            );
        }
        attributes.insert(
            "billing".to_string(),
            json!({
                "enabled": self.billing_enabled,
                "period": self.billing_period,
                "unitPrice": self.billing_unit_price,
            }),
        );
        attributes.insert("createdAt".to_string(), json!(self.created_at));
        Value::Object(attributes)
    }
}

////////////////////////////////////////////// Bodies //////////////////////////////////////////////

#[derive(Debug, Default, Deserialize)]
pub struct Resources {
    pub cpu: Option<String>,
    pub memory: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Billing {
    pub enabled: Option<bool>,
    pub period: Option<String>,
    pub unit_price: Option<String>,
}

/// Body of create and patch requests.
#[derive(Debug, Default, Deserialize)]
pub struct ComputePlanBody {
    pub name: Option<String>,
    pub application: Option<String>,
    pub requests: Option<Resources>,
    pub limits: Option<Resources>,
    pub billing: Option<Billing>,
}

fn check_quantities(resources: &Resources, prefix: &str) -> Result<(), ValidationError> {
    if let Some(cpu) = &resources.cpu {
        validate::cpu_quantity(cpu, &format!("{}/cpu", prefix))?;
    }
    if let Some(memory) = &resources.memory {
        validate::memory_quantity(memory, &format!("{}/memory", prefix))?;
    }
    Ok(())
}

impl ComputePlanBody {
    /// Validates a create body into the row to insert.
    pub fn into_new(
        self,
        vessel_id: Uuid,
        charter_id: Uuid,
    ) -> Result<NewComputePlan, ValidationError> {
        let name = validate::required(&self.name, "name")?.to_string();
        let requests = self.requests.unwrap_or_default();
        let requests_cpu = validate::required(&requests.cpu, "requests/cpu")?.to_string();
        let requests_memory = validate::required(&requests.memory, "requests/memory")?.to_string();
        check_quantities(&requests, "requests")?;
        let limits = self.limits.unwrap_or_default();
        check_quantities(&limits, "limits")?;
        let billing = self.billing.unwrap_or_default();
        Ok(NewComputePlan {
            vessel_id,
            charter_id,
            name,
            application: self.application,
            requests_cpu,
            requests_memory,
            limits_cpu: limits.cpu,
            limits_memory: limits.memory,
            billing_enabled: billing.enabled.unwrap_or(false),
            billing_period: billing.period,
            billing_unit_price: billing.unit_price,
        })
    }

    /// Validates a patch body into the columns to change.
    pub fn into_changes(self) -> Result<ComputePlanChanges, ValidationError> {
        let name = validate::not_blank(&self.name, "name")?.map(str::to_string);
        let requests = self.requests.unwrap_or_default();
        check_quantities(&requests, "requests")?;
        let limits = self.limits.unwrap_or_default();
        check_quantities(&limits, "limits")?;
        let billing = self.billing.unwrap_or_default();
        Ok(ComputePlanChanges {
            name,
            application: self.application,
            requests_cpu: requests.cpu,
            requests_memory: requests.memory,
            limits_cpu: limits.cpu,
            limits_memory: limits.memory,
            billing_enabled: billing.enabled,
            billing_period: billing.period,
            billing_unit_price: billing.unit_price,
        })
    }
}

///////////////////////////////////////////// Handlers /////////////////////////////////////////////

async fn list_compute_plans(
    State(pool): State<PgPool>,
    caller: AuthUser,
    Path((vessel_id, charter_id)): Path<(String, String)>,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> Result<ApiResponse, ApiError> {
    let (vessel_id, charter_id) = charter_path(&vessel_id, &charter_id)?;
    caller.authorize(ANY_ROLE, vessel_id, Some(charter_id))?;
    let pagination = Pagination::from(&query);
    let mut tx = pool.begin().await?;
    let (plans, total) = compute_plan::list(&mut tx, vessel_id, charter_id, &pagination).await?;
    tx.commit().await?;
    Ok(ApiResponse::ok(collection(&plans)).with_meta(pagination.meta(total)))
}

async fn get_compute_plan(
    State(pool): State<PgPool>,
    caller: AuthUser,
    Path((vessel_id, charter_id, plan_id)): Path<(String, String, String)>,
) -> Result<ApiResponse, ApiError> {
    let (vessel_id, charter_id) = charter_path(&vessel_id, &charter_id)?;
    let plan_id = parse_uuid(&plan_id)?;
    caller.authorize(ANY_ROLE, vessel_id, Some(charter_id))?;
    let mut tx = pool.begin().await?;
    let plan = compute_plan::get(&mut tx, vessel_id, charter_id, plan_id)
        .await
        .map_err(ApiError::not_found(ApiStatus::COMPUTE_PLAN_NOT_FOUND))?;
    tx.commit().await?;
    Ok(ApiResponse::ok(plan.to_resource_object()))
}

async fn create_compute_plan(
    State(pool): State<PgPool>,
    caller: AuthUser,
    Path((vessel_id, charter_id)): Path<(String, String)>,
    ApiJson(body): ApiJson<ComputePlanBody>,
) -> Result<ApiResponse, ApiError> {
    let (vessel_id, charter_id) = charter_path(&vessel_id, &charter_id)?;
    caller.authorize(WRITE_ROLES, vessel_id, Some(charter_id))?;
    let new_plan = body.into_new(vessel_id, charter_id)?;
    let mut tx = pool.begin().await?;
    require_charter(&mut tx, vessel_id, charter_id).await?;
    let plan = compute_plan::create(&mut tx, &new_plan).await?;
    tx.commit().await?;
    tracing::info!(plan_id = %plan.id, %charter_id, "created compute plan");
    Ok(ApiResponse::created(plan.to_resource_object()))
}

async fn patch_compute_plan(
    State(pool): State<PgPool>,
    caller: AuthUser,
    Path((vessel_id, charter_id, plan_id)): Path<(String, String, String)>,
    ApiJson(body): ApiJson<ComputePlanBody>,
) -> Result<ApiResponse, ApiError> {
    let (vessel_id, charter_id) = charter_path(&vessel_id, &charter_id)?;
    let plan_id = parse_uuid(&plan_id)?;
    caller.authorize(WRITE_ROLES, vessel_id, Some(charter_id))?;
    let changes = body.into_changes()?;
    let mut tx = pool.begin().await?;
    let plan = compute_plan::update(&mut tx, vessel_id, charter_id, plan_id, &changes)
        .await
        .map_err(ApiError::not_found(ApiStatus::COMPUTE_PLAN_NOT_FOUND))?;
    tx.commit().await?;
    Ok(ApiResponse::ok(plan.to_resource_object()))
}

async fn delete_compute_plan(
    State(pool): State<PgPool>,
    caller: AuthUser,
    Path((vessel_id, charter_id, plan_id)): Path<(String, String, String)>,
) -> Result<ApiResponse, ApiError> {
    let (vessel_id, charter_id) = charter_path(&vessel_id, &charter_id)?;
    let plan_id = parse_uuid(&plan_id)?;
    caller.authorize(WRITE_ROLES, vessel_id, Some(charter_id))?;
    let mut tx = pool.begin().await?;
    compute_plan::soft_delete(&mut tx, vessel_id, charter_id, plan_id)
        .await
        .map_err(ApiError::not_found(ApiStatus::COMPUTE_PLAN_NOT_FOUND))?;
    tx.commit().await?;
    tracing::info!(%plan_id, %charter_id, "deleted compute plan");
    Ok(ApiResponse::no_content())
}

pub fn create_compute_plan_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/vessels/:vessel_id/charters/:charter_id/compute-plans",
            get(list_compute_plans).post(create_compute_plan),
        )
        .route(
            "/vessels/:vessel_id/charters/:charter_id/compute-plans/:compute_plan_id",
            get(get_compute_plan)
                .patch(patch_compute_plan)
                .delete(delete_compute_plan),
        )
        .with_state(state)
}
