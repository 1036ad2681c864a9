//! The billing profile a vessel's invoices are addressed to.

use axum::Router;
use axum::extract::{Path, State};
use axum::routing::post;
use serde::Deserialize;
use serde_json::{Value, json};
use sqlx::PgPool;
use uuid::Uuid;

use crate::DataStoreError;
use crate::api_status::{ApiError, ApiStatus};
use crate::auth::AuthUser;
use crate::json_api::{ApiResponse, Resource};
use crate::jwt::CrewRole;
use crate::router::AppState;
use crate::sql::vessel_billing_profile::{self, BillingFields, VesselBillingProfileRecord};
use crate::validate::{self, ApiJson, ValidationError, parse_uuid};

impl Resource for VesselBillingProfileRecord {
    const TYPE: &'static str = "VesselBillingProfile";

    fn id(&self) -> Uuid {
        self.id
    }

    fn attributes(&self) -> Value {
        json!({
            "vesselId": self.vessel_id,
            "companyName": self.company_name,
            "billingTo": self.billing_to,
            "address1": self.address1,
            "address2": self.address2,
            "postalCode": self.postal_code,
            "city": self.city,
            "state": self.state,
            "country": self.country,
            "email": self.email,
            "phone": self.phone,
            "vatNumber": self.vat_number,
            "createdAt": self.created_at,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingProfileBody {
    pub company_name: Option<String>,
    pub billing_to: Option<String>,
    pub address1: Option<String>,
    pub address2: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub vat_number: Option<String>,
}

impl BillingProfileBody {
    pub fn to_fields(&self) -> Result<BillingFields<'_>, ValidationError> {
        let email = validate::required(&self.email, "email")?;
        validate::email(email, "email")?;
        Ok(BillingFields {
            company_name: self.company_name.as_deref(),
            billing_to: validate::required(&self.billing_to, "billingTo")?,
            address1: validate::required(&self.address1, "address1")?,
            address2: self.address2.as_deref(),
            postal_code: validate::required(&self.postal_code, "postalCode")?,
            city: validate::required(&self.city, "city")?,
            state: self.state.as_deref(),
            country: validate::required(&self.country, "country")?,
            email,
            phone: self.phone.as_deref(),
            vat_number: self.vat_number.as_deref(),
        })
    }
}

async fn create_billing_profile(
    State(pool): State<PgPool>,
    caller: AuthUser,
    Path(vessel_id): Path<String>,
    ApiJson(body): ApiJson<BillingProfileBody>,
) -> Result<ApiResponse, ApiError> {
    let vessel_id = parse_uuid(&vessel_id)?;
    caller.authorize(&[CrewRole::VesselCaptain], vessel_id, None)?;
    let fields = body.to_fields()?;
    let mut tx = pool.begin().await?;
    let profile = vessel_billing_profile::create(&mut tx, vessel_id, &fields)
        .await
        .map_err(|err| match err {
            DataStoreError::Constraint(_) => ApiError::from(err),
            err => {
                tracing::error!(error = %err, %vessel_id, "billing profile insert failed");
                ApiError::new(ApiStatus::VESSEL_BILLING_PROFILE_CREATE_FAILURE)
            }
        })?;
    tx.commit().await?;
    tracing::info!(profile_id = %profile.id, %vessel_id, "created billing profile");
    Ok(ApiResponse::created(profile.to_resource_object()))
}

pub fn create_billing_profile_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/vessels/:vessel_id/billing-profile",
            post(create_billing_profile),
        )
        .with_state(state)
}
