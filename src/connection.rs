//! OAuth connections of a charter to source and image providers.
//!
//! A connection starts `pending` when a crew member asks for one; the answer
//! carries the provider authorization URL whose `state` is the connection id.
//! Once the provider redirects back, the browser app posts the code to the
//! approve endpoint, which trades it for tokens and marks the connection
//! `active`.

use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use serde::Deserialize;
use serde_json::{Value, json};
use sqlx::PgPool;
use uuid::Uuid;

use crate::api_status::{ApiError, ApiStatus};
use crate::auth::{ANY_ROLE, AuthUser};
use crate::charter::{charter_path, require_charter};
use crate::config::ServerConfig;
use crate::json_api::{ApiResponse, Resource, collection};
use crate::jwt::CrewRole;
use crate::oauth::{self, ConnectionType, OAuthProvider, TokenResponse};
use crate::pagination::{PageQuery, Pagination};
use crate::router::AppState;
use crate::sql::oauth_connection::{
    self, ConnectionFilter, ConnectionRecord, NewConnection, NewCredential,
};
use crate::validate::{ApiJson, ApiQuery, parse_uuid};
use crate::vault::CredentialVault;

/// Roles that may open, approve or revoke connections.
pub const WRITE_ROLES: &[CrewRole] = &[CrewRole::VesselCaptain, CrewRole::CharterCaptain];

const STATUSES: &[&str] = &["pending", "active", "revoked", "error"];

impl Resource for ConnectionRecord {
    const TYPE: &'static str = "OAuthConnection";

    fn id(&self) -> Uuid {
        self.id
    }

    fn attributes(&self) -> Value {
        json!({
            "vesselId": self.vessel_id,
            "charterId": self.charter_id,
            "type": self.connection_type,
            "provider": self.provider,
            "status": self.status,
            "displayName": self.display_name,
            "createdByUserId": self.created_by_user_id,
            "providerAccountId": self.provider_account_id,
            "lastValidatedAt": self.last_validated_at,
            "scopes": self.scopes,
            "createdAt": self.created_at,
            "updatedAt": self.updated_at,
        })
    }
}

/// A freshly opened connection and where to send the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingConnection {
    pub id: Uuid,
    pub authorization_url: String,
}

impl Resource for PendingConnection {
    const TYPE: &'static str = "OAuthConnectionCreate";

    fn id(&self) -> Uuid {
        self.id
    }

    fn attributes(&self) -> Value {
        json!({
            "authorization_url": self.authorization_url,
            "status": "pending",
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateConnection {
    pub provider: Option<String>,
    #[serde(rename = "type")]
    pub connection_type: Option<String>,
    pub display_name: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApproveConnection {
    pub provider: Option<String>,
    pub code: Option<String>,
    pub state: Option<String>,
    pub installation_id: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConnectionQuery {
    pub provider: Option<String>,
    #[serde(rename = "type")]
    pub connection_type: Option<String>,
    pub status: Option<String>,
}

impl ConnectionQuery {
    /// Checks every filter names a known value.
    fn filter(&self) -> Result<ConnectionFilter<'_>, ApiError> {
        let provider = self.provider.as_deref();
        if provider.is_some_and(|p| OAuthProvider::parse(p).is_none()) {
            return Err(ApiError::new(ApiStatus::OAUTH_PROVIDER_MISSING).with_pointer("/provider"));
        }
        let connection_type = self.connection_type.as_deref();
        if connection_type.is_some_and(|t| ConnectionType::parse(t).is_none()) {
            return Err(ApiError::new(ApiStatus::OAUTH_TYPE_MISSING).with_pointer("/type"));
        }
        let status = self.status.as_deref();
        if status.is_some_and(|s| !STATUSES.contains(&s)) {
            return Err(ApiError::new(ApiStatus::FAILED_VALIDATION)
                .with_title(format!("property \"status\" must be one of {}", STATUSES.join(", ")))
                .with_pointer("/status"));
        }
        Ok(ConnectionFilter {
            provider,
            connection_type,
            status,
        })
    }
}

fn provider_of(value: &Option<String>) -> Result<OAuthProvider, ApiError> {
    value
        .as_deref()
        .map(str::trim)
        .and_then(OAuthProvider::parse)
        .ok_or_else(|| ApiError::new(ApiStatus::OAUTH_PROVIDER_MISSING).with_pointer("/provider"))
}

fn present<'a>(value: &'a Option<String>, status: ApiStatus, pointer: &str) -> Result<&'a str, ApiError> {
    match value.as_deref().map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(ApiError::new(status).with_pointer(pointer)),
    }
}

fn seal(vault: &CredentialVault, token: &str) -> Result<String, ApiError> {
    vault.seal(token).map_err(|e| {
        tracing::error!(error = %e, "sealing provider token");
        ApiError::new(ApiStatus::FAILED)
    })
}

/// The stored credential for an approved connection.
fn credential(
    vault: &CredentialVault,
    connection_id: Uuid,
    provider: OAuthProvider,
    installation_id: Option<i64>,
    tokens: &TokenResponse,
    account: &oauth::AccountInfo,
) -> Result<NewCredential, ApiError> {
    let credential_kind = match (provider, installation_id) {
        (OAuthProvider::Github, Some(_)) => "github_app_installation",
        _ => "oauth_token",
    };
    let refresh_token_encrypted = match &tokens.refresh_token {
        Some(token) => Some(seal(vault, token)?),
        None => None,
    };
    Ok(NewCredential {
        connection_id,
        credential_kind: credential_kind.to_string(),
        access_token_encrypted: seal(vault, &tokens.access_token)?,
        refresh_token_encrypted,
        token_type: tokens
            .token_type
            .clone()
            .unwrap_or_else(|| "Bearer".to_string()),
        expires_in: tokens.expires_in,
        installation_id,
        account_login: account.login.clone(),
        account_type: account.account_type.clone(),
    })
}

async fn list_connections(
    State(pool): State<PgPool>,
    caller: AuthUser,
    Path((vessel_id, charter_id)): Path<(String, String)>,
    ApiQuery(page): ApiQuery<PageQuery>,
    ApiQuery(query): ApiQuery<ConnectionQuery>,
) -> Result<ApiResponse, ApiError> {
    let (vessel_id, charter_id) = charter_path(&vessel_id, &charter_id)?;
    caller.authorize(ANY_ROLE, vessel_id, Some(charter_id))?;
    let filter = query.filter()?;
    let pagination = Pagination::from(&page);
    let mut tx = pool.begin().await?;
    require_charter(&mut tx, vessel_id, charter_id).await?;
    let (connections, total) =
        oauth_connection::list(&mut tx, vessel_id, charter_id, &filter, &pagination).await?;
    tx.commit().await?;
    Ok(ApiResponse::ok(collection(&connections)).with_meta(pagination.meta(total)))
}

async fn get_connection(
    State(pool): State<PgPool>,
    caller: AuthUser,
    Path((vessel_id, charter_id, connection_id)): Path<(String, String, String)>,
) -> Result<ApiResponse, ApiError> {
    let (vessel_id, charter_id) = charter_path(&vessel_id, &charter_id)?;
    let connection_id = parse_uuid(&connection_id)?;
    caller.authorize(ANY_ROLE, vessel_id, Some(charter_id))?;
    let mut tx = pool.begin().await?;
    let found = oauth_connection::get(&mut tx, vessel_id, charter_id, connection_id)
        .await
        .map_err(ApiError::not_found(ApiStatus::OAUTH_CONNECTION_NOT_FOUND))?;
    tx.commit().await?;
    Ok(ApiResponse::ok(found.to_resource_object()))
}

/// Opens a pending connection, replacing earlier unapproved attempts for the
/// same provider and type.
async fn create_connection(
    State(pool): State<PgPool>,
    State(config): State<Arc<ServerConfig>>,
    caller: AuthUser,
    Path((vessel_id, charter_id)): Path<(String, String)>,
    ApiJson(body): ApiJson<CreateConnection>,
) -> Result<ApiResponse, ApiError> {
    let (vessel_id, charter_id) = charter_path(&vessel_id, &charter_id)?;
    caller.authorize(WRITE_ROLES, vessel_id, Some(charter_id))?;
    let provider = provider_of(&body.provider)?;
    let connection_type = body
        .connection_type
        .as_deref()
        .and_then(ConnectionType::parse)
        .ok_or_else(|| ApiError::new(ApiStatus::OAUTH_TYPE_MISSING).with_pointer("/type"))?;
    if !provider.supports(connection_type) {
        return Err(ApiError::new(ApiStatus::OAUTH_TYPE_MISMATCH).with_pointer("/type"));
    }
    let client = provider
        .client(&config.oauth)
        .ok_or_else(|| ApiError::new(ApiStatus::OAUTH_PROVIDER_CONFIG_MISSING))?;

    let mut tx = pool.begin().await?;
    require_charter(&mut tx, vessel_id, charter_id).await?;
    let replaced = oauth_connection::delete_pending(
        &mut tx,
        vessel_id,
        charter_id,
        provider.as_str(),
        connection_type.as_str(),
    )
    .await?;
    let connection = oauth_connection::create(
        &mut tx,
        &NewConnection {
            vessel_id,
            charter_id,
            connection_type: connection_type.as_str(),
            provider: provider.as_str(),
            display_name: body.display_name.as_deref(),
            created_by_user_id: caller.user_id,
            scopes: json!(body.scopes),
        },
    )
    .await?;
    let url = oauth::authorization_url(
        &provider.endpoints(client),
        client,
        &provider.redirect_uri(&config.public_url),
        &connection.id.to_string(),
        &body.scopes,
    )
    .map_err(|e| {
        tracing::error!(error = %e, %provider, "building authorization url");
        ApiError::new(ApiStatus::OAUTH_CONNECTION_CREATE_FAILURE)
    })?;
    tx.commit().await?;

    tracing::info!(connection_id = %connection.id, %provider, replaced, "opened connection");
    let pending = PendingConnection {
        id: connection.id,
        authorization_url: url.to_string(),
    };
    Ok(ApiResponse::created(pending.to_resource_object()))
}

/// Completes a pending connection with the code the provider handed back.
async fn approve_connection(
    State(pool): State<PgPool>,
    State(config): State<Arc<ServerConfig>>,
    State(http): State<reqwest::Client>,
    State(vault): State<CredentialVault>,
    caller: AuthUser,
    Path((vessel_id, charter_id)): Path<(String, String)>,
    ApiJson(body): ApiJson<ApproveConnection>,
) -> Result<ApiResponse, ApiError> {
    let (vessel_id, charter_id) = charter_path(&vessel_id, &charter_id)?;
    caller.authorize(WRITE_ROLES, vessel_id, Some(charter_id))?;
    let provider = provider_of(&body.provider)?;
    let code = present(&body.code, ApiStatus::OAUTH_CODE_MISSING, "/code")?;
    let connection_id = present(&body.state, ApiStatus::OAUTH_STATE_MISSING, "/state")?
        .parse::<Uuid>()
        .map_err(|_| ApiError::new(ApiStatus::OAUTH_STATE_MISSING).with_pointer("/state"))?;

    // The provider round trip happens outside any transaction.
    let mut tx = pool.begin().await?;
    let pending = oauth_connection::get(&mut tx, vessel_id, charter_id, connection_id)
        .await
        .map_err(ApiError::not_found(ApiStatus::OAUTH_CONNECTION_NOT_FOUND))?;
    tx.commit().await?;
    if pending.provider != provider.as_str() {
        return Err(ApiError::new(ApiStatus::OAUTH_PROVIDER_MISSING).with_pointer("/provider"));
    }
    if pending.status != "pending" {
        return Err(ApiError::new(ApiStatus::OAUTH_CONNECTION_INACTIVE));
    }
    let client = provider
        .client(&config.oauth)
        .ok_or_else(|| ApiError::new(ApiStatus::OAUTH_PROVIDER_CONFIG_MISSING))?;

    let endpoints = provider.endpoints(client);
    let redirect_uri = provider.redirect_uri(&config.public_url);
    let approval = async {
        let tokens = oauth::exchange_code(&http, &endpoints, client, code, &redirect_uri).await?;
        let account = oauth::fetch_account(&http, provider, &endpoints, &tokens.access_token).await?;
        Ok::<_, oauth::OAuthError>((tokens, account))
    }
    .await;
    let (tokens, account) = match approval {
        Ok(approved) => approved,
        Err(e) => {
            tracing::warn!(error = %e, %connection_id, %provider, "provider refused approval");
            let mut tx = pool.begin().await?;
            if !oauth_connection::mark_error(&mut tx, connection_id).await? {
                tracing::debug!(%connection_id, "connection left pending state concurrently");
            }
            tx.commit().await?;
            return Err(ApiError::new(ApiStatus::OAUTH_CONNECTION_APPROVAL_FAILURE));
        }
    };

    let credential = credential(
        &vault,
        connection_id,
        provider,
        body.installation_id,
        &tokens,
        &account,
    )?;
    let mut tx = pool.begin().await?;
    let connection = oauth_connection::activate(
        &mut tx,
        connection_id,
        &account.id,
        account.login.as_deref(),
    )
    .await
    .map_err(ApiError::not_found(ApiStatus::OAUTH_CONNECTION_NOT_FOUND))?;
    oauth_connection::replace_credentials(&mut tx, &credential).await?;
    let approver = caller.user_id.to_string();
    for permission in ["manage", "revoke"] {
        oauth_connection::grant(&mut tx, connection_id, "user", &approver, permission).await?;
    }
    oauth_connection::grant(&mut tx, connection_id, "role", "member", "use").await?;
    tx.commit().await?;

    tracing::info!(%connection_id, %provider, account = %account.id, "approved connection");
    Ok(ApiResponse::ok(connection.to_resource_object()))
}

async fn delete_connection(
    State(pool): State<PgPool>,
    caller: AuthUser,
    Path((vessel_id, charter_id, connection_id)): Path<(String, String, String)>,
) -> Result<ApiResponse, ApiError> {
    let (vessel_id, charter_id) = charter_path(&vessel_id, &charter_id)?;
    let connection_id = parse_uuid(&connection_id)?;
    caller.authorize(WRITE_ROLES, vessel_id, Some(charter_id))?;
    let mut tx = pool.begin().await?;
    oauth_connection::revoke(&mut tx, vessel_id, charter_id, connection_id)
        .await
        .map_err(ApiError::not_found(ApiStatus::OAUTH_CONNECTION_NOT_FOUND))?;
    tx.commit().await?;
    tracing::info!(%connection_id, %charter_id, "revoked connection");
    Ok(ApiResponse::no_content())
}

pub fn create_connection_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/vessels/:vessel_id/charters/:charter_id/connections",
            get(list_connections).post(create_connection),
        )
        .route(
            "/vessels/:vessel_id/charters/:charter_id/connections/approve",
            post(approve_connection),
        )
        .route(
            "/vessels/:vessel_id/charters/:charter_id/connections/:connection_id",
            get(get_connection).delete(delete_connection),
        )
        .with_state(state)
}
