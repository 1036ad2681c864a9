//! Authentication and authorization.
//!
//! [`AuthUser`] turns a bearer access token into the caller's scopes;
//! [`AuthUser::authorize`] checks those scopes against the roles a route
//! allows. The `/auth` routes sign users up, activate their captaincy, sign
//! them in and out, and rotate and exchange refresh tokens.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use axum::extract::{ConnectInfo, FromRef, FromRequestParts, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, header};
use axum::routing::post;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::api_status::{ApiError, ApiStatus};
use crate::json_api::{ApiResponse, Resource};
use crate::jwt::{Claims, CrewRole, JwtError, JwtKeys, Scope, TokenType, charter_scope, vessel_scope};
use crate::router::AppState;
use crate::sql::crew::{Activation, CharterMembershipRecord, CrewRecord};
use crate::sql::session::{NewSession, SessionRecord};
use crate::sql::user::UserRecord;
use crate::sql::{crew, session, user, vessel, vessel_engine};
use crate::validate::{self, ApiJson, parse_uuid};

/// Every role; routes any crew member may call.
pub const ANY_ROLE: &[CrewRole] = &[
    CrewRole::VesselCaptain,
    CrewRole::VesselMember,
    CrewRole::CharterCaptain,
    CrewRole::CharterBoatswain,
    CrewRole::CharterPurser,
    CrewRole::CharterSteward,
    CrewRole::CharterDeckhand,
];

/// An invitation must be accepted within this window.
const EMBARKING_MAX_AGE_HOURS: i64 = 6;

////////////////////////////////////////////// Bearer //////////////////////////////////////////////

/// Reads the bearer token from `Authorization`.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::new(ApiStatus::FAILED_AUTHORIZATION))?;
    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ApiError::new(ApiStatus::FAILED_AUTHORIZATION))
}

/// Rejects tokens with more than two separators or characters outside the
/// base64url alphabet before they reach the verifier.
pub fn check_token_chars(token: &str) -> Result<(), ApiError> {
    let dots = token.bytes().filter(|b| *b == b'.').count();
    let alphabet = token
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.');
    if dots > 2 || !alphabet {
        return Err(ApiError::new(ApiStatus::TOKEN_MALFORMED));
    }
    Ok(())
}

///////////////////////////////////////////// AuthUser /////////////////////////////////////////////

/// The authenticated caller of a request.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub claims: Claims,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    Arc<JwtKeys>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)?;
        check_token_chars(token)?;
        let keys = Arc::<JwtKeys>::from_ref(state);
        let claims = keys.verify(token, TokenType::Access).map_err(|e| {
            tracing::debug!(error = %e, "rejecting access token");
            ApiError::new(ApiStatus::FAILED_AUTHORIZATION)
        })?;
        let user_id = claims
            .subject_id()
            .ok_or_else(|| ApiError::new(ApiStatus::FAILED_AUTHORIZATION))?;
        Ok(AuthUser { user_id, claims })
    }
}

impl AuthUser {
    fn allows(&self, key: &str, allowed: &[CrewRole]) -> bool {
        self.claims
            .scp
            .get(key)
            .is_some_and(|role| allowed.contains(role))
    }

    /// Passes when the caller holds an allowed role on the vessel or on the
    /// charter. Without a charter, an allowed role on any charter of the
    /// vessel also passes.
    pub fn authorize(
        &self,
        allowed: &[CrewRole],
        vessel_id: Uuid,
        charter_id: Option<Uuid>,
    ) -> Result<(), ApiError> {
        if self.allows(&vessel_scope(vessel_id), allowed) {
            return Ok(());
        }
        let passes = match charter_id {
            Some(charter_id) => self.allows(&charter_scope(vessel_id, charter_id), allowed),
            None => self.claims.scp.iter().any(|(key, role)| {
                matches!(Scope::parse(key), Some(Scope::Charter(v, _)) if v == vessel_id)
                    && allowed.contains(role)
            }),
        };
        if passes {
            Ok(())
        } else {
            Err(ApiError::new(ApiStatus::USER_ROLE_FORBIDDEN))
        }
    }

    /// The vessel-scope role, if any.
    pub fn vessel_role(&self, vessel_id: Uuid) -> Option<CrewRole> {
        self.claims.scp.get(&vessel_scope(vessel_id)).copied()
    }

    /// Every vessel the caller holds any role in.
    pub fn vessel_ids(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self
            .claims
            .scp
            .keys()
            .filter_map(|key| Scope::parse(key))
            .map(|scope| scope.vessel_id())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// The charters of `vessel_id` the caller holds a charter role on.
    pub fn charter_ids(&self, vessel_id: Uuid) -> Vec<Uuid> {
        self.claims
            .scp
            .keys()
            .filter_map(|key| match Scope::parse(key) {
                Some(Scope::Charter(v, charter_id)) if v == vessel_id => Some(charter_id),
                _ => None,
            })
            .collect()
    }
}

//////////////////////////////////////////// ClientInfo ////////////////////////////////////////////

/// Who is on the other end of the connection.
///
/// `ip_address` prefers `X-Forwarded-For` and is only recorded with sessions.
/// `peer_address` is the socket peer and is what rate limits key on, since
/// a client can put anything in a header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub peer_address: Option<String>,
}

impl ClientInfo {
    pub fn from_parts(parts: &Parts) -> Self {
        let user_agent = parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        let peer_address = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());
        ClientInfo {
            user_agent,
            ip_address: forwarded.or_else(|| peer_address.clone()),
            peer_address,
        }
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for ClientInfo {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _: &S) -> Result<Self, Self::Rejection> {
        Ok(ClientInfo::from_parts(parts))
    }
}

////////////////////////////////////////////// Scopes //////////////////////////////////////////////

/// Decides whether the caller is embarking: exactly one crew row, still
/// invited. Embarking past the invitation window is refused.
pub fn embarking(crew: &[CrewRecord], now: DateTime<Utc>) -> Result<bool, ApiError> {
    let [only] = crew else {
        return Ok(false);
    };
    if only.status != "invited" {
        return Ok(false);
    }
    if only.created_at < now - Duration::hours(EMBARKING_MAX_AGE_HOURS) {
        return Err(ApiError::new(ApiStatus::CREW_EMBARKING_TOO_OLD));
    }
    Ok(true)
}

/// Builds the `scp` claim from crew rows and the charter memberships of the
/// member rows.
pub fn build_scopes(
    crew: &[CrewRecord],
    memberships: &[CharterMembershipRecord],
) -> BTreeMap<String, CrewRole> {
    let mut scp = BTreeMap::new();
    for row in crew.iter().filter(|row| row.status != "suspended") {
        match row.vessel_role.as_str() {
            "captain" => {
                scp.insert(vessel_scope(row.vessel_id), CrewRole::VesselCaptain);
            }
            _ => {
                scp.insert(vessel_scope(row.vessel_id), CrewRole::VesselMember);
                for membership in memberships.iter().filter(|m| m.crew_id == row.id) {
                    match CrewRole::from_charter_role(&membership.charter_role) {
                        Some(role) => {
                            scp.insert(
                                charter_scope(membership.vessel_id, membership.charter_id),
                                role,
                            );
                        }
                        None => tracing::warn!(
                            role = %membership.charter_role,
                            "skipping unknown charter role"
                        ),
                    }
                }
            }
        }
    }
    scp
}

///////////////////////////////////////////// Resources ////////////////////////////////////////////

impl Resource for UserRecord {
    const TYPE: &'static str = "User";

    fn id(&self) -> Uuid {
        self.id
    }

    fn attributes(&self) -> Value {
        json!({
            "email": self.email,
            "firstName": self.first_name,
            "lastName": self.last_name,
            "createdAt": self.created_at,
        })
    }
}

///////////////////////////////////////////// Handlers /////////////////////////////////////////////

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignUpUser {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SignUpVessel {
    pub name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SignUpRequest {
    pub user: Option<SignUpUser>,
    pub vessel: Option<SignUpVessel>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SignInRequest {
    pub email: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenRequest {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationRequest {
    pub crew_id: Option<String>,
    pub vessel_id: Option<String>,
    pub user_id: Option<String>,
    pub activation_salt: Option<String>,
}

/// Path of the link that activates an invited crew membership. The segment is
/// base64 of `crewId.vesselId.userId.salt`.
pub fn activation_path(crew: &CrewRecord) -> String {
    let raw = format!(
        "{}.{}.{}.{}",
        crew.id, crew.vessel_id, crew.user_id, crew.activation_salt
    );
    format!("/auth/activate/{}", STANDARD.encode(raw))
}

fn expiry(claims: &Claims) -> DateTime<Utc> {
    DateTime::from_timestamp(claims.exp, 0).unwrap_or_else(Utc::now)
}

/// Issues a refresh token and records its session.
async fn open_session(
    tx: &mut Transaction<'_, Postgres>,
    keys: &JwtKeys,
    user_id: Uuid,
    client: &ClientInfo,
) -> Result<String, ApiError> {
    let (token, claims) = keys.issue_refresh(user_id).map_err(token_failure)?;
    let hash = keys.refresh_hash(&token).map_err(token_failure)?;
    session::create(
        tx,
        &NewSession {
            user_id,
            refresh_token_hash: &hash,
            expires_at: expiry(&claims),
            device_name: None,
            user_agent: client.user_agent.as_deref(),
            ip_address: client.ip_address.as_deref(),
        },
    )
    .await?;
    Ok(token)
}

fn token_failure(e: JwtError) -> ApiError {
    tracing::error!(error = %e, "token issuance failed");
    ApiError::new(ApiStatus::FAILED)
}

/// Verifies a presented refresh token and finds its live session.
async fn live_session(
    tx: &mut Transaction<'_, Postgres>,
    keys: &JwtKeys,
    request: &RefreshTokenRequest,
) -> Result<(UserRecord, SessionRecord), ApiError> {
    let token = request
        .refresh_token
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::new(ApiStatus::REFRESH_TOKEN_MISSING))?;
    let claims = keys.verify(token, TokenType::Refresh).map_err(|e| {
        tracing::debug!(error = %e, "rejecting refresh token");
        ApiError::new(ApiStatus::REFRESH_TOKEN_INVALID)
    })?;
    let user_id = claims
        .subject_id()
        .ok_or_else(|| ApiError::new(ApiStatus::REFRESH_TOKEN_INVALID))?;
    let user = user::get(tx, user_id)
        .await
        .map_err(ApiError::not_found(ApiStatus::USER_NOT_FOUND))?;
    let hash = keys.refresh_hash(token).map_err(token_failure)?;
    let session = session::get_live(tx, user_id, &hash)
        .await
        .map_err(ApiError::not_found(ApiStatus::REFRESH_TOKEN_INVALID))?;
    Ok((user, session))
}

/// Creates a user, their vessel with its default engine, and an invited
/// captain crew membership that must be activated before signing in.
async fn sign_up(
    State(pool): State<PgPool>,
    State(keys): State<Arc<JwtKeys>>,
    client: ClientInfo,
    ApiJson(request): ApiJson<SignUpRequest>,
) -> Result<ApiResponse, ApiError> {
    let new_user = request.user.unwrap_or_default();
    let new_vessel = request.vessel.unwrap_or_default();
    let email = validate::required(&new_user.email, "user/email")?;
    validate::email(email, "user/email")?;
    let vessel_name = validate::required(&new_vessel.name, "vessel/name")?;

    let mut tx = pool.begin().await?;
    let user = user::create(
        &mut tx,
        email,
        new_user.first_name.as_deref(),
        new_user.last_name.as_deref(),
    )
    .await?;
    let vessel = vessel::create(&mut tx, vessel_name, user.id).await?;
    let captain = crew::create(&mut tx, vessel.id, user.id, "captain", "invited").await?;
    vessel_engine::create(&mut tx, vessel.id, vessel_engine::DEFAULT_ENGINE_NAME).await?;
    let refresh_token = open_session(&mut tx, &keys, user.id, &client).await?;
    tx.commit().await?;

    tracing::info!(user_id = %user.id, vessel_id = %vessel.id, "signed up");
    tracing::info!(
        crew_id = %captain.id,
        path = %activation_path(&captain),
        "activation link issued"
    );
    Ok(ApiResponse::created(user.to_resource_object())
        .with_included(vec![vessel.to_resource_object()])
        .with_meta(json!({ "refreshToken": refresh_token })))
}

/// Issues a refresh token to a user with an active crew membership.
async fn sign_in(
    State(pool): State<PgPool>,
    State(keys): State<Arc<JwtKeys>>,
    client: ClientInfo,
    ApiJson(request): ApiJson<SignInRequest>,
) -> Result<ApiResponse, ApiError> {
    let email = validate::required(&request.email, "email")?;

    let mut tx = pool.begin().await?;
    let user = user::get_by_email(&mut tx, email)
        .await
        .map_err(ApiError::not_found(ApiStatus::USER_NOT_FOUND))?;
    let memberships = crew::list_by_user(&mut tx, user.id).await?;
    if !memberships.iter().any(CrewRecord::is_active) {
        return Err(ApiError::new(ApiStatus::VESSEL_NOT_FOUND));
    }
    let refresh_token = open_session(&mut tx, &keys, user.id, &client).await?;
    tx.commit().await?;

    tracing::info!(user_id = %user.id, "signed in");
    Ok(ApiResponse::ok(json!({ "refreshToken": refresh_token })))
}

/// Activates an invited crew membership from the fields of its activation link.
async fn activate(
    State(pool): State<PgPool>,
    ApiJson(request): ApiJson<ActivationRequest>,
) -> Result<ApiResponse, ApiError> {
    let id = |value: &Option<String>, missing: ApiStatus| match value.as_deref() {
        Some(value) => parse_uuid(value),
        None => Err(ApiError::new(missing)),
    };
    let user_id = id(&request.user_id, ApiStatus::USER_NOT_FOUND)?;
    let vessel_id = id(&request.vessel_id, ApiStatus::VESSEL_NOT_FOUND)?;
    let crew_id = id(&request.crew_id, ApiStatus::CREW_NO_VESSEL_MEMBER)?;
    let activation_salt = request
        .activation_salt
        .as_deref()
        .filter(|salt| !salt.is_empty())
        .ok_or_else(|| ApiError::new(ApiStatus::CREW_NO_ACTIVATION_SALT))?;

    let mut tx = pool.begin().await?;
    crew::activate(
        &mut tx,
        &Activation {
            crew_id,
            vessel_id,
            user_id,
            activation_salt,
        },
    )
    .await
    .map_err(ApiError::not_found(ApiStatus::CREW_ACTIVATION_FAILED))?;
    tx.commit().await?;

    tracing::info!(%crew_id, %vessel_id, "activated crew");
    Ok(ApiResponse::no_content())
}

/// Rotates a refresh token.
async fn refresh_token(
    State(pool): State<PgPool>,
    State(keys): State<Arc<JwtKeys>>,
    ApiJson(request): ApiJson<RefreshTokenRequest>,
) -> Result<ApiResponse, ApiError> {
    let mut tx = pool.begin().await?;
    let (user, live) = live_session(&mut tx, &keys, &request).await?;
    let memberships = crew::list_by_user(&mut tx, user.id).await?;
    if !memberships.iter().any(CrewRecord::is_active) {
        return Err(ApiError::new(ApiStatus::CREW_NO_VESSEL_MEMBER));
    }
    let (token, claims) = keys.issue_refresh(user.id).map_err(token_failure)?;
    let hash = keys.refresh_hash(&token).map_err(token_failure)?;
    session::rotate(&mut tx, live.id, &hash, expiry(&claims))
        .await
        .map_err(ApiError::not_found(ApiStatus::REFRESH_TOKEN_INVALID))?;
    tx.commit().await?;

    Ok(ApiResponse::ok(json!({ "refreshToken": token })))
}

/// Exchanges a refresh token for an access token carrying the caller's scopes.
async fn access_token(
    State(pool): State<PgPool>,
    State(keys): State<Arc<JwtKeys>>,
    ApiJson(request): ApiJson<RefreshTokenRequest>,
) -> Result<ApiResponse, ApiError> {
    let mut tx = pool.begin().await?;
    let (user, live) = live_session(&mut tx, &keys, &request).await?;
    session::touch(&mut tx, live.id).await?;

    let rows = crew::list_by_user(&mut tx, user.id).await?;
    if rows.is_empty() {
        return Err(ApiError::new(ApiStatus::CREW_NO_VESSEL_MEMBER));
    }
    let is_embarking = embarking(&rows, Utc::now())?;
    let mut memberships = Vec::new();
    for row in rows.iter().filter(|row| row.vessel_role != "captain") {
        memberships.extend(crew::list_charter_memberships(&mut tx, row.id).await?);
    }
    tx.commit().await?;

    let scp = build_scopes(&rows, &memberships);
    if scp.is_empty() {
        return Err(ApiError::new(ApiStatus::CREW_NO_VESSEL_MEMBER));
    }
    let token = keys
        .issue_access(user.id, scp, is_embarking)
        .map_err(token_failure)?;
    Ok(ApiResponse::ok(json!({ "accessToken": token })))
}

/// Revokes every session of the caller.
async fn sign_out(State(pool): State<PgPool>, caller: AuthUser) -> Result<ApiResponse, ApiError> {
    let mut tx = pool.begin().await?;
    let revoked = session::revoke_all(&mut tx, caller.user_id).await?;
    tx.commit().await?;
    tracing::info!(user_id = %caller.user_id, revoked, "signed out");
    Ok(ApiResponse::no_content())
}

////////////////////////////////////////////// Router //////////////////////////////////////////////

pub fn create_auth_router(state: AppState) -> Router {
    Router::new()
        .route("/auth/sign-up", post(sign_up))
        .route("/auth/activate", post(activate))
        .route("/auth/sign-in", post(sign_in))
        .route("/auth/token/refresh", post(refresh_token))
        .route("/auth/token/access", post(access_token))
        .route("/auth/sign-out", post(sign_out))
        .with_state(state)
}
