use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::FromRef;
use axum::http::{HeaderValue, Method, header};
use axum::middleware;
use sqlx::PgPool;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::agent::{AgentServer, create_agent_router};
use crate::auth::create_auth_router;
use crate::billing_profile::create_billing_profile_router;
use crate::charter::create_charter_router;
use crate::compute_plan::create_compute_plan_router;
use crate::config::ServerConfig;
use crate::connection::create_connection_router;
use crate::engine::create_engine_router;
use crate::jwt::JwtKeys;
use crate::negotiation::{content_negotiation, security_headers};
use crate::node::create_node_router;
use crate::project::create_project_router;
use crate::region::create_region_router;
use crate::vault::CredentialVault;
use crate::vessel::create_vessel_router;

const CORS_MAX_AGE: Duration = Duration::from_secs(6000);
const PROVIDER_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything a handler may extract with `State`.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub keys: Arc<JwtKeys>,
    pub agents: Arc<AgentServer>,
    pub config: Arc<ServerConfig>,
    pub vault: CredentialVault,
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(pool: PgPool, config: ServerConfig) -> Self {
        let keys = Arc::new(
            JwtKeys::new(config.jwt.secret.as_bytes(), config.jwt.pepper.as_bytes())
                .with_agent_token_ttl(config.jwt.agent_token_ttl_secs),
        );
        let agents = Arc::new(AgentServer::new(&config.agents, Arc::clone(&keys)));
        let vault = CredentialVault::from_pepper(config.jwt.pepper.as_bytes());
        let http = reqwest::Client::builder()
            .timeout(PROVIDER_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            pool,
            keys,
            agents,
            config: Arc::new(config),
            vault,
            http,
        }
    }
}

impl FromRef<AppState> for PgPool {
    fn from_ref(state: &AppState) -> Self {
        state.pool.clone()
    }
}

impl FromRef<AppState> for Arc<JwtKeys> {
    fn from_ref(state: &AppState) -> Self {
        Arc::clone(&state.keys)
    }
}

impl FromRef<AppState> for Arc<AgentServer> {
    fn from_ref(state: &AppState) -> Self {
        Arc::clone(&state.agents)
    }
}

impl FromRef<AppState> for Arc<ServerConfig> {
    fn from_ref(state: &AppState) -> Self {
        Arc::clone(&state.config)
    }
}

impl FromRef<AppState> for CredentialVault {
    fn from_ref(state: &AppState) -> Self {
        state.vault.clone()
    }
}

impl FromRef<AppState> for reqwest::Client {
    fn from_ref(state: &AppState) -> Self {
        state.http.clone()
    }
}

fn cors(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin, "ignoring unusable CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
        .max_age(CORS_MAX_AGE)
}

/// Builds the complete API: every resource router behind content
/// negotiation, security headers, CORS and request tracing.
pub fn create_router(state: AppState) -> Router {
    let origins = state.config.cors_origins.clone();
    Router::new()
        .merge(create_auth_router(state.clone()))
        .merge(create_vessel_router(state.clone()))
        .merge(create_charter_router(state.clone()))
        .merge(create_project_router(state.clone()))
        .merge(create_compute_plan_router(state.clone()))
        .merge(create_connection_router(state.clone()))
        .merge(create_engine_router(state.clone()))
        .merge(create_region_router(state.clone()))
        .merge(create_node_router(state.clone()))
        .merge(create_billing_profile_router(state.clone()))
        .merge(create_agent_router(state))
        .layer(middleware::from_fn(content_negotiation))
        .layer(middleware::from_fn(security_headers))
        .layer(cors(&origins))
        .layer(TraceLayer::new_for_http())
}
