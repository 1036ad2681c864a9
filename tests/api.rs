//! Full-router tests for the behavior that is decided before a handler
//! touches the database: media types, authentication, authorization,
//! response headers and the agent handshake.

use std::collections::BTreeMap;

use axum::http::{HeaderName, HeaderValue, StatusCode, header};
use axum_test::{TestRequest, TestServer};
use serde_json::{Value, json};
use uuid::Uuid;

use galley::config::ServerConfig;
use galley::jwt::{CrewRole, JwtKeys, vessel_scope};
use galley::router::{AppState, create_router};

const MEDIA: &str = "application/vnd.galley.v1+json";
const SECRET: &str = "api-test-secret";
const PEPPER: &str = "api-test-pepper";

fn config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.database_url = "postgres://galley@localhost/galley".to_string();
    config.jwt.secret = SECRET.to_string();
    config.jwt.pepper = PEPPER.to_string();
    config.cors_origins = vec!["https://app.galley.run".to_string()];
    config
}

/// A router whose pool never connects; every request here is answered
/// before a query would run.
fn server_with(config: ServerConfig) -> TestServer {
    let pool = sqlx::postgres::PgPoolOptions::new()
        .connect_lazy(&config.database_url)
        .unwrap();
    TestServer::new(create_router(AppState::new(pool, config))).unwrap()
}

fn server() -> TestServer {
    server_with(config())
}

fn keys() -> JwtKeys {
    JwtKeys::new(SECRET.as_bytes(), PEPPER.as_bytes())
}

fn access_token(scopes: &[(String, CrewRole)]) -> String {
    let scp: BTreeMap<String, CrewRole> = scopes.iter().cloned().collect();
    keys().issue_access(Uuid::new_v4(), scp, false).unwrap()
}

/// An agent handshake request for `engine` from `client`.
fn handshake(server: &TestServer, engine: &str, client: &'static str) -> TestRequest {
    server
        .get("/agents/connect")
        .add_header(
            HeaderName::from_static("x-forwarded-for"),
            HeaderValue::from_static(client),
        )
        .add_header(
            HeaderName::from_static("x-vessel-engine-id"),
            HeaderValue::from_str(engine).unwrap(),
        )
}

fn error_code(body: &Value) -> u64 {
    body["errors"][0]["status"].as_u64().unwrap()
}

#[tokio::test]
async fn unauthenticated_requests_are_refused() {
    let server = server();
    let response = server.get("/vessels").await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(&response.json()), 1105);

    let response = server
        .get("/vessels")
        .authorization_bearer("not!a!token")
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&response.json()), 1110);

    let foreign = JwtKeys::new(b"someone-else", PEPPER.as_bytes())
        .issue_access(Uuid::new_v4(), BTreeMap::new(), false)
        .unwrap();
    server
        .get("/vessels")
        .authorization_bearer(&foreign)
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn refresh_tokens_are_not_access_tokens() {
    let server = server();
    let (refresh, _) = keys().issue_refresh(Uuid::new_v4()).unwrap();
    server
        .get("/vessels")
        .authorization_bearer(&refresh)
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unsupported_accept_is_not_acceptable() {
    let server = server();
    let response = server
        .get("/vessels")
        .add_header(header::ACCEPT, HeaderValue::from_static("text/html"))
        .await;
    response.assert_status(StatusCode::NOT_ACCEPTABLE);
    assert_eq!(error_code(&response.json()), 1107);
}

#[tokio::test]
async fn plain_json_bodies_are_unsupported() {
    let server = server();
    let token = access_token(&[]);
    let response = server
        .post(&format!("/vessels/{}/charters", Uuid::new_v4()))
        .authorization_bearer(&token)
        .json(&json!({"name": "Platform"}))
        .await;
    response.assert_status(StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(error_code(&response.json()), 1106);
}

#[tokio::test]
async fn roles_are_checked_before_storage() {
    let server = server();
    let vessel_id = Uuid::new_v4();
    let member = access_token(&[(vessel_scope(vessel_id), CrewRole::VesselMember)]);
    let response = server
        .post(&format!("/vessels/{}/charters", vessel_id))
        .authorization_bearer(&member)
        .json(&json!({"name": "Platform"}))
        .content_type(MEDIA)
        .await;
    response.assert_status(StatusCode::FORBIDDEN);
    assert_eq!(error_code(&response.json()), 1100);

    // a captain of another vessel has no say here
    let other = access_token(&[(vessel_scope(Uuid::new_v4()), CrewRole::VesselCaptain)]);
    server
        .delete(&format!("/vessels/{}/charters/{}", vessel_id, Uuid::new_v4()))
        .authorization_bearer(&other)
        .await
        .assert_status(StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn malformed_path_ids() {
    let server = server();
    let token = access_token(&[]);
    let response = server
        .get("/vessels/not-a-uuid/charters")
        .authorization_bearer(&token)
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&response.json()), 1003);
}

#[tokio::test]
async fn error_responses_carry_vendor_type_and_security_headers() {
    let server = server();
    let response = server.get("/vessels").await;
    let headers = response.headers();
    assert_eq!(headers[header::CONTENT_TYPE], MEDIA);
    assert_eq!(headers[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
    assert_eq!(headers[header::X_FRAME_OPTIONS], "DENY");
    assert_eq!(headers[header::CACHE_CONTROL], "no-store, no-cache");
    assert_eq!(headers[header::STRICT_TRANSPORT_SECURITY], "max-age=15768000");
    assert_eq!(headers["x-download-options"], "noopen");
}

#[tokio::test]
async fn cors_preflight_for_known_origin() {
    let server = server();
    let response = server
        .method(axum::http::Method::OPTIONS, "/vessels")
        .add_header(header::ORIGIN, HeaderValue::from_static("https://app.galley.run"))
        .add_header(
            header::ACCESS_CONTROL_REQUEST_METHOD,
            HeaderValue::from_static("PATCH"),
        )
        .await;
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "https://app.galley.run"
    );
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_CREDENTIALS],
        "true"
    );
}

#[tokio::test]
async fn agent_handshake_without_upgrade() {
    let server = server();
    let engine = Uuid::new_v4().to_string();
    handshake(&server, &engine, "192.0.2.1")
        .await
        .assert_status(StatusCode::UPGRADE_REQUIRED);
    handshake(&server, "not-an-engine", "192.0.2.1")
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    handshake(&server, &engine, "192.0.2.1")
        .add_header(header::AUTHORIZATION, HeaderValue::from_static("Token abc"))
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn agent_tokens_when_required() {
    let mut config = config();
    config.agents.require_token = true;
    let server = server_with(config);
    let engine = Uuid::new_v4();

    handshake(&server, &engine.to_string(), "192.0.2.1")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    let for_other_engine = keys().issue_agent(Uuid::new_v4()).unwrap();
    handshake(&server, &engine.to_string(), "192.0.2.1")
        .authorization_bearer(&for_other_engine)
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    let token = keys().issue_agent(engine).unwrap();
    handshake(&server, &engine.to_string(), "192.0.2.1")
        .authorization_bearer(&token)
        .await
        .assert_status(StatusCode::UPGRADE_REQUIRED);
}

#[tokio::test]
async fn agent_handshake_limit_ignores_forwarded_for() {
    let mut config = config();
    config.agents.handshake_limit_per_min = 2;
    let server = server_with(config);
    let engine = Uuid::new_v4().to_string();

    for _ in 0..2 {
        handshake(&server, &engine, "203.0.113.7")
            .await
            .assert_status(StatusCode::UPGRADE_REQUIRED);
    }
    handshake(&server, &engine, "203.0.113.7")
        .await
        .assert_status(StatusCode::TOO_MANY_REQUESTS);
    // same peer under a new forwarded address
    handshake(&server, &engine, "198.51.100.2")
        .await
        .assert_status(StatusCode::TOO_MANY_REQUESTS);
}
