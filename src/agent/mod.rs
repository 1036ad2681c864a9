//! # Agent Tunnel
//!
//! Agents running next to a vessel engine dial in over a WebSocket at
//! `/agents/connect` and keep the connection open. Commands for the engine
//! travel down that socket under credit-based flow control:
//!
//! 1. the agent announces itself with `agent.hello` and an initial credit;
//! 2. each `cmd` frame spends one credit, and commands issued without credit
//!    wait in a queue;
//! 3. `agent.credits` tops credit up and drains the queue;
//! 4. `cmd.done` carries the base64 JSON result back to the waiting request.
//!
//! Only one connection per engine is live. A reconnecting agent evicts its
//! previous connection and takes over the commands still queued on it.

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use sqlx::PgPool;
use tokio::sync::mpsc;

use crate::auth::ClientInfo;
use crate::router::AppState;
use crate::sql::vessel_engine;

pub mod connection;
pub mod protocol;
pub mod server;
pub mod tunnel;

pub use connection::{AgentConnection, ConnectionStatus};
pub use server::{AgentServer, Handshake, HandshakeError, Outgoing};

/// Refuses handshakes for engines that no vessel owns.
pub async fn known_engine(pool: &PgPool, handshake: &Handshake) -> Result<(), HandshakeError> {
    match vessel_engine::exists(pool, handshake.vessel_engine_id).await {
        Ok(true) => Ok(()),
        Ok(false) => {
            tracing::warn!(vessel_engine_id = %handshake.vessel_engine_id, "handshake for unknown engine");
            Err(HandshakeError::UnknownEngine)
        }
        Err(_) => Err(HandshakeError::Unavailable),
    }
}

/// Admits the handshake, then hands the upgraded socket to [`serve_socket`].
///
/// The rate limit keys on the socket peer; forwarding headers are
/// client-controlled.
async fn connect(
    State(agents): State<Arc<AgentServer>>,
    State(pool): State<PgPool>,
    client: ClientInfo,
    headers: HeaderMap,
    upgrade: Option<WebSocketUpgrade>,
) -> Response {
    let client = client.peer_address.unwrap_or_else(|| "unknown".to_string());
    let handshake = match agents.admit(&client, &headers).await {
        Ok(handshake) => handshake,
        Err(rejection) => return rejection.into_response(),
    };
    let Some(upgrade) = upgrade else {
        return StatusCode::UPGRADE_REQUIRED.into_response();
    };
    if let Err(rejection) = known_engine(&pool, &handshake).await {
        return rejection.into_response();
    }
    upgrade.on_upgrade(move |socket| serve_socket(agents, pool, socket, handshake))
}

async fn record_status(pool: &PgPool, handshake: &Handshake, status: &str) {
    if let Err(err) =
        vessel_engine::record_connection(pool, handshake.vessel_engine_id, status, None).await
    {
        tracing::warn!(
            vessel_engine_id = %handshake.vessel_engine_id,
            error = %err,
            status,
            "could not record agent connection status"
        );
    }
}

/// Pumps frames between one agent socket and the registry until either side
/// goes away.
pub async fn serve_socket(
    agents: Arc<AgentServer>,
    pool: PgPool,
    mut socket: WebSocket,
    handshake: Handshake,
) {
    let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel();
    agents.register(&handshake, outgoing_tx).await;
    record_status(&pool, &handshake, "connected").await;
    let mut status = ConnectionStatus::Disconnecting;
    loop {
        tokio::select! {
            outgoing = outgoing_rx.recv() => match outgoing {
                Some(Outgoing::Frame(text)) => {
                    if socket.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Some(Outgoing::Evict) | None => {
                    status = ConnectionStatus::ShuttingDown;
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => agents.handle_text(&handshake, &text).await,
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => agents.touch(&handshake).await,
                Some(Ok(Message::Binary(_))) => {
                    tracing::warn!(connection_id = %handshake.connection_id, "ignoring binary frame");
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    tracing::warn!(connection_id = %handshake.connection_id, error = %e, "agent socket error");
                    break;
                }
            },
        }
    }
    if agents.unregister(&handshake, status).await {
        record_status(&pool, &handshake, "disconnected").await;
    }
}

pub fn create_agent_router(state: AppState) -> Router {
    Router::new()
        .route("/agents/connect", get(connect))
        .route(
            "/vessels/:vessel_id/engines/:vessel_engine_id/nodes",
            get(tunnel::get_nodes),
        )
        .route(
            "/vessels/:vessel_id/engines/:vessel_engine_id/apply",
            post(tunnel::apply),
        )
        .with_state(state)
}
