//! The agent session registry.
//!
//! One [`AgentServer`] lives for the whole process. It admits handshakes,
//! keeps exactly one live connection per vessel engine, routes inbound
//! frames to that connection's credit state, and matches `cmd.done` replies
//! to the requests waiting on them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::Value;
use tokio::sync::{Mutex, mpsc, oneshot};
use uuid::Uuid;

use super::connection::{AgentConnection, ConnectionStatus, Queued};
use super::protocol::{Command, Inbound, decode_result};
use crate::api_status::{ApiError, ApiStatus};
use crate::auth::bearer_token;
use crate::config::AgentConfig;
use crate::jwt::{JwtKeys, TokenType};

pub const ENGINE_HEADER: &str = "x-vessel-engine-id";
pub const SESSION_HEADER: &str = "x-session-id";

const HANDSHAKE_WINDOW: Duration = Duration::from_secs(60);

/// What the socket task is told to do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    Frame(String),
    /// A newer connection for the same engine took over.
    Evict,
}

/// Why a handshake was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeError {
    RateLimited,
    BadAuthorization,
    BadEngineId,
    BadToken,
    /// The engine id names no live vessel engine.
    UnknownEngine,
    /// The engine could not be looked up.
    Unavailable,
}

impl HandshakeError {
    pub fn status(&self) -> StatusCode {
        match self {
            HandshakeError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            HandshakeError::BadAuthorization | HandshakeError::BadToken => StatusCode::UNAUTHORIZED,
            HandshakeError::BadEngineId => StatusCode::BAD_REQUEST,
            HandshakeError::UnknownEngine => StatusCode::NOT_FOUND,
            HandshakeError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for HandshakeError {
    fn into_response(self) -> Response {
        self.status().into_response()
    }
}

/// An admitted handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub vessel_engine_id: Uuid,
    pub connection_id: String,
}

/// Counts handshakes per client in fixed one-minute windows.
#[derive(Debug)]
pub struct HandshakeLimiter {
    limit: u32,
    window_start: Instant,
    counts: HashMap<String, u32>,
}

impl HandshakeLimiter {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            window_start: Instant::now(),
            counts: HashMap::new(),
        }
    }

    pub fn admit(&mut self, client: &str, now: Instant) -> bool {
        if now.duration_since(self.window_start) >= HANDSHAKE_WINDOW {
            self.window_start = now;
            self.counts.clear();
        }
        let count = self.counts.entry(client.to_string()).or_insert(0);
        *count += 1;
        *count <= self.limit
    }
}

struct Session {
    conn: AgentConnection,
    outgoing: mpsc::UnboundedSender<Outgoing>,
}

impl Session {
    fn flush(&mut self) {
        let frames = self.conn.drain();
        if !frames.is_empty() {
            tracing::debug!(
                connection_id = %self.conn.connection_id,
                drained = frames.len(),
                credits = self.conn.credits,
                "drained queue"
            );
        }
        for frame in frames {
            // The socket task is gone; its unregister fails the waiter.
            let _ = self.outgoing.send(Outgoing::Frame(frame));
        }
    }
}

type Reply = Result<Value, ApiError>;

#[derive(Default)]
struct Registry {
    sessions: HashMap<Uuid, Session>,
    waiters: HashMap<Uuid, oneshot::Sender<Reply>>,
}

impl Registry {
    fn fail(&mut self, ids: impl IntoIterator<Item = Uuid>, status: ApiStatus) {
        for id in ids {
            if let Some(waiter) = self.waiters.remove(&id) {
                let _ = waiter.send(Err(ApiError::new(status)));
            }
        }
    }
}

pub struct AgentServer {
    registry: Mutex<Registry>,
    handshakes: Mutex<HandshakeLimiter>,
    keys: Arc<JwtKeys>,
    require_token: bool,
    request_timeout: Duration,
}

impl std::fmt::Debug for AgentServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentServer")
            .field("require_token", &self.require_token)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl AgentServer {
    pub fn new(config: &AgentConfig, keys: Arc<JwtKeys>) -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            handshakes: Mutex::new(HandshakeLimiter::new(config.handshake_limit_per_min)),
            keys,
            require_token: config.require_token,
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Checks a handshake in order: rate limit, `Authorization` form, engine
    /// id, then the agent token when tokens are required.
    pub async fn admit(&self, client: &str, headers: &HeaderMap) -> Result<Handshake, HandshakeError> {
        if !self.handshakes.lock().await.admit(client, Instant::now()) {
            tracing::warn!(client, "handshake rate limit exceeded");
            return Err(HandshakeError::RateLimited);
        }
        let authorization = match headers.get(header::AUTHORIZATION).map(|value| value.to_str()) {
            None => None,
            Some(Ok(value)) => Some(value),
            Some(Err(_)) => {
                tracing::warn!(client, "handshake with non-ASCII authorization");
                return Err(HandshakeError::BadAuthorization);
            }
        };
        if authorization.is_some_and(|value| !value.starts_with("Bearer ")) {
            tracing::warn!(client, "handshake with malformed authorization");
            return Err(HandshakeError::BadAuthorization);
        }
        let vessel_engine_id = headers
            .get(ENGINE_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| Uuid::parse_str(value.trim()).ok())
            .ok_or(HandshakeError::BadEngineId)?;
        if self.require_token {
            let claims = bearer_token(headers)
                .map_err(|_| HandshakeError::BadToken)
                .and_then(|token| {
                    self.keys
                        .verify(token, TokenType::Agent)
                        .map_err(|_| HandshakeError::BadToken)
                })?;
            if claims.subject_id() != Some(vessel_engine_id) {
                tracing::warn!(client, %vessel_engine_id, "agent token for another engine");
                return Err(HandshakeError::BadToken);
            }
        }
        let connection_id = headers
            .get(SESSION_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        tracing::info!(client, %vessel_engine_id, %connection_id, "handshake accepted");
        Ok(Handshake {
            vessel_engine_id,
            connection_id,
        })
    }

    /// Makes `handshake` the engine's only connection. A previous connection
    /// is evicted; its unsent queue moves over and its in-flight commands
    /// fail with `AGENT_DISCONNECTED`.
    pub async fn register(&self, handshake: &Handshake, outgoing: mpsc::UnboundedSender<Outgoing>) {
        let mut conn =
            AgentConnection::new(handshake.connection_id.clone(), handshake.vessel_engine_id);
        let mut registry = self.registry.lock().await;
        if let Some(previous) = registry.sessions.remove(&handshake.vessel_engine_id) {
            tracing::info!(
                vessel_engine_id = %handshake.vessel_engine_id,
                evicted = %previous.conn.connection_id,
                inherited = previous.conn.queue.len(),
                "evicting previous agent connection"
            );
            let _ = previous.outgoing.send(Outgoing::Evict);
            conn.queue = previous.conn.queue;
            registry.fail(previous.conn.inflight, ApiStatus::AGENT_DISCONNECTED);
        }
        registry.sessions.insert(
            handshake.vessel_engine_id,
            Session { conn, outgoing },
        );
    }

    /// Drops a closed connection unless a newer one already replaced it.
    /// Returns whether the connection was still the engine's live one.
    pub async fn unregister(&self, handshake: &Handshake, status: ConnectionStatus) -> bool {
        let mut registry = self.registry.lock().await;
        let current = registry
            .sessions
            .get(&handshake.vessel_engine_id)
            .is_some_and(|session| session.conn.connection_id == handshake.connection_id);
        if !current {
            return false;
        }
        if let Some(mut session) = registry.sessions.remove(&handshake.vessel_engine_id) {
            session.conn.status = status;
            let pending: Vec<Uuid> = session
                .conn
                .inflight
                .drain()
                .chain(session.conn.queue.drain(..).map(|queued| queued.id))
                .collect();
            registry.fail(pending, ApiStatus::AGENT_DISCONNECTED);
            tracing::info!(
                vessel_engine_id = %handshake.vessel_engine_id,
                connection_id = %handshake.connection_id,
                status = status.as_str(),
                "agent connection closed"
            );
        }
        true
    }

    /// Records liveness of a connection.
    pub async fn touch(&self, handshake: &Handshake) {
        let mut registry = self.registry.lock().await;
        if let Some(session) = registry.sessions.get_mut(&handshake.vessel_engine_id) {
            session.conn.touch();
        }
    }

    /// Applies one inbound text frame.
    pub async fn handle_text(&self, handshake: &Handshake, text: &str) {
        let inbound = match Inbound::parse(text) {
            Ok(inbound) => inbound,
            Err(e) => {
                tracing::warn!(connection_id = %handshake.connection_id, error = %e, "unreadable frame");
                return;
            }
        };
        let mut registry = self.registry.lock().await;
        let Some(session) = registry.sessions.get_mut(&handshake.vessel_engine_id) else {
            return;
        };
        if session.conn.connection_id != handshake.connection_id {
            return;
        }
        session.conn.touch();
        match inbound {
            Inbound::Hello { credits } => {
                session.conn.add_credits(credits);
                session.conn.status = ConnectionStatus::Active;
                tracing::info!(
                    connection_id = %handshake.connection_id,
                    credits,
                    total = session.conn.credits,
                    "agent hello"
                );
                session.flush();
            }
            Inbound::Credits { delta } => {
                session.conn.add_credits(delta);
                tracing::debug!(
                    connection_id = %handshake.connection_id,
                    delta,
                    total = session.conn.credits,
                    "agent credits"
                );
                session.flush();
            }
            Inbound::Done { id, result } => {
                let Ok(id) = Uuid::parse_str(&id) else {
                    tracing::warn!(connection_id = %handshake.connection_id, %id, "cmd.done for malformed id");
                    return;
                };
                session.conn.complete(id);
                let reply = match result.as_deref().map(decode_result) {
                    Some(Ok(value)) => Ok(value),
                    None => Ok(Value::Null),
                    Some(Err(e)) => {
                        tracing::warn!(command_id = %id, error = %e, "unreadable command result");
                        Err(ApiError::new(ApiStatus::AGENT_REPLY_INVALID))
                    }
                };
                match registry.waiters.remove(&id) {
                    Some(waiter) => {
                        let _ = waiter.send(reply);
                    }
                    None => tracing::debug!(command_id = %id, "late reply dropped"),
                }
            }
            Inbound::Unknown(kind) => {
                tracing::warn!(connection_id = %handshake.connection_id, kind = %kind, "unknown frame type");
            }
        }
    }

    /// Sends `action` to the engine's agent and waits for its reply.
    pub async fn request(
        &self,
        vessel_engine_id: Uuid,
        action: &str,
        payload: Value,
    ) -> Result<Value, ApiError> {
        let command = Command::new(vessel_engine_id, action, payload);
        let frame = command.to_frame()?;
        let (reply_tx, reply_rx) = oneshot::channel();
        {
            let mut registry = self.registry.lock().await;
            let Registry { sessions, waiters } = &mut *registry;
            let session = sessions
                .get_mut(&vessel_engine_id)
                .ok_or_else(|| ApiError::new(ApiStatus::AGENT_NOT_CONNECTED))?;
            waiters.insert(command.id, reply_tx);
            session.conn.enqueue(Queued {
                id: command.id,
                frame,
            });
            session.flush();
        }
        tracing::debug!(command_id = %command.id, %vessel_engine_id, action, "command issued");

        match tokio::time::timeout(self.request_timeout, reply_rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(ApiError::new(ApiStatus::AGENT_DISCONNECTED)),
            Err(_) => {
                let mut registry = self.registry.lock().await;
                registry.waiters.remove(&command.id);
                let abandoned = registry
                    .sessions
                    .get_mut(&vessel_engine_id)
                    .is_some_and(|session| session.conn.abandon(command.id));
                tracing::warn!(
                    command_id = %command.id,
                    %vessel_engine_id,
                    action,
                    abandoned,
                    "agent timed out"
                );
                Err(ApiError::new(ApiStatus::AGENT_TIMEOUT))
            }
        }
    }

    /// Credits left on the engine's connection.
    pub async fn credits(&self, vessel_engine_id: Uuid) -> Option<i64> {
        let registry = self.registry.lock().await;
        registry
            .sessions
            .get(&vessel_engine_id)
            .map(|session| session.conn.credits)
    }
}
