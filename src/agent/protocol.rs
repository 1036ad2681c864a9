//! Frames exchanged with agents over the tunnel.
//!
//! Every frame is a JSON text message with a `type` member. Agents send
//! `agent.hello`, `agent.credits` and `cmd.done`; the server sends `cmd`.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::api_status::{ApiError, ApiStatus};

/// A frame received from an agent.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// The agent is ready and grants its first credits.
    Hello { credits: i64 },
    /// The agent grants (or takes back) credits.
    Credits { delta: i64 },
    /// A command finished; `result` is base64 of a JSON document.
    Done { id: String, result: Option<String> },
    /// Anything else, kept by type name for logging.
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    Json(String),
    MissingType,
    Base64(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolError::Json(msg) => write!(f, "invalid json: {}", msg),
            ProtocolError::MissingType => write!(f, "frame has no type"),
            ProtocolError::Base64(msg) => write!(f, "invalid base64: {}", msg),
        }
    }
}

impl std::error::Error for ProtocolError {}

fn payload_int(frame: &Value, key: &str) -> i64 {
    frame
        .get("payload")
        .and_then(|payload| payload.get(key))
        .and_then(Value::as_i64)
        .unwrap_or(0)
}

impl Inbound {
    pub fn parse(text: &str) -> Result<Inbound, ProtocolError> {
        let frame: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::Json(e.to_string()))?;
        let kind = frame
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingType)?;
        Ok(match kind {
            "agent.hello" => Inbound::Hello {
                credits: payload_int(&frame, "credits"),
            },
            "agent.credits" => Inbound::Credits {
                delta: payload_int(&frame, "delta"),
            },
            "cmd.done" => Inbound::Done {
                id: frame
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                result: frame
                    .get("result")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            },
            other => Inbound::Unknown(other.to_string()),
        })
    }
}

/// Decodes the base64 JSON result of a finished command.
pub fn decode_result(result: &str) -> Result<Value, ProtocolError> {
    let bytes = STANDARD
        .decode(result.trim())
        .map_err(|e| ProtocolError::Base64(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| ProtocolError::Json(e.to_string()))
}

/// A command bound for one agent.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub id: Uuid,
    pub vessel_engine_id: Uuid,
    pub action: String,
    pub payload: Value,
}

impl Command {
    pub fn new(vessel_engine_id: Uuid, action: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            vessel_engine_id,
            action: action.into(),
            payload,
        }
    }

    /// Where the agent addresses its `cmd.done`.
    pub fn reply_to(&self) -> String {
        format!("{}.reply", self.action)
    }

    /// Renders the `cmd` text frame.
    pub fn to_frame(&self) -> Result<String, ApiError> {
        if self.action.trim().is_empty() {
            return Err(ApiError::new(ApiStatus::AGENT_SEND_ACTION_REQUIRED));
        }
        Ok(json!({
            "type": "cmd",
            "id": self.id,
            "vesselEngineId": self.vessel_engine_id,
            "action": self.action,
            "payload": self.payload,
            "replyTo": self.reply_to(),
        })
        .to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_agent_frames() {
        assert_eq!(
            Inbound::parse(r#"{"type":"agent.hello","payload":{"credits":5}}"#).unwrap(),
            Inbound::Hello { credits: 5 }
        );
        assert_eq!(
            Inbound::parse(r#"{"type":"agent.credits"}"#).unwrap(),
            Inbound::Credits { delta: 0 }
        );
        assert_eq!(
            Inbound::parse(r#"{"type":"cmd.done","id":"abc","result":"e30="}"#).unwrap(),
            Inbound::Done {
                id: "abc".to_string(),
                result: Some("e30=".to_string())
            }
        );
        assert_eq!(
            Inbound::parse(r#"{"type":"agent.metrics"}"#).unwrap(),
            Inbound::Unknown("agent.metrics".to_string())
        );
        assert_eq!(
            Inbound::parse(r#"{"payload":{}}"#).unwrap_err(),
            ProtocolError::MissingType
        );
        assert!(Inbound::parse("hello").is_err());
    }

    #[test]
    fn results_are_base64_json() {
        let encoded = STANDARD.encode(r#"{"nodes":[{"name":"worker-1"}]}"#);
        let value = decode_result(&encoded).unwrap();
        assert_eq!(value["nodes"][0]["name"], "worker-1");
        assert!(matches!(
            decode_result("!!!"),
            Err(ProtocolError::Base64(_))
        ));
        assert!(matches!(
            decode_result(&STANDARD.encode("not json")),
            Err(ProtocolError::Json(_))
        ));
    }

    #[test]
    fn command_frame() {
        let engine = Uuid::new_v4();
        let command = Command::new(engine, "k8s.apply", json!({"manifest": "kind: Pod"}));
        let frame: Value = serde_json::from_str(&command.to_frame().unwrap()).unwrap();
        assert_eq!(frame["type"], "cmd");
        assert_eq!(frame["id"], json!(command.id));
        assert_eq!(frame["vesselEngineId"], json!(engine));
        assert_eq!(frame["action"], "k8s.apply");
        assert_eq!(frame["replyTo"], "k8s.apply.reply");

        let blank = Command::new(engine, " ", Value::Null);
        assert_eq!(
            blank.to_frame().unwrap_err().status,
            ApiStatus::AGENT_SEND_ACTION_REQUIRED
        );
    }
}
