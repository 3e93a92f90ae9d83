//! Wire envelope shared by every service on the broker.
//!
//! Every payload is one of three kinds — command, telemetry, response — carried
//! in a self-describing JSON object tagged by `messageType`. The inner
//! `parameters`/`data` bag stays schemaless at this layer; handlers decode it
//! into typed structs at the edge.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Discriminant of the envelope, also used to route messages to handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Command,
    Telemetry,
    Response,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageKind::Command => write!(f, "command"),
            MessageKind::Telemetry => write!(f, "telemetry"),
            MessageKind::Response => write!(f, "response"),
        }
    }
}

/// Envelope fields common to all message kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<P> {
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub version: String,
    pub payload: P,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandPayload {
    pub command_type: String,
    #[serde(default)]
    pub parameters: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryPayload {
    pub telemetry_type: String,
    #[serde(default)]
    pub parameters: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponsePayload {
    pub response_type: String,
    #[serde(default)]
    pub data: Value,
}

/// A broker message: tagged union over the three payload kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "messageType", rename_all = "lowercase")]
pub enum Message {
    Command(Envelope<CommandPayload>),
    Telemetry(Envelope<TelemetryPayload>),
    Response(Envelope<ResponsePayload>),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Command(_) => MessageKind::Command,
            Message::Telemetry(_) => MessageKind::Telemetry,
            Message::Response(_) => MessageKind::Response,
        }
    }

    pub fn source(&self) -> &str {
        match self {
            Message::Command(e) => &e.source,
            Message::Telemetry(e) => &e.source,
            Message::Response(e) => &e.source,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Message::Command(e) => e.timestamp,
            Message::Telemetry(e) => e.timestamp,
            Message::Response(e) => e.timestamp,
        }
    }

    /// The operation name inside the payload (`commandType` etc).
    pub fn payload_type(&self) -> &str {
        match self {
            Message::Command(e) => &e.payload.command_type,
            Message::Telemetry(e) => &e.payload.telemetry_type,
            Message::Response(e) => &e.payload.response_type,
        }
    }

    /// The schemaless property bag (`parameters` or `data`).
    pub fn payload_value(&self) -> &Value {
        match self {
            Message::Command(e) => &e.payload.parameters,
            Message::Telemetry(e) => &e.payload.parameters,
            Message::Response(e) => &e.payload.data,
        }
    }
}

/// Stamps outbound messages with this node's source name and message version.
#[derive(Debug, Clone)]
pub struct Messenger {
    source: String,
    version: String,
}

impl Messenger {
    pub fn new(source: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            version: version.into(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    fn envelope<P>(&self, payload: P) -> Envelope<P> {
        Envelope {
            timestamp: Utc::now(),
            source: self.source.clone(),
            version: self.version.clone(),
            payload,
        }
    }

    pub fn command(&self, command_type: &str, parameters: Value) -> Message {
        Message::Command(self.envelope(CommandPayload {
            command_type: command_type.to_string(),
            parameters,
        }))
    }

    pub fn telemetry(&self, telemetry_type: &str, parameters: Value) -> Message {
        Message::Telemetry(self.envelope(TelemetryPayload {
            telemetry_type: telemetry_type.to_string(),
            parameters,
        }))
    }

    pub fn response(&self, response_type: &str, data: Value) -> Message {
        Message::Response(self.envelope(ResponsePayload {
            response_type: response_type.to_string(),
            data,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn command_round_trips_through_json() {
        let msg = Messenger::new("mount-controller", "1.0.0")
            .command("set", json!({"az": 123.4, "el": 45.0}));
        let encoded = serde_json::to_string(&msg).unwrap();
        let decoded: Message = serde_json::from_str(&encoded).unwrap();
        assert_eq!(msg, decoded);
        assert_eq!(decoded.kind(), MessageKind::Command);
        assert_eq!(decoded.payload_type(), "set");
        assert_eq!(decoded.payload_value()["az"], json!(123.4));
    }

    #[test]
    fn envelope_is_tagged_with_message_type() {
        let msg = Messenger::new("sdr-controller", "1.0.0").telemetry("status", json!({}));
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["messageType"], json!("telemetry"));
        assert_eq!(value["source"], json!("sdr-controller"));
        assert_eq!(value["payload"]["telemetryType"], json!("status"));
    }

    #[test]
    fn response_data_defaults_to_null_when_absent() {
        let raw = json!({
            "messageType": "response",
            "timestamp": "2026-03-01T00:00:00Z",
            "source": "astrodynamics-controller",
            "version": "1.0.0",
            "payload": {"responseType": "ack"}
        });
        let msg: Message = serde_json::from_value(raw).unwrap();
        assert_eq!(msg.kind(), MessageKind::Response);
        assert!(msg.payload_value().is_null());
    }
}
