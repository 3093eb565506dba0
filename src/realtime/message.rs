//! Notification wire messages.
//!
//! Every frame on the socket is a JSON object
//! `{"type", "channel", "data", "timestamp", "message_id"}`. Outbound frames
//! are [`NotificationMessage`]s; inbound text is parsed into the closed
//! [`InboundMessage`] union so dispatch can match exhaustively.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

/// Every message type that can appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    // client -> server
    Connect,
    Subscribe,
    Unsubscribe,
    Ping,
    // server -> client
    Connected,
    Subscribed,
    Unsubscribed,
    Pong,
    Error,
    // domain events
    DebateStarted,
    DebateEnded,
    ExtractionStarted,
    ExtractionCompleted,
    ExtractionFailed,
    SystemStatus,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
            Self::Ping => "ping",
            Self::Connected => "connected",
            Self::Subscribed => "subscribed",
            Self::Unsubscribed => "unsubscribed",
            Self::Pong => "pong",
            Self::Error => "error",
            Self::DebateStarted => "debate_started",
            Self::DebateEnded => "debate_ended",
            Self::ExtractionStarted => "extraction_started",
            Self::ExtractionCompleted => "extraction_completed",
            Self::ExtractionFailed => "extraction_failed",
            Self::SystemStatus => "system_status",
        }
    }
}

/// A message sent to clients.
///
/// Timestamp and identifier are fixed at construction; there are no setters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationMessage {
    #[serde(rename = "type")]
    kind: MessageType,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    data: Option<Map<String, Value>>,
    #[serde(with = "time::serde::rfc3339", default = "OffsetDateTime::now_utc")]
    timestamp: OffsetDateTime,
    #[serde(default = "Uuid::new_v4")]
    message_id: Uuid,
}

impl NotificationMessage {
    pub fn new(kind: MessageType) -> Self {
        Self {
            kind,
            channel: None,
            data: None,
            timestamp: OffsetDateTime::now_utc(),
            message_id: Uuid::new_v4(),
        }
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = Some(data);
        self
    }

    /// `error` reply carrying `{"error": reason}`.
    pub fn error(reason: impl Into<String>) -> Self {
        let mut data = Map::new();
        data.insert("error".to_string(), Value::String(reason.into()));
        Self::new(MessageType::Error).with_data(data)
    }

    pub fn kind(&self) -> MessageType {
        self.kind
    }

    pub fn channel(&self) -> Option<&str> {
        self.channel.as_deref()
    }

    pub fn data(&self) -> Option<&Map<String, Value>> {
        self.data.as_ref()
    }

    /// Field `name` of the payload, if any.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.data.as_ref().and_then(|data| data.get(name))
    }

    pub fn timestamp(&self) -> OffsetDateTime {
        self.timestamp
    }

    pub fn message_id(&self) -> Uuid {
        self.message_id
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Parsed client frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    Ping,
    Subscribe { channel: String },
    Unsubscribe { channel: String },
    /// A known type the server does not accept from clients.
    Unsupported(MessageType),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("Invalid JSON format: {0}")]
    Malformed(String),
    #[error("Invalid message type: {0}")]
    UnknownType(String),
    #[error("Channel name required for {0}")]
    MissingChannel(&'static str),
    #[error("Invalid channel: {0}")]
    ChannelRejected(String),
    #[error("Unhandled message type: {}", .0.as_str())]
    Unsupported(MessageType),
}

#[derive(Deserialize)]
struct RawInbound {
    #[serde(rename = "type")]
    kind: Option<Value>,
    #[serde(default)]
    channel: Option<String>,
}

/// Parse one inbound text frame.
pub fn parse_inbound(raw: &str) -> Result<InboundMessage, MessageError> {
    let frame: RawInbound =
        serde_json::from_str(raw).map_err(|err| MessageError::Malformed(err.to_string()))?;

    let tag = match frame.kind {
        Some(Value::String(tag)) => tag,
        Some(other) => return Err(MessageError::UnknownType(other.to_string())),
        None => return Err(MessageError::UnknownType("missing `type`".to_string())),
    };
    let kind: MessageType = serde_json::from_value(Value::String(tag.clone()))
        .map_err(|_| MessageError::UnknownType(tag))?;

    let channel = frame.channel.filter(|channel| !channel.is_empty());
    match kind {
        MessageType::Ping => Ok(InboundMessage::Ping),
        MessageType::Subscribe => channel
            .map(|channel| InboundMessage::Subscribe { channel })
            .ok_or(MessageError::MissingChannel("subscription")),
        MessageType::Unsubscribe => channel
            .map(|channel| InboundMessage::Unsubscribe { channel })
            .ok_or(MessageError::MissingChannel("unsubscription")),
        other => Ok(InboundMessage::Unsupported(other)),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn outbound_wire_shape() {
        let mut data = Map::new();
        data.insert("debate_id".to_string(), json!("d1"));
        let message = NotificationMessage::new(MessageType::ExtractionStarted)
            .with_channel("extractions")
            .with_data(data);

        let wire: Value = serde_json::from_str(&message.to_json().unwrap()).unwrap();

        assert_eq!(wire["type"], "extraction_started");
        assert_eq!(wire["channel"], "extractions");
        assert_eq!(wire["data"]["debate_id"], "d1");
        assert!(wire["timestamp"].as_str().unwrap().contains('T'));
        assert!(Uuid::parse_str(wire["message_id"].as_str().unwrap()).is_ok());
    }

    #[test]
    fn bare_message_serializes_nulls() {
        let wire: Value =
            serde_json::from_str(&NotificationMessage::new(MessageType::Pong).to_json().unwrap())
                .unwrap();
        assert_eq!(wire["channel"], Value::Null);
        assert_eq!(wire["data"], Value::Null);
    }

    #[test]
    fn identifiers_are_unique() {
        let a = NotificationMessage::new(MessageType::Pong);
        let b = NotificationMessage::new(MessageType::Pong);
        assert_ne!(a.message_id(), b.message_id());
    }

    #[test]
    fn deserialize_fills_missing_fields() {
        let message: NotificationMessage =
            serde_json::from_str(r#"{"type": "system_status"}"#).unwrap();
        assert_eq!(message.kind(), MessageType::SystemStatus);
        assert!(message.channel().is_none());
    }

    #[test]
    fn parses_client_frames() {
        assert_eq!(parse_inbound(r#"{"type":"ping"}"#), Ok(InboundMessage::Ping));
        assert_eq!(
            parse_inbound(r#"{"type":"subscribe","channel":"debates"}"#),
            Ok(InboundMessage::Subscribe {
                channel: "debates".to_string()
            })
        );
        assert_eq!(
            parse_inbound(r#"{"type":"unsubscribe","channel":"debate:7"}"#),
            Ok(InboundMessage::Unsubscribe {
                channel: "debate:7".to_string()
            })
        );
        assert_eq!(
            parse_inbound(r#"{"type":"connect"}"#),
            Ok(InboundMessage::Unsupported(MessageType::Connect))
        );
    }

    #[test]
    fn rejects_bad_frames() {
        assert!(matches!(
            parse_inbound("not json"),
            Err(MessageError::Malformed(_))
        ));
        assert!(matches!(
            parse_inbound(r#"{"type":"shout"}"#),
            Err(MessageError::UnknownType(tag)) if tag == "shout"
        ));
        assert!(matches!(
            parse_inbound(r#"{"type":42}"#),
            Err(MessageError::UnknownType(_))
        ));
        assert!(matches!(
            parse_inbound(r#"{"channel":"debates"}"#),
            Err(MessageError::UnknownType(_))
        ));
        assert_eq!(
            parse_inbound(r#"{"type":"subscribe","channel":""}"#),
            Err(MessageError::MissingChannel("subscription"))
        );
    }

    #[test]
    fn error_reply_carries_reason() {
        let reply = NotificationMessage::error("Invalid channel: nope");
        assert_eq!(reply.kind(), MessageType::Error);
        assert_eq!(reply.field("error"), Some(&json!("Invalid channel: nope")));
    }
}
