//! Typed domain notifications.
//!
//! Builds the payloads for debate and extraction lifecycle events and
//! publishes each one on its topic channel and, for per-debate events, on
//! `debate:<id>` as well. The message carries the topic channel in both cases.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value, json};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::warn;

use super::channel::{DEBATES, EXTRACTIONS, SYSTEM, debate_channel};
use super::message::{MessageType, NotificationMessage};
use super::registry::ConnectionRegistry;

const SOURCE: &str = "realtime::notify";
const AUDIO_FORMAT: &str = "mp3";
const EXTRACTION_ESTIMATE: &str = "5-10 minutes";

#[derive(Clone)]
pub struct Notifier {
    registry: ConnectionRegistry,
}

impl Notifier {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }

    pub fn debate_started(&self, debate_id: &str, debate: &impl Serialize) -> usize {
        self.debate_event(MessageType::DebateStarted, "started", debate_id, debate)
    }

    pub fn debate_ended(&self, debate_id: &str, debate: &impl Serialize) -> usize {
        self.debate_event(MessageType::DebateEnded, "ended", debate_id, debate)
    }

    pub fn extraction_started(&self, debate_id: &str, extraction_id: &str) -> usize {
        let data = object([
            ("debate_id", json!(debate_id)),
            ("extraction_id", json!(extraction_id)),
            ("status", json!("started")),
            ("estimated_duration", json!(EXTRACTION_ESTIMATE)),
        ]);
        self.publish(MessageType::ExtractionStarted, EXTRACTIONS, Some(debate_id), data)
    }

    pub fn extraction_completed(
        &self,
        debate_id: &str,
        extraction_id: &str,
        audio_url: &str,
        file_size: u64,
    ) -> usize {
        let data = object([
            ("debate_id", json!(debate_id)),
            ("extraction_id", json!(extraction_id)),
            ("status", json!("completed")),
            ("audio_url", json!(audio_url)),
            ("file_size", json!(file_size)),
            ("format", json!(AUDIO_FORMAT)),
        ]);
        self.publish(MessageType::ExtractionCompleted, EXTRACTIONS, Some(debate_id), data)
    }

    pub fn extraction_failed(&self, debate_id: &str, extraction_id: &str, error: &str) -> usize {
        let data = object([
            ("debate_id", json!(debate_id)),
            ("extraction_id", json!(extraction_id)),
            ("status", json!("failed")),
            ("error", json!(error)),
        ]);
        self.publish(MessageType::ExtractionFailed, EXTRACTIONS, Some(debate_id), data)
    }

    pub fn system_status(&self, status: &str, details: Value) -> usize {
        let timestamp = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default();
        let data = object([
            ("status", json!(status)),
            ("details", details),
            ("timestamp", json!(timestamp)),
        ]);
        self.publish(MessageType::SystemStatus, SYSTEM, None, data)
    }

    fn debate_event(
        &self,
        kind: MessageType,
        action: &str,
        debate_id: &str,
        debate: &impl Serialize,
    ) -> usize {
        let debate = serde_json::to_value(debate).unwrap_or_else(|err| {
            warn!(
                component = SOURCE,
                debate_id,
                error = %err,
                "debate payload not serializable"
            );
            Value::Null
        });
        let data = object([
            ("debate_id", json!(debate_id)),
            ("debate", debate),
            ("action", json!(action)),
        ]);
        self.publish(kind, DEBATES, Some(debate_id), data)
    }

    fn publish(
        &self,
        kind: MessageType,
        topic: &str,
        debate_id: Option<&str>,
        data: Map<String, Value>,
    ) -> usize {
        let message = Arc::new(
            NotificationMessage::new(kind)
                .with_channel(topic)
                .with_data(data),
        );

        let mut delivered = self.registry.broadcast(topic, Arc::clone(&message));
        if let Some(debate_id) = debate_id {
            delivered += self.registry.broadcast(&debate_channel(debate_id), message);
        }
        delivered
    }
}

fn object<const N: usize>(fields: [(&str, Value); N]) -> Map<String, Value> {
    fields
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::realtime::{ConnectOptions, QueueTransport, RealtimeConfig};

    fn subscriber(
        registry: &ConnectionRegistry,
        channel: &str,
    ) -> mpsc::Receiver<Arc<NotificationMessage>> {
        let (transport, mut inbox) = QueueTransport::channel(16);
        let id = registry
            .register_with(Arc::new(transport), ConnectOptions::default())
            .expect("register");
        registry.subscribe(&id, channel);
        inbox.try_recv().expect("welcome");
        inbox
    }

    #[tokio::test]
    async fn extraction_completed_payload() {
        let registry = ConnectionRegistry::new(RealtimeConfig::default());
        let notifier = Notifier::new(registry.clone());
        let mut topic = subscriber(&registry, "extractions");
        let mut debate = subscriber(&registry, "debate:d1");

        let delivered = notifier.extraction_completed("d1", "x1", "/audio/d1.mp3", 1024);
        assert_eq!(delivered, 2);

        let on_topic = topic.try_recv().expect("topic message");
        let on_debate = debate.try_recv().expect("debate message");
        assert_eq!(on_topic.message_id(), on_debate.message_id());
        assert_eq!(on_debate.channel(), Some("extractions"));
        assert_eq!(on_topic.kind(), MessageType::ExtractionCompleted);
        assert_eq!(on_topic.field("status"), Some(&json!("completed")));
        assert_eq!(on_topic.field("file_size"), Some(&json!(1024)));
        assert_eq!(on_topic.field("format"), Some(&json!("mp3")));
    }

    #[tokio::test]
    async fn debate_started_embeds_debate() {
        let registry = ConnectionRegistry::new(RealtimeConfig::default());
        let notifier = Notifier::new(registry.clone());
        let mut debates = subscriber(&registry, "debates");

        notifier.debate_started("d7", &json!({"title": "Budget 2025"}));

        let message = debates.try_recv().expect("message");
        assert_eq!(message.kind(), MessageType::DebateStarted);
        assert_eq!(message.field("action"), Some(&json!("started")));
        assert_eq!(message.field("debate"), Some(&json!({"title": "Budget 2025"})));
    }

    #[tokio::test]
    async fn system_status_only_hits_system() {
        let registry = ConnectionRegistry::new(RealtimeConfig::default());
        let notifier = Notifier::new(registry.clone());
        let mut system = subscriber(&registry, "system");
        let mut debates = subscriber(&registry, "debates");

        let delivered = notifier.system_status("degraded", json!({"redis": "down"}));

        assert_eq!(delivered, 1);
        let message = system.try_recv().expect("message");
        assert_eq!(message.field("details"), Some(&json!({"redis": "down"})));
        assert!(message.field("timestamp").is_some());
        assert!(debates.try_recv().is_err());
    }

    #[tokio::test]
    async fn failed_extraction_reports_error() {
        let registry = ConnectionRegistry::new(RealtimeConfig::default());
        let notifier = Notifier::new(registry.clone());
        let mut topic = subscriber(&registry, "extractions");

        notifier.extraction_failed("d1", "x1", "stream not found");

        let message = topic.try_recv().expect("message");
        assert_eq!(message.kind(), MessageType::ExtractionFailed);
        assert_eq!(message.field("error"), Some(&json!("stream not found")));
    }

    #[tokio::test]
    async fn unserializable_debate_is_sent_as_null() {
        let registry = ConnectionRegistry::new(RealtimeConfig::default());
        let notifier = Notifier::new(registry.clone());
        let mut debates = subscriber(&registry, "debates");
        let debate = std::collections::HashMap::from([((1u8, 2u8), "tuple keys")]);

        assert_eq!(notifier.debate_ended("d3", &debate), 1);

        let message = debates.try_recv().expect("message");
        assert_eq!(message.kind(), MessageType::DebateEnded);
        assert_eq!(message.field("debate"), Some(&Value::Null));
        assert_eq!(message.field("debate_id"), Some(&json!("d3")));
    }
}
