//! The standard message envelope every bus publish validates against.
//!
//! Grounded on the shape `engine::events::EventBus` already threads through
//! its `TriggerEvent` (id, timestamp, payload), generalized here to the full
//! envelope §6 describes: addressing, correlation, and extensible metadata.

use crate::error::{OrchestratorError, Result};
use crate::ids::MessageId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Request,
    Response,
    Event,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub id: MessageId,
    pub timestamp: DateTime<Utc>,
    pub from: Option<String>,
    pub to: Option<String>,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub topic: Option<String>,
    pub correlation_id: Option<String>,
    pub payload: Value,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl MessageEnvelope {
    pub fn event(topic: impl Into<String>, payload: Value) -> Self {
        Self {
            id: MessageId::new(),
            timestamp: Utc::now(),
            from: None,
            to: None,
            kind: MessageKind::Event,
            topic: Some(topic.into()),
            correlation_id: None,
            payload,
            metadata: HashMap::new(),
        }
    }

    pub fn request(topic: impl Into<String>, payload: Value) -> Self {
        let correlation_id = MessageId::new().to_string();
        Self {
            id: MessageId::new(),
            timestamp: Utc::now(),
            from: None,
            to: None,
            kind: MessageKind::Request,
            topic: Some(topic.into()),
            correlation_id: Some(correlation_id),
            payload,
            metadata: HashMap::new(),
        }
    }

    /// Builds the response envelope for a prior request, addressed at
    /// `response.<correlationId>` per §4.3.
    pub fn reply_to(&self, payload: Value) -> Result<Self> {
        let correlation_id = self
            .correlation_id
            .clone()
            .ok_or_else(|| OrchestratorError::InvalidInput("cannot reply to a message with no correlation id".into()))?;
        Ok(Self {
            id: MessageId::new(),
            timestamp: Utc::now(),
            from: self.to.clone(),
            to: self.from.clone(),
            kind: MessageKind::Response,
            topic: Some(response_topic(&correlation_id)),
            correlation_id: Some(correlation_id),
            payload,
            metadata: HashMap::new(),
        })
    }

    /// Structural validation every publish and direct-send must pass before
    /// the message is stored or delivered.
    pub fn validate(&self) -> Result<()> {
        if self.topic.is_none() && self.to.is_none() {
            return Err(OrchestratorError::InvalidInput(
                "message must have either a topic or a direct recipient".into(),
            ));
        }
        if matches!(self.kind, MessageKind::Response) && self.correlation_id.is_none() {
            return Err(OrchestratorError::InvalidInput(
                "response messages must carry a correlation id".into(),
            ));
        }
        Ok(())
    }
}

pub fn response_topic(correlation_id: &str) -> String {
    format!("response.{correlation_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_without_topic_or_recipient_fails_validation() {
        let mut msg = MessageEnvelope::event("t", json!({}));
        msg.topic = None;
        assert!(msg.validate().is_err());
    }

    #[test]
    fn reply_to_targets_the_correlation_topic() {
        let request = MessageEnvelope::request("agents.echo", json!({"x": 1}));
        let response = request.reply_to(json!({"ok": true})).unwrap();
        assert_eq!(response.topic.unwrap(), response_topic(request.correlation_id.as_ref().unwrap()));
        assert_eq!(response.correlation_id, request.correlation_id);
    }
}
