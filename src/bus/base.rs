//! Base message bus: topic pub/sub, direct send, request/response by
//! correlation id, bounded history.
//!
//! Grounded on `engine::events::EventBus`'s `broadcast::Sender` plus
//! `subscribe()`/`publish()` shape; generalized from a single
//! `TriggerEvent` payload into the full addressed/correlated envelope.

use crate::bus::envelope::{response_topic, MessageEnvelope};
use crate::error::{OrchestratorError, Result};
use crate::ids::SubscriberId;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, Mutex};

#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, message: MessageEnvelope) -> Result<()>;
}

#[async_trait]
impl<F> Handler for F
where
    F: Fn(MessageEnvelope) -> Result<()> + Send + Sync + 'static,
{
    async fn handle(&self, message: MessageEnvelope) -> Result<()> {
        self(message)
    }
}

#[derive(Debug, Clone)]
pub enum BusEvent {
    DeliveryError { subscriber: SubscriberId, topic: String, error: String },
    UnknownSubscriber { to: String },
}

const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

struct Subscription {
    subscriber: SubscriberId,
    handler: Arc<dyn Handler>,
}

pub struct BaseMessageBus {
    topics: DashMap<String, Vec<Subscription>>,
    direct: DashMap<String, Arc<dyn Handler>>,
    history: Mutex<VecDeque<MessageEnvelope>>,
    max_history_size: usize,
    events: broadcast::Sender<BusEvent>,
}

impl BaseMessageBus {
    pub fn new(max_history_size: usize) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            topics: DashMap::new(),
            direct: DashMap::new(),
            history: Mutex::new(VecDeque::with_capacity(max_history_size.min(1024))),
            max_history_size,
            events,
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<BusEvent> {
        self.events.subscribe()
    }

    /// Registers `handler` for both topic delivery and as a direct-send
    /// target addressed by `subscriber`. Idempotent per (subscriber, topic).
    pub fn subscribe(&self, subscriber: SubscriberId, topics: &[&str], handler: Arc<dyn Handler>) {
        self.direct.insert(subscriber.as_str().to_string(), handler.clone());
        for topic in topics {
            let mut entry = self.topics.entry(topic.to_string()).or_default();
            if !entry.iter().any(|s| s.subscriber == subscriber) {
                entry.push(Subscription { subscriber: subscriber.clone(), handler: handler.clone() });
            }
        }
    }

    pub fn unsubscribe(&self, subscriber: &SubscriberId, topic: &str) {
        if let Some(mut entry) = self.topics.get_mut(topic) {
            entry.retain(|s| &s.subscriber != subscriber);
        }
    }

    async fn record_history(&self, message: MessageEnvelope) {
        let mut history = self.history.lock().await;
        history.push_back(message);
        while history.len() > self.max_history_size {
            history.pop_front();
        }
    }

    pub async fn history(&self) -> Vec<MessageEnvelope> {
        self.history.lock().await.iter().cloned().collect()
    }

    /// Validates, stores, and fans out `message` to every subscriber of its
    /// topic. A failed or timed-out delivery to one subscriber emits
    /// `BusEvent::DeliveryError` and does not stop delivery to the rest.
    pub async fn publish(&self, message: MessageEnvelope) -> Result<()> {
        message.validate()?;
        let topic = message.topic.clone().ok_or_else(|| {
            OrchestratorError::InvalidInput("publish requires a topic; use direct_send for addressed delivery".into())
        })?;
        self.record_history(message.clone()).await;

        let subscribers: Vec<Subscription> = self
            .topics
            .get(&topic)
            .map(|entry| entry.iter().map(|s| Subscription { subscriber: s.subscriber.clone(), handler: s.handler.clone() }).collect())
            .unwrap_or_default();

        for subscription in subscribers {
            let message = message.clone();
            let events = self.events.clone();
            let topic = topic.clone();
            tokio::spawn(async move {
                let outcome = tokio::time::timeout(DEFAULT_DELIVERY_TIMEOUT, subscription.handler.handle(message)).await;
                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        let _ = events.send(BusEvent::DeliveryError {
                            subscriber: subscription.subscriber,
                            topic,
                            error: err.to_string(),
                        });
                    }
                    Err(_) => {
                        let _ = events.send(BusEvent::DeliveryError {
                            subscriber: subscription.subscriber,
                            topic,
                            error: "delivery timed out".into(),
                        });
                    }
                }
            });
        }
        Ok(())
    }

    /// Delivers `message` to exactly one subscriber addressed by `message.to`.
    pub async fn direct_send(&self, message: MessageEnvelope) -> Result<()> {
        message.validate()?;
        let to = message
            .to
            .clone()
            .ok_or_else(|| OrchestratorError::InvalidInput("direct_send requires `to`".into()))?;
        self.record_history(message.clone()).await;

        let Some(handler) = self.direct.get(&to).map(|h| h.clone()) else {
            let _ = self.events.send(BusEvent::UnknownSubscriber { to: to.clone() });
            return Err(OrchestratorError::NotFound(format!("subscriber {to}")));
        };
        tokio::time::timeout(DEFAULT_DELIVERY_TIMEOUT, handler.handle(message))
            .await
            .map_err(|_| OrchestratorError::Timeout(DEFAULT_DELIVERY_TIMEOUT))?
    }

    /// Publishes `message` as a request and resolves with the first reply on
    /// `response.<correlationId>`, or rejects on timeout. The transient
    /// subscription is removed on either outcome.
    pub async fn request(&self, message: MessageEnvelope, timeout: Duration) -> Result<MessageEnvelope> {
        let correlation_id = message
            .correlation_id
            .clone()
            .ok_or_else(|| OrchestratorError::InvalidInput("request messages must carry a correlation id".into()))?;
        let topic = response_topic(&correlation_id);
        let subscriber = SubscriberId::new(format!("__request__{correlation_id}"));

        let (tx, rx) = oneshot::channel();
        let tx = Arc::new(Mutex::new(Some(tx)));
        let responder: Arc<dyn Handler> = Arc::new(TransientResponder { tx });
        self.subscribe(subscriber.clone(), &[&topic], responder);

        self.publish(message).await?;

        let result = tokio::time::timeout(timeout, rx).await;
        self.unsubscribe(&subscriber, &topic);

        match result {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(OrchestratorError::Transport("request responder dropped".into())),
            Err(_) => Err(OrchestratorError::Timeout(timeout)),
        }
    }

    pub async fn reply(&self, original: &MessageEnvelope, payload: serde_json::Value) -> Result<()> {
        let response = original.reply_to(payload)?;
        self.publish(response).await
    }
}

struct TransientResponder {
    tx: Arc<Mutex<Option<oneshot::Sender<MessageEnvelope>>>>,
}

#[async_trait]
impl Handler for TransientResponder {
    async fn handle(&self, message: MessageEnvelope) -> Result<()> {
        if let Some(tx) = self.tx.lock().await.take() {
            let _ = tx.send(message);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::envelope::MessageEnvelope;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler(Arc<AtomicUsize>);

    #[async_trait]
    impl Handler for CountingHandler {
        async fn handle(&self, _message: MessageEnvelope) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn publish_delivers_to_every_subscriber_of_the_topic() {
        let bus = BaseMessageBus::new(10);
        let counter = Arc::new(AtomicUsize::new(0));
        bus.subscribe(SubscriberId::new("a"), &["topic.x"], Arc::new(CountingHandler(counter.clone())));
        bus.subscribe(SubscriberId::new("b"), &["topic.x"], Arc::new(CountingHandler(counter.clone())));

        bus.publish(MessageEnvelope::event("topic.x", json!({}))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn direct_send_to_unknown_subscriber_fails() {
        let bus = BaseMessageBus::new(10);
        let mut msg = MessageEnvelope::event("ignored", json!({}));
        msg.to = Some("nobody".into());
        let err = bus.direct_send(msg).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::NotFound(_)));
    }

    #[tokio::test]
    async fn request_resolves_on_first_reply() {
        let bus = Arc::new(BaseMessageBus::new(10));
        let responder_bus = bus.clone();
        bus.subscribe(
            SubscriberId::new("echo"),
            &["echo.request"],
            Arc::new(move |message: MessageEnvelope| {
                let bus = responder_bus.clone();
                tokio::spawn(async move {
                    let _ = bus.reply(&message, json!({"echo": true})).await;
                });
                Ok(())
            }),
        );

        let request = MessageEnvelope::request("echo.request", json!({}));
        let response = bus.request(request, Duration::from_secs(1)).await.unwrap();
        assert_eq!(response.payload, json!({"echo": true}));
    }

    #[tokio::test]
    async fn history_is_capped_at_max_size() {
        let bus = BaseMessageBus::new(2);
        for i in 0..5 {
            bus.publish(MessageEnvelope::event("t", json!(i))).await.unwrap();
        }
        assert_eq!(bus.history().await.len(), 2);
    }
}
