//! Named-topic event bus shared by UI features.
//!
//! The raw API moves optional JSON payloads between topics. [`AppEvent`]
//! layers the well-known application events on top, each bound to a fixed
//! topic name.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::Stream;
use serde_json::{Value, json};
use tether_types::{Fanout, NotificationLevel, Subscription};
use tracing::debug;

pub const CONNECTION_STATUS: &str = "connection-status";
pub const NOTIFICATION: &str = "notification";
pub const CAMERA_CHANGED: &str = "camera-changed";
pub const VIEWPORT_CHANGED: &str = "viewport-changed";
pub const KEYBOARD_LOCK: &str = "keyboard-lock";

/// Well-known application events
#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    ConnectionStatus { connected: bool },
    /// Transient message for the user
    Notification {
        level: NotificationLevel,
        message: String,
    },
    CameraChanged(Value),
    ViewportChanged(Value),
    /// Keyboard shortcuts suspended, e.g. while a text field has focus
    KeyboardLock { locked: bool },
}

impl AppEvent {
    #[must_use]
    pub fn topic(&self) -> &'static str {
        match self {
            Self::ConnectionStatus { .. } => CONNECTION_STATUS,
            Self::Notification { .. } => NOTIFICATION,
            Self::CameraChanged(_) => CAMERA_CHANGED,
            Self::ViewportChanged(_) => VIEWPORT_CHANGED,
            Self::KeyboardLock { .. } => KEYBOARD_LOCK,
        }
    }

    /// Payload as published on the raw topic.
    #[must_use]
    pub fn payload(&self) -> Value {
        match self {
            Self::ConnectionStatus { connected } => json!({ "connected": connected }),
            Self::Notification { level, message } => json!({ "level": level, "message": message }),
            Self::CameraChanged(value) | Self::ViewportChanged(value) => value.clone(),
            Self::KeyboardLock { locked } => json!({ "locked": locked }),
        }
    }

    /// Rebuild an event from a raw topic and payload.
    #[must_use]
    pub fn from_topic(topic: &str, payload: Option<&Value>) -> Option<Self> {
        let field = |name: &str| payload.and_then(|p| p.get(name));
        match topic {
            CONNECTION_STATUS => Some(Self::ConnectionStatus {
                connected: field("connected")?.as_bool()?,
            }),
            NOTIFICATION => Some(Self::Notification {
                level: serde_json::from_value(field("level")?.clone()).ok()?,
                message: field("message")?.as_str()?.to_string(),
            }),
            CAMERA_CHANGED => Some(Self::CameraChanged(payload.cloned().unwrap_or(Value::Null))),
            VIEWPORT_CHANGED => Some(Self::ViewportChanged(
                payload.cloned().unwrap_or(Value::Null),
            )),
            KEYBOARD_LOCK => Some(Self::KeyboardLock {
                locked: field("locked")?.as_bool()?,
            }),
            _ => None,
        }
    }
}

/// In-process pub/sub broker keyed by topic name.
///
/// Cloning is cheap; clones share topics and subscribers.
#[derive(Clone, Default)]
pub struct EventBus {
    topics: Arc<Fanout<Option<Value>>>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `payload` to every current subscriber of `topic`.
    ///
    /// Returns the number of subscribers reached.
    pub fn publish(&self, topic: &str, payload: Option<Value>) -> usize {
        self.topics.publish(topic, payload)
    }

    /// Stream of future payloads on `topic`.
    #[must_use]
    pub fn subscribe(&self, topic: &str) -> Subscription<Option<Value>> {
        self.topics.subscribe(topic)
    }

    pub fn publish_event(&self, event: &AppEvent) -> usize {
        self.publish(event.topic(), Some(event.payload()))
    }

    /// Typed stream of the events published on `topic`.
    #[must_use]
    pub fn subscribe_events(&self, topic: &'static str) -> EventStream {
        EventStream {
            topic,
            inner: self.subscribe(topic),
        }
    }

    /// Publish a user-facing notification.
    pub fn notify_user(&self, level: NotificationLevel, message: impl Into<String>) -> usize {
        self.publish_event(&AppEvent::Notification {
            level,
            message: message.into(),
        })
    }

    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.subscriber_count(topic)
    }

    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        self.topics.topics()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("topics", &self.topics())
            .finish()
    }
}

/// Decoded [`AppEvent`]s from one topic. Payloads that do not decode are
/// skipped.
#[derive(Debug)]
pub struct EventStream {
    topic: &'static str,
    inner: Subscription<Option<Value>>,
}

impl Stream for EventStream {
    type Item = AppEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<AppEvent>> {
        loop {
            let Some(payload) = std::task::ready!(Pin::new(&mut self.inner).poll_next(cx)) else {
                return Poll::Ready(None);
            };
            match AppEvent::from_topic(self.topic, payload.as_ref()) {
                Some(event) => return Poll::Ready(Some(event)),
                None => debug!("Skipping undecodable payload on '{}'", self.topic),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber() {
        let bus = EventBus::new();
        let mut a = bus.subscribe("selection");
        let mut b = bus.subscribe("selection");

        assert_eq!(bus.publish("selection", Some(json!({"id": 1}))), 2);

        assert_eq!(a.next().await, Some(Some(json!({"id": 1}))));
        assert_eq!(b.next().await, Some(Some(json!({"id": 1}))));
    }

    #[tokio::test]
    async fn test_payload_is_optional() {
        let bus = EventBus::new();
        let mut reset = bus.subscribe("reset");
        bus.publish("reset", None);
        assert_eq!(reset.next().await, Some(None));
    }

    #[test]
    fn test_late_subscriber_misses_earlier_events() {
        let bus = EventBus::new();
        assert_eq!(bus.publish("selection", Some(json!(1))), 0);

        let mut late = bus.subscribe("selection");
        assert!(late.try_recv().is_none());
        bus.publish("selection", Some(json!(2)));
        assert_eq!(late.try_recv(), Some(Some(json!(2))));
        assert!(late.try_recv().is_none());
    }

    #[test]
    fn test_unsubscribe_does_not_affect_others() {
        let bus = EventBus::new();
        let dropped = bus.subscribe("t");
        let mut kept = bus.subscribe("t");
        drop(dropped);

        assert_eq!(bus.publish("t", Some(json!("x"))), 1);
        assert_eq!(kept.try_recv(), Some(Some(json!("x"))));
        assert_eq!(bus.subscriber_count("t"), 1);
    }

    #[test]
    fn test_clones_share_topics() {
        let bus = EventBus::new();
        let clone = bus.clone();
        let mut sub = clone.subscribe("t");
        bus.publish("t", None);
        assert_eq!(sub.try_recv(), Some(None));
        assert_eq!(bus.topics(), vec!["t".to_string()]);
    }

    #[test]
    fn test_app_event_topic_round_trip() {
        let events = [
            AppEvent::ConnectionStatus { connected: true },
            AppEvent::Notification {
                level: NotificationLevel::Warning,
                message: "Model failed to load".to_string(),
            },
            AppEvent::CameraChanged(json!({"position": [0, 0, 5]})),
            AppEvent::ViewportChanged(json!({"width": 800})),
            AppEvent::KeyboardLock { locked: false },
        ];
        for event in events {
            let payload = event.payload();
            assert_eq!(
                AppEvent::from_topic(event.topic(), Some(&payload)),
                Some(event)
            );
        }
    }

    #[test]
    fn test_from_topic_rejects_bad_payloads() {
        assert_eq!(AppEvent::from_topic("unknown", None), None);
        assert_eq!(AppEvent::from_topic(CONNECTION_STATUS, None), None);
        assert_eq!(
            AppEvent::from_topic(KEYBOARD_LOCK, Some(&json!({"locked": "yes"}))),
            None
        );
        assert_eq!(
            AppEvent::from_topic(CAMERA_CHANGED, None),
            Some(AppEvent::CameraChanged(Value::Null))
        );
    }

    #[tokio::test]
    async fn test_subscribe_events_skips_undecodable() {
        let bus = EventBus::new();
        let mut status = bus.subscribe_events(CONNECTION_STATUS);

        bus.publish(CONNECTION_STATUS, Some(json!("garbage")));
        bus.publish_event(&AppEvent::ConnectionStatus { connected: false });

        assert_eq!(
            status.next().await,
            Some(AppEvent::ConnectionStatus { connected: false })
        );
    }

    #[tokio::test]
    async fn test_notify_user() {
        let bus = EventBus::new();
        let mut notes = bus.subscribe_events(NOTIFICATION);
        assert_eq!(bus.notify_user(NotificationLevel::Success, "Uploaded"), 1);
        assert_eq!(
            notes.next().await,
            Some(AppEvent::Notification {
                level: NotificationLevel::Success,
                message: "Uploaded".to_string(),
            })
        );
    }
}
