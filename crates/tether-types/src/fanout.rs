//! Named multicast channels.
//!
//! A [`Fanout`] maps topic names to the set of live subscribers for that
//! topic. Publishing is synchronous and never blocks: every subscriber owns
//! an unbounded queue, so a slow reader cannot cause another reader to miss
//! events. Topics are created on first use and live as long as the `Fanout`.

use std::collections::HashMap;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Topic name → subscriber registry.
pub struct Fanout<T> {
    topics: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<T>>>>,
}

impl<T: Clone> Fanout<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe to future events on `topic`.
    ///
    /// Events published before this call are never delivered.
    pub fn subscribe(&self, topic: &str) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.topics
            .lock()
            .entry(topic.to_string())
            .or_default()
            .push(tx);
        Subscription { rx }
    }

    /// Deliver `payload` to every current subscriber of `topic`.
    ///
    /// Returns the number of subscribers that received the event.
    pub fn publish(&self, topic: &str, payload: T) -> usize {
        // Send outside the lock so a subscriber dropped mid-dispatch (or a
        // re-entrant subscribe) cannot deadlock.
        let snapshot = self
            .topics
            .lock()
            .entry(topic.to_string())
            .or_default()
            .clone();

        let delivered = snapshot
            .iter()
            .filter(|tx| tx.send(payload.clone()).is_ok())
            .count();

        if delivered < snapshot.len()
            && let Some(subscribers) = self.topics.lock().get_mut(topic)
        {
            subscribers.retain(|tx| !tx.is_closed());
        }

        delivered
    }

    /// Number of live subscribers on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .lock()
            .get(topic)
            .map_or(0, |subs| subs.iter().filter(|tx| !tx.is_closed()).count())
    }

    /// Names of every topic created so far.
    pub fn topics(&self) -> Vec<String> {
        let mut names: Vec<String> = self.topics.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

impl<T: Clone> Default for Fanout<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Fanout<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fanout")
            .field("topics", &self.topics.lock().len())
            .finish()
    }
}

/// One subscriber's view of a topic.
///
/// Dropping the subscription unsubscribes; other subscribers are unaffected.
#[derive(Debug)]
pub struct Subscription<T> {
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> Subscription<T> {
    /// Wait for the next event. Returns `None` once the owning `Fanout` is gone.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Take the next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        let fanout: Fanout<u32> = Fanout::new();
        assert_eq!(fanout.publish("empty", 1), 0);
        assert_eq!(fanout.topics(), vec!["empty".to_string()]);
    }

    #[test]
    fn test_late_subscriber_misses_earlier_event() {
        let fanout = Fanout::new();
        let mut early = fanout.subscribe("camera");
        fanout.publish("camera", "first");
        let mut late = fanout.subscribe("camera");

        assert_eq!(early.try_recv(), Some("first"));
        assert_eq!(early.try_recv(), None);
        assert_eq!(late.try_recv(), None);
    }

    #[test]
    fn test_each_subscriber_gets_exactly_one_copy() {
        let fanout = Fanout::new();
        let mut a = fanout.subscribe("t");
        let mut b = fanout.subscribe("t");

        assert_eq!(fanout.publish("t", 7), 2);
        assert_eq!(a.try_recv(), Some(7));
        assert_eq!(a.try_recv(), None);
        assert_eq!(b.try_recv(), Some(7));
        assert_eq!(b.try_recv(), None);
    }

    #[test]
    fn test_topics_are_isolated() {
        let fanout = Fanout::new();
        let mut a = fanout.subscribe("a");
        fanout.publish("b", 1);
        assert_eq!(a.try_recv(), None);
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let fanout = Fanout::new();
        let keep = fanout.subscribe("t");
        let gone = fanout.subscribe("t");
        drop(gone);

        assert_eq!(fanout.subscriber_count("t"), 1);
        assert_eq!(fanout.publish("t", ()), 1);
        drop(keep);
        assert_eq!(fanout.publish("t", ()), 0);
        assert_eq!(fanout.subscriber_count("t"), 0);
    }

    #[tokio::test]
    async fn test_subscription_as_stream() {
        let fanout = Fanout::new();
        let sub = fanout.subscribe("numbers");
        for n in 0..3 {
            fanout.publish("numbers", n);
        }
        drop(fanout);

        let collected: Vec<i32> = sub.collect().await;
        assert_eq!(collected, vec![0, 1, 2]);
    }
}
