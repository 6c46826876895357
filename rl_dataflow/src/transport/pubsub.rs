//! Topic-based publish/subscribe.
//!
//! Delivery is fire-and-forget: a subscriber only sees messages published
//! after it subscribed, and nothing is retried or acknowledged. Each
//! subscription runs its handler on its own thread, in publish order.
//!
//! Every subscriber buffers at most `capacity` messages. When a slow
//! subscriber's buffer is full the oldest buffered message is dropped, so a
//! stalled subscriber never pins more than `capacity` payloads and still
//! receives the latest one.

use crate::error::Result;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;

/// Messages buffered per subscriber before the oldest is dropped.
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 16;

/// Fire-and-forget publishing side of a pub/sub transport.
pub trait Publish: Send + Sync {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;
}

impl<P: Publish + ?Sized> Publish for Arc<P> {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        (**self).publish(topic, payload)
    }
}

type Payload = Arc<Vec<u8>>;

struct Subscriber {
    tx: Sender<Payload>,
    /// Hub-side handle on the buffer, used to evict the oldest message.
    rx: Receiver<Payload>,
    /// Dead once the subscription thread has exited.
    alive: Weak<()>,
}

impl Subscriber {
    /// Queue `payload`, evicting old messages while the buffer is full.
    /// Returns how many were evicted.
    fn deliver(&self, payload: &Payload) -> usize {
        let mut evicted = 0;
        let mut message = Arc::clone(payload);
        loop {
            match self.tx.try_send(message) {
                Ok(()) => return evicted,
                Err(TrySendError::Full(back)) => {
                    if self.rx.try_recv().is_ok() {
                        evicted += 1;
                    }
                    message = back;
                }
                // The hub holds a receiver, so this only happens mid-teardown.
                Err(TrySendError::Disconnected(_)) => return evicted,
            }
        }
    }
}

/// In-process pub/sub broker. Clones share the same topic table.
#[derive(Clone)]
pub struct PubSubHub {
    topics: Arc<Mutex<HashMap<String, Vec<Subscriber>>>>,
    capacity: usize,
}

impl Default for PubSubHub {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_SUBSCRIBER_CAPACITY)
    }
}

/// Handle to a running subscription thread.
pub struct Subscription {
    topic: String,
    thread: JoinHandle<()>,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Wait for the subscription thread to exit. It exits once every clone
    /// of the hub has been dropped.
    pub fn join(self) -> std::thread::Result<()> {
        self.thread.join()
    }
}

impl PubSubHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hub whose subscribers buffer at most `capacity` messages each.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            topics: Arc::default(),
            capacity: capacity.max(1),
        }
    }

    /// Number of registered subscribers on `topic`. Dead ones are pruned on
    /// the next publish.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.lock().get(topic).map_or(0, Vec::len)
    }

    /// Subscribe with a raw byte handler.
    pub fn subscribe<H>(&self, topic: &str, mut handler: H) -> Result<Subscription>
    where
        H: FnMut(&[u8]) + Send + 'static,
    {
        let (rx, alive) = self.register(topic);
        let thread = std::thread::Builder::new()
            .name(format!("sub-{topic}"))
            .spawn(move || {
                let _alive = alive;
                for payload in rx.iter() {
                    handler(&payload);
                }
            })?;
        Ok(Subscription {
            topic: topic.to_string(),
            thread,
        })
    }

    /// Subscribe with a deserialize hook applied before the handler.
    ///
    /// Payloads the hook rejects are logged and skipped.
    pub fn subscribe_with<T, D, H>(&self, topic: &str, decode: D, mut handler: H) -> Result<Subscription>
    where
        D: Fn(&[u8]) -> Result<T> + Send + 'static,
        H: FnMut(T) + Send + 'static,
    {
        let name = topic.to_string();
        self.subscribe(topic, move |payload| match decode(payload) {
            Ok(message) => handler(message),
            Err(e) => log::warn!("Skipping undecodable message on '{}': {}", name, e),
        })
    }

    fn register(&self, topic: &str) -> (Receiver<Payload>, Arc<()>) {
        let (tx, rx) = crossbeam_channel::bounded(self.capacity);
        let alive = Arc::new(());
        self.topics
            .lock()
            .entry(topic.to_string())
            .or_default()
            .push(Subscriber {
                tx,
                rx: rx.clone(),
                alive: Arc::downgrade(&alive),
            });
        (rx, alive)
    }
}

impl Publish for PubSubHub {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        let payload = Arc::new(payload);
        let mut topics = self.topics.lock();
        if let Some(subscribers) = topics.get_mut(topic) {
            let before = subscribers.len();
            subscribers.retain(|s| s.alive.strong_count() > 0);
            if subscribers.len() < before {
                log::debug!(
                    "Pruned {} dead subscriber(s) on '{}'",
                    before - subscribers.len(),
                    topic
                );
            }
            for subscriber in subscribers.iter() {
                let evicted = subscriber.deliver(&payload);
                if evicted > 0 {
                    log::debug!(
                        "Subscriber on '{}' is lagging; dropped {} stale message(s)",
                        topic,
                        evicted
                    );
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_publish_reaches_every_subscriber() {
        let hub = PubSubHub::new();
        let (tx_a, rx_a) = crossbeam_channel::unbounded();
        let (tx_b, rx_b) = crossbeam_channel::unbounded();
        let _a = hub
            .subscribe("ps", move |p| tx_a.send(p.to_vec()).unwrap())
            .unwrap();
        let _b = hub
            .subscribe("ps", move |p| tx_b.send(p.to_vec()).unwrap())
            .unwrap();
        assert_eq!(hub.subscriber_count("ps"), 2);

        hub.publish("ps", b"hello".to_vec()).unwrap();
        let timeout = Duration::from_secs(1);
        assert_eq!(rx_a.recv_timeout(timeout).unwrap(), b"hello");
        assert_eq!(rx_b.recv_timeout(timeout).unwrap(), b"hello");
    }

    #[test]
    fn test_late_subscriber_misses_earlier_messages() {
        let hub = PubSubHub::new();
        hub.publish("ps", b"early".to_vec()).unwrap();

        let (tx, rx) = crossbeam_channel::unbounded();
        let _sub = hub
            .subscribe("ps", move |p| tx.send(p.to_vec()).unwrap())
            .unwrap();
        hub.publish("ps", b"late".to_vec()).unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), b"late");
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_topics_are_isolated() {
        let hub = PubSubHub::new();
        let (tx, rx) = crossbeam_channel::unbounded();
        let _sub = hub
            .subscribe("a", move |p| tx.send(p.to_vec()).unwrap())
            .unwrap();
        hub.publish("b", b"other".to_vec()).unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_subscribe_with_skips_bad_payloads() {
        let hub = PubSubHub::new();
        let (tx, rx) = crossbeam_channel::unbounded();
        let _sub = hub
            .subscribe_with(
                "n",
                |bytes| crate::codec::deserialize::<u64>(bytes),
                move |n| tx.send(n).unwrap(),
            )
            .unwrap();

        hub.publish("n", vec![1, 2]).unwrap();
        hub.publish("n", crate::codec::serialize(&42u64).unwrap()).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), 42);
    }

    #[test]
    fn test_lagging_subscriber_keeps_latest_messages() {
        let hub = PubSubHub::with_capacity(2);
        let (entered_tx, entered_rx) = crossbeam_channel::unbounded();
        let (gate_tx, gate_rx) = crossbeam_channel::unbounded::<()>();
        let (seen_tx, seen_rx) = crossbeam_channel::unbounded();
        let _sub = hub
            .subscribe("ps", move |p| {
                if p == b"0" {
                    entered_tx.send(()).unwrap();
                    gate_rx.recv().unwrap();
                }
                seen_tx.send(p.to_vec()).unwrap();
            })
            .unwrap();

        let timeout = Duration::from_secs(1);
        hub.publish("ps", b"0".to_vec()).unwrap();
        entered_rx.recv_timeout(timeout).unwrap();
        // Handler is stuck on "0"; only the last two of these stay buffered.
        for i in 1..=9u8 {
            hub.publish("ps", vec![b'0' + i]).unwrap();
        }
        gate_tx.send(()).unwrap();

        let seen: Vec<Vec<u8>> = (0..3).map(|_| seen_rx.recv_timeout(timeout).unwrap()).collect();
        assert_eq!(seen, vec![b"0".to_vec(), b"8".to_vec(), b"9".to_vec()]);
        assert!(seen_rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_dead_subscriber_pruned_on_publish() {
        let hub = PubSubHub::new();
        let sub = hub
            .subscribe("ps", |_| panic!("subscriber crashed"))
            .unwrap();
        hub.publish("ps", b"a".to_vec()).unwrap();
        assert!(sub.join().is_err());
        assert_eq!(hub.subscriber_count("ps"), 1);

        hub.publish("ps", b"b".to_vec()).unwrap();
        assert_eq!(hub.subscriber_count("ps"), 0);
    }

    #[test]
    fn test_subscription_exits_when_hub_dropped() {
        let hub = PubSubHub::new();
        let sub = hub.subscribe("ps", |_| {}).unwrap();
        assert_eq!(sub.topic(), "ps");
        drop(hub);
        sub.join().unwrap();
    }
}
