//! SSE broadcast hub
//!
//! Topic string to subscriber list. Registration enforces the per-topic
//! and per-IP caps; broadcasting serializes the event once, pushes it on
//! every open subscriber queue, and removes any subscriber whose queue is
//! gone or full. One slow or dead client never affects the topic.

use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::config::SseConfig;

use super::event::SseEvent;

/// Depth of each subscriber's event queue.
const QUEUE_DEPTH: usize = 64;

/// Why a subscribe attempt was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterError {
    TopicFull,
    IpLimit,
}

/// One subscriber connection.
#[derive(Debug)]
pub struct SseConnection {
    pub id: u64,
    pub ip: IpAddr,
    open: AtomicBool,
    tx: mpsc::Sender<Bytes>,
}

impl SseConnection {
    /// Queues pre-serialized bytes. Marks the connection closed when the
    /// queue is full or the drain side is gone.
    pub fn send(&self, bytes: Bytes) -> bool {
        if !self.is_open() {
            return false;
        }
        match self.tx.try_send(bytes) {
            Ok(()) => true,
            Err(_) => {
                self.close();
                false
            }
        }
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

/// Topic registry shared by all engines.
#[derive(Debug)]
pub struct SseHub {
    topics: DashMap<String, Vec<Arc<SseConnection>>>,
    config: SseConfig,
    next_id: AtomicU64,
}

impl SseHub {
    #[must_use]
    pub fn new(config: SseConfig) -> Self {
        Self { topics: DashMap::new(), config, next_id: AtomicU64::new(1) }
    }

    /// Subscribes a client to a topic, returning the connection handle and
    /// the queue the engine drains.
    pub fn register(
        &self,
        topic: &str,
        ip: IpAddr,
    ) -> Result<(Arc<SseConnection>, mpsc::Receiver<Bytes>), RegisterError> {
        let mut subscribers = self.topics.entry(topic.to_string()).or_default();
        subscribers.retain(|conn| conn.is_open());

        if subscribers.len() >= self.config.max_connections_per_topic {
            return Err(RegisterError::TopicFull);
        }
        let from_ip = subscribers.iter().filter(|conn| conn.ip == ip).count();
        if from_ip >= self.config.max_connections_per_ip {
            return Err(RegisterError::IpLimit);
        }

        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let conn = Arc::new(SseConnection {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            ip,
            open: AtomicBool::new(true),
            tx,
        });
        subscribers.push(Arc::clone(&conn));
        Ok((conn, rx))
    }

    /// Removes one subscriber from a topic.
    pub fn unregister(&self, topic: &str, id: u64) {
        if let Some(mut subscribers) = self.topics.get_mut(topic) {
            subscribers.retain(|conn| conn.id != id);
        }
    }

    /// Sends an event to every open subscriber of the topic, returning how
    /// many queues accepted it. Closed subscribers are dropped from the
    /// list as a side effect.
    pub fn broadcast(&self, topic: &str, event: &SseEvent) -> usize {
        let Some(mut subscribers) = self.topics.get_mut(topic) else {
            return 0;
        };
        let bytes = Bytes::from(event.serialize());
        let mut delivered = 0;
        subscribers.retain(|conn| {
            if conn.send(bytes.clone()) {
                delivered += 1;
                true
            } else {
                false
            }
        });
        delivered
    }

    /// Open subscribers on a topic.
    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map(|subs| subs.iter().filter(|c| c.is_open()).count())
            .unwrap_or(0)
    }

    #[must_use]
    pub fn keepalive_interval(&self) -> std::time::Duration {
        self.config.keepalive_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn hub(per_topic: usize, per_ip: usize) -> SseHub {
        SseHub::new(SseConfig {
            max_connections_per_topic: per_topic,
            max_connections_per_ip: per_ip,
            keepalive_interval: Duration::from_secs(15),
        })
    }

    #[tokio::test]
    async fn broadcast_reaches_all_subscribers() {
        let hub = hub(10, 10);
        let ip: IpAddr = "10.1.1.1".parse().unwrap();
        let (_a, mut rx_a) = hub.register("news", ip).unwrap();
        let (_b, mut rx_b) = hub.register("news", ip).unwrap();

        let delivered = hub.broadcast("news", &SseEvent::new("hi"));
        assert_eq!(delivered, 2);
        assert_eq!(rx_a.recv().await.unwrap(), Bytes::from("data: hi\n\n"));
        assert_eq!(rx_b.recv().await.unwrap(), Bytes::from("data: hi\n\n"));
    }

    #[tokio::test]
    async fn per_topic_cap_enforced() {
        let hub = hub(2, 10);
        let ip: IpAddr = "10.1.1.2".parse().unwrap();
        let _a = hub.register("t", ip).unwrap();
        let _b = hub.register("t", ip).unwrap();
        assert_eq!(hub.register("t", ip).unwrap_err(), RegisterError::TopicFull);
    }

    #[tokio::test]
    async fn per_ip_cap_enforced() {
        let hub = hub(10, 1);
        let ip_a: IpAddr = "10.1.1.3".parse().unwrap();
        let ip_b: IpAddr = "10.1.1.4".parse().unwrap();
        let _a = hub.register("t", ip_a).unwrap();
        assert_eq!(hub.register("t", ip_a).unwrap_err(), RegisterError::IpLimit);
        assert!(hub.register("t", ip_b).is_ok());
    }

    #[tokio::test]
    async fn closed_subscriber_is_dropped_not_topic() {
        let hub = hub(10, 10);
        let ip: IpAddr = "10.1.1.5".parse().unwrap();
        let (conn_a, _rx_a) = hub.register("t", ip).unwrap();
        let (_b, mut rx_b) = hub.register("t", ip).unwrap();

        conn_a.close();
        let delivered = hub.broadcast("t", &SseEvent::new("x"));
        assert_eq!(delivered, 1);
        assert_eq!(hub.subscriber_count("t"), 1);
        assert!(rx_b.recv().await.is_some());
    }

    #[tokio::test]
    async fn full_queue_closes_only_that_subscriber() {
        let hub = hub(10, 10);
        let ip: IpAddr = "10.1.1.6".parse().unwrap();
        // Keep rx alive but never drain it.
        let (_conn, _rx) = hub.register("t", ip).unwrap();
        let (_other, mut rx_other) = hub.register("t", ip).unwrap();

        for i in 0..QUEUE_DEPTH + 5 {
            hub.broadcast("t", &SseEvent::new(format!("event {i}")));
            // The draining subscriber keeps accepting.
            assert!(rx_other.try_recv().is_ok());
        }
        assert_eq!(hub.subscriber_count("t"), 1);
    }
}
