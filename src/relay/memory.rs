//! In-process broker
//!
//! `MemoryBroker` implements both sides of the broker seam so the relay can be
//! run and tested without Kafka. Each topic is a single-partition append-only
//! log; each (topic, group) pair has a committed offset, and a new stream for
//! a group resumes from it, which reproduces broker redelivery after a crash.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use super::error::{RelayError, Result};
use super::publisher::{OutboundRecord, PublishReceipt, Publisher};
use super::source::{InboundMessage, MessageSource, MessageStream};

/// The only partition of every in-memory topic
pub const MEMORY_PARTITION: i32 = 0;

#[derive(Default)]
struct BrokerState {
    logs: HashMap<String, Vec<OutboundRecord>>,
    committed: HashMap<(String, String), i64>,
    reject_publishes: bool,
    reject_subscribes: bool,
    closed: bool,
}

struct BrokerInner {
    state: Mutex<BrokerState>,
    appended: Notify,
}

/// Shared in-memory broker; clones refer to the same logs
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<BrokerInner>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                state: Mutex::new(BrokerState::default()),
                appended: Notify::new(),
            }),
        }
    }

    /// Make every subsequent publish fail with a transport error
    pub fn reject_publishes(&self, reject: bool) {
        self.inner.state.lock().reject_publishes = reject;
    }

    /// Make every subsequent subscribe fail with a subscribe error
    pub fn reject_subscribes(&self, reject: bool) {
        self.inner.state.lock().reject_subscribes = reject;
    }

    /// Every record appended to `topic`, in offset order
    pub fn records(&self, topic: &str) -> Vec<OutboundRecord> {
        self.inner
            .state
            .lock()
            .logs
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    /// Next offset `group` will read on `topic`, if it ever committed
    pub fn committed(&self, topic: &str, group: &str) -> Option<i64> {
        self.inner
            .state
            .lock()
            .committed
            .get(&(topic.to_string(), group.to_string()))
            .copied()
    }

    /// Append a raw payload, bypassing the codec (for malformed-input tests)
    pub fn append_raw(&self, topic: &str, payload: impl Into<bytes::Bytes>) -> i64 {
        self.append(OutboundRecord::new(topic, payload.into()))
    }

    fn append(&self, record: OutboundRecord) -> i64 {
        let offset = {
            let mut state = self.inner.state.lock();
            let log = state.logs.entry(record.topic.clone()).or_default();
            log.push(record);
            (log.len() - 1) as i64
        };
        self.inner.appended.notify_waiters();
        offset
    }
}

impl std::fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("MemoryBroker")
            .field("topics", &state.logs.len())
            .field("groups", &state.committed.len())
            .field("closed", &state.closed)
            .finish()
    }
}

#[async_trait]
impl Publisher for MemoryBroker {
    async fn publish(&self, record: OutboundRecord) -> Result<PublishReceipt> {
        {
            let state = self.inner.state.lock();
            if state.closed {
                return Err(RelayError::transport(&record.topic, "publisher is closed"));
            }
            if state.reject_publishes {
                return Err(RelayError::transport(&record.topic, "broker rejected record"));
            }
        }

        let topic = record.topic.clone();
        let offset = self.append(record);
        Ok(PublishReceipt {
            topic,
            partition: MEMORY_PARTITION,
            offset,
        })
    }

    async fn close(&self, _timeout: Duration) -> Result<()> {
        self.inner.state.lock().closed = true;
        Ok(())
    }
}

impl MessageSource for MemoryBroker {
    fn subscribe(&self, topic: &str, group: &str) -> Result<Box<dyn MessageStream>> {
        let position = {
            let state = self.inner.state.lock();
            if state.reject_subscribes {
                return Err(RelayError::Subscribe {
                    topic: topic.to_string(),
                    group: group.to_string(),
                    message: "broker unavailable".to_string(),
                });
            }
            state
                .committed
                .get(&(topic.to_string(), group.to_string()))
                .copied()
                .unwrap_or(0)
        };

        Ok(Box::new(MemoryStream {
            inner: Arc::clone(&self.inner),
            topic: topic.to_string(),
            group: group.to_string(),
            position,
        }))
    }
}

/// One group's cursor over an in-memory topic
pub struct MemoryStream {
    inner: Arc<BrokerInner>,
    topic: String,
    group: String,
    position: i64,
}

impl MemoryStream {
    fn poll_record(&mut self) -> Option<InboundMessage> {
        let state = self.inner.state.lock();
        let record = state.logs.get(&self.topic)?.get(self.position as usize)?;
        let message = InboundMessage {
            topic: self.topic.clone(),
            partition: MEMORY_PARTITION,
            offset: self.position,
            key: record.key.clone(),
            payload: record.payload.clone(),
        };
        drop(state);
        self.position += 1;
        Some(message)
    }
}

#[async_trait]
impl MessageStream for MemoryStream {
    async fn next(&mut self) -> Result<InboundMessage> {
        let inner = Arc::clone(&self.inner);
        loop {
            // Register for wakeups before checking the log so an append
            // between the check and the await is not missed.
            let appended = inner.appended.notified();
            tokio::pin!(appended);
            appended.as_mut().enable();

            if let Some(message) = self.poll_record() {
                return Ok(message);
            }
            appended.await;
        }
    }

    async fn commit(&mut self, message: &InboundMessage) -> Result<()> {
        self.inner.state.lock().committed.insert(
            (self.topic.clone(), self.group.clone()),
            message.offset + 1,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn record(topic: &str, payload: &'static [u8]) -> OutboundRecord {
        OutboundRecord::new(topic, Bytes::from_static(payload))
    }

    #[tokio::test]
    async fn test_publish_assigns_sequential_offsets() {
        let broker = MemoryBroker::new();
        let first = broker.publish(record("post-update", b"a")).await.unwrap();
        let second = broker.publish(record("post-update", b"b")).await.unwrap();
        let other = broker.publish(record("log-delete", b"c")).await.unwrap();

        assert_eq!((first.partition, first.offset), (0, 0));
        assert_eq!(second.offset, 1);
        assert_eq!(other.offset, 0);
        assert_eq!(broker.records("post-update").len(), 2);
    }

    #[tokio::test]
    async fn test_reject_publishes() {
        let broker = MemoryBroker::new();
        broker.reject_publishes(true);
        let result = broker.publish(record("post-update", b"a")).await;
        assert!(matches!(result, Err(RelayError::Transport { .. })));
        assert!(broker.records("post-update").is_empty());
    }

    #[tokio::test]
    async fn test_stream_waits_for_publish() {
        let broker = MemoryBroker::new();
        let mut stream = broker.subscribe("log-delete", "log-d").unwrap();

        let publisher = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.publish(record("log-delete", b"late")).await.unwrap();
        });

        let message = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("stream should wake on publish")
            .unwrap();
        assert_eq!(message.payload, Bytes::from_static(b"late"));
        assert_eq!(message.offset, 0);
    }

    #[tokio::test]
    async fn test_new_stream_resumes_from_commit() {
        let broker = MemoryBroker::new();
        for payload in [&b"a"[..], b"b", b"c"] {
            broker
                .publish(OutboundRecord::new("post-delete", Bytes::from_static(payload)))
                .await
                .unwrap();
        }

        let mut stream = broker.subscribe("post-delete", "post-d").unwrap();
        let first = stream.next().await.unwrap();
        stream.commit(&first).await.unwrap();
        let _uncommitted = stream.next().await.unwrap();
        drop(stream);

        assert_eq!(broker.committed("post-delete", "post-d"), Some(1));

        let mut resumed = broker.subscribe("post-delete", "post-d").unwrap();
        let redelivered = resumed.next().await.unwrap();
        assert_eq!(redelivered.offset, 1);
        assert_eq!(redelivered.payload, Bytes::from_static(b"b"));
    }

    #[tokio::test]
    async fn test_groups_progress_independently() {
        let broker = MemoryBroker::new();
        broker.publish(record("post-update", b"a")).await.unwrap();

        let mut g1 = broker.subscribe("post-update", "post-u").unwrap();
        let m = g1.next().await.unwrap();
        g1.commit(&m).await.unwrap();

        let mut g2 = broker.subscribe("post-update", "audit").unwrap();
        assert_eq!(g2.next().await.unwrap().offset, 0);
        assert_eq!(broker.committed("post-update", "audit"), None);
    }
}
