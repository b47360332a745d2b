//! Consumer-side broker seam
//!
//! A `MessageSource` hands out one `MessageStream` per (topic, group)
//! subscription. Streams deliver messages in partition order and track
//! progress only through explicit commits, which is what gives the consumer
//! runtime its at-least-once contract.

use async_trait::async_trait;
use bytes::Bytes;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::{Message, Offset, TopicPartitionList};

use super::constants::{DEFAULT_BOOTSTRAP_SERVERS, DEFAULT_CLIENT_ID, DEFAULT_SESSION_TIMEOUT_MS};
use super::error::{RelayError, Result};

/// A message as delivered to the consumer runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Bytes>,
    pub payload: Bytes,
}

/// Ordered stream of messages for one subscription
#[async_trait]
pub trait MessageStream: Send + Sync {
    /// Wait for the next message
    async fn next(&mut self) -> Result<InboundMessage>;

    /// Record that `message` (and everything before it on its partition) is done
    async fn commit(&mut self, message: &InboundMessage) -> Result<()>;
}

/// Factory for subscriptions
pub trait MessageSource: Send + Sync {
    /// Join `group` on `topic`
    ///
    /// Connection-level failures surface here as `RelayError::Subscribe`.
    fn subscribe(&self, topic: &str, group: &str) -> Result<Box<dyn MessageStream>>;
}

/// Settings for [`KafkaSource`]
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub bootstrap_servers: String,
    pub client_id: String,
    pub session_timeout_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: DEFAULT_BOOTSTRAP_SERVERS.to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            session_timeout_ms: DEFAULT_SESSION_TIMEOUT_MS,
        }
    }
}

/// rdkafka-backed message source
#[derive(Debug, Clone)]
pub struct KafkaSource {
    config: SourceConfig,
}

impl KafkaSource {
    pub fn new(config: SourceConfig) -> Self {
        Self { config }
    }

    fn consumer_config(&self, group: &str) -> ClientConfig {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &self.config.bootstrap_servers)
            .set("client.id", &self.config.client_id)
            .set("group.id", group)
            .set("session.timeout.ms", self.config.session_timeout_ms.to_string())
            // Progress is committed by the runtime after the handler finished
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", "earliest");
        client_config
    }
}

impl MessageSource for KafkaSource {
    fn subscribe(&self, topic: &str, group: &str) -> Result<Box<dyn MessageStream>> {
        let subscribe_error = |message: String| RelayError::Subscribe {
            topic: topic.to_string(),
            group: group.to_string(),
            message,
        };

        let consumer: StreamConsumer = self
            .consumer_config(group)
            .create()
            .map_err(|e| subscribe_error(format!("Failed to create consumer: {}", e)))?;

        consumer
            .subscribe(&[topic])
            .map_err(|e| subscribe_error(format!("Failed to subscribe: {}", e)))?;

        tracing::info!(topic, group, "Subscribed to topic");

        Ok(Box::new(KafkaStream {
            consumer,
            topic: topic.to_string(),
        }))
    }
}

/// One subscribed consumer
pub struct KafkaStream {
    consumer: StreamConsumer,
    topic: String,
}

#[async_trait]
impl MessageStream for KafkaStream {
    async fn next(&mut self) -> Result<InboundMessage> {
        let message = self
            .consumer
            .recv()
            .await
            .map_err(|e| RelayError::transport(&self.topic, e))?;

        Ok(InboundMessage {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            key: message.key().map(Bytes::copy_from_slice),
            payload: message
                .payload()
                .map(Bytes::copy_from_slice)
                .unwrap_or_default(),
        })
    }

    async fn commit(&mut self, message: &InboundMessage) -> Result<()> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(
            &message.topic,
            message.partition,
            Offset::Offset(message.offset + 1),
        )
        .map_err(|e| RelayError::transport(&message.topic, e))?;

        self.consumer
            .commit(&tpl, CommitMode::Async)
            .map_err(|e| RelayError::transport(&message.topic, format!("Commit failed: {}", e)))
    }
}

impl std::fmt::Debug for KafkaStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaStream")
            .field("topic", &self.topic)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consumer_config_disables_auto_commit() {
        let source = KafkaSource::new(SourceConfig::default());
        let config = source.consumer_config("post-u");
        assert_eq!(config.get("group.id"), Some("post-u"));
        assert_eq!(config.get("enable.auto.commit"), Some("false"));
        assert_eq!(config.get("auto.offset.reset"), Some("earliest"));
    }

    #[test]
    fn test_source_config_default() {
        let config = SourceConfig::default();
        assert_eq!(config.bootstrap_servers, DEFAULT_BOOTSTRAP_SERVERS);
        assert_eq!(config.session_timeout_ms, DEFAULT_SESSION_TIMEOUT_MS);
    }
}
