//! Broker publisher
//!
//! `Publisher` is the seam between the relay and the broker on the producing
//! side. It is constructed once at startup, shared by every caller, and
//! closed explicitly on shutdown.
//!
//! `KafkaPublisher` wraps rdkafka's `FutureProducer`. A publish returns only
//! after the broker acknowledged the record (`acks=all`), so success means the
//! record is durably queued. It never means the record was consumed.

use async_trait::async_trait;
use bytes::Bytes;
use rdkafka::config::ClientConfig;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::constants::{
    DEFAULT_BOOTSTRAP_SERVERS, DEFAULT_CLIENT_ID, DEFAULT_MESSAGE_TIMEOUT_MS,
    HEALTH_CHECK_TIMEOUT_MS,
};
use super::error::{RelayError, Result};

/// One record to append to a topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRecord {
    pub topic: String,
    pub key: Option<Bytes>,
    pub payload: Bytes,
    pub headers: Vec<(String, String)>,
}

impl OutboundRecord {
    pub fn new(topic: impl Into<String>, payload: Bytes) -> Self {
        Self {
            topic: topic.into(),
            key: None,
            payload,
            headers: Vec::new(),
        }
    }

    pub fn with_key(mut self, key: impl Into<Bytes>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Where the broker stored an acknowledged record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// Producing side of the broker
///
/// Implementations must be safe for concurrent use and must not retry
/// internally; retry policy belongs to the caller.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Append one record and wait for the broker acknowledgement
    async fn publish(&self, record: OutboundRecord) -> Result<PublishReceipt>;

    /// Flush buffered sends and refuse further publishes
    async fn close(&self, timeout: Duration) -> Result<()>;
}

/// Settings for [`KafkaPublisher`]
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub bootstrap_servers: String,
    pub client_id: String,
    /// librdkafka `message.timeout.ms`: bound on delivery including retries
    pub message_timeout_ms: u64,
    /// Hash the message key so one row's mutations share a partition
    pub order_by_entity: bool,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: DEFAULT_BOOTSTRAP_SERVERS.to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            message_timeout_ms: DEFAULT_MESSAGE_TIMEOUT_MS,
            order_by_entity: false,
        }
    }
}

/// rdkafka-backed publisher
pub struct KafkaPublisher {
    producer: FutureProducer,
    config: Arc<PublisherConfig>,
    closed: AtomicBool,
}

impl KafkaPublisher {
    /// Create a publisher; the broker connection is established lazily
    pub fn new(config: Arc<PublisherConfig>) -> Result<Self> {
        if config.bootstrap_servers.trim().is_empty() {
            return Err(RelayError::InvalidConfig(
                "bootstrap.servers is empty".to_string(),
            ));
        }

        let producer = Self::create_producer(&config)?;

        Ok(Self {
            producer,
            config,
            closed: AtomicBool::new(false),
        })
    }

    fn create_producer(config: &PublisherConfig) -> Result<FutureProducer> {
        let mut client_config = ClientConfig::new();

        client_config.set("bootstrap.servers", &config.bootstrap_servers);
        client_config.set("client.id", &config.client_id);

        // Durable acknowledgement from all in-sync replicas, no duplicates
        // from producer-internal retries.
        client_config.set("acks", "all");
        client_config.set("enable.idempotence", "true");
        client_config.set("message.timeout.ms", config.message_timeout_ms.to_string());

        if config.order_by_entity {
            client_config.set("partitioner", "murmur2_random");
        }

        client_config
            .create()
            .map_err(|e| RelayError::InvalidConfig(format!("Failed to create producer: {}", e)))
    }

    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Check broker connectivity by fetching cluster metadata
    pub fn health_check(&self) -> Result<()> {
        let metadata = self
            .producer
            .client()
            .fetch_metadata(None, Duration::from_millis(HEALTH_CHECK_TIMEOUT_MS))
            .map_err(|e| RelayError::transport("<metadata>", e))?;

        if metadata.brokers().is_empty() {
            return Err(RelayError::transport("<metadata>", "no brokers available"));
        }
        Ok(())
    }
}

#[async_trait]
impl Publisher for KafkaPublisher {
    async fn publish(&self, record: OutboundRecord) -> Result<PublishReceipt> {
        if self.is_closed() {
            return Err(RelayError::transport(&record.topic, "publisher is closed"));
        }

        let mut kafka_record: FutureRecord<'_, [u8], [u8]> =
            FutureRecord::to(&record.topic).payload(record.payload.as_ref());

        if let Some(key) = record.key.as_deref() {
            kafka_record = kafka_record.key(key);
        }

        if !record.headers.is_empty() {
            let headers = record
                .headers
                .iter()
                .fold(OwnedHeaders::new(), |headers, (name, value)| {
                    headers.insert(Header {
                        key: name.as_str(),
                        value: Some(value.as_bytes()),
                    })
                });
            kafka_record = kafka_record.headers(headers);
        }

        let queue_timeout = Timeout::After(Duration::from_millis(self.config.message_timeout_ms));

        let (partition, offset) = self
            .producer
            .send(kafka_record, queue_timeout)
            .await
            .map_err(|(err, _)| RelayError::transport(&record.topic, err))?;

        tracing::debug!(topic = %record.topic, partition, offset, "Record acknowledged");

        Ok(PublishReceipt {
            topic: record.topic,
            partition,
            offset,
        })
    }

    async fn close(&self, timeout: Duration) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        tracing::info!(timeout_ms = timeout.as_millis() as u64, "Flushing publisher");
        // flush blocks the calling thread until delivery or timeout
        let producer = self.producer.clone();
        tokio::task::spawn_blocking(move || producer.flush(Timeout::After(timeout)))
            .await
            .map_err(|e| RelayError::transport("<flush>", format!("Flush task failed: {}", e)))?
            .map_err(|e| RelayError::transport("<flush>", format!("Flush failed: {}", e)))
    }
}

impl std::fmt::Debug for KafkaPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaPublisher")
            .field("bootstrap_servers", &self.config.bootstrap_servers)
            .field("client_id", &self.config.client_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Builder for creating KafkaPublisher with custom settings
pub struct KafkaPublisherBuilder {
    config: PublisherConfig,
}

impl KafkaPublisherBuilder {
    pub fn new(bootstrap_servers: &str) -> Self {
        Self {
            config: PublisherConfig {
                bootstrap_servers: bootstrap_servers.to_string(),
                ..Default::default()
            },
        }
    }

    pub fn client_id(mut self, client_id: &str) -> Self {
        self.config.client_id = client_id.to_string();
        self
    }

    pub fn message_timeout_ms(mut self, ms: u64) -> Self {
        self.config.message_timeout_ms = ms;
        self
    }

    pub fn order_by_entity(mut self, enabled: bool) -> Self {
        self.config.order_by_entity = enabled;
        self
    }

    pub fn build(self) -> Result<KafkaPublisher> {
        KafkaPublisher::new(Arc::new(self.config))
    }
}
