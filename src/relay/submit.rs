//! Publish-side API
//!
//! Request handlers call [`Relay::submit`] instead of calling the backend.
//! `Accepted` means the broker durably queued the command. It says nothing
//! about whether or when the backend applies it, and no status flows back.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::codec;
use super::command::{EntityKind, MutationCommand, Operation, Route};
use super::constants::DEFAULT_PUBLISH_TIMEOUT_MS;
use super::error::{RelayError, Result};
use super::publisher::{OutboundRecord, PublishReceipt, Publisher};

/// The command was durably queued on its topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    pub route: Route,
    pub target_id: i64,
    pub receipt: PublishReceipt,
}

/// Gateway-side handle: validates, encodes and publishes commands
#[derive(Clone)]
pub struct Relay {
    publisher: Arc<dyn Publisher>,
    publish_timeout: Duration,
    order_by_entity: bool,
}

impl Relay {
    pub fn new(publisher: Arc<dyn Publisher>) -> Self {
        Self {
            publisher,
            publish_timeout: Duration::from_millis(DEFAULT_PUBLISH_TIMEOUT_MS),
            order_by_entity: false,
        }
    }

    /// Caller-side bound on a single publish
    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    /// Key records by target id so one row's mutations share a partition
    pub fn with_order_by_entity(mut self, enabled: bool) -> Self {
        self.order_by_entity = enabled;
        self
    }

    /// Validate, encode and publish `command` on the topic for (entity, operation)
    ///
    /// Errors are `RejectedInvalid` (4xx: route mismatch, empty update,
    /// unencodable command) or `Transport`/`PublishTimeout` (5xx). Nothing is
    /// retried here.
    pub async fn submit(
        &self,
        entity: EntityKind,
        operation: Operation,
        command: &MutationCommand,
    ) -> Result<Accepted> {
        let route = Route::new(entity, operation);
        if command.route() != route {
            return Err(RelayError::RejectedInvalid(format!(
                "command is a {} but was submitted as {}",
                command.route(),
                route
            )));
        }
        if operation == Operation::Update && command.fields.is_empty() {
            return Err(RelayError::RejectedInvalid(format!(
                "{} {} has no fields to update",
                entity, command.target_id
            )));
        }

        let payload = codec::encode(command).map_err(|e| match e {
            RelayError::UnsupportedCommand(reason) => RelayError::RejectedInvalid(reason),
            other => other,
        })?;

        let topic = route.topic();
        let mut record = OutboundRecord::new(topic, payload);
        if self.order_by_entity {
            record = record.with_key(command.target_id.to_string());
        }

        let receipt = match tokio::time::timeout(self.publish_timeout, self.publisher.publish(record)).await {
            Ok(Ok(receipt)) => receipt,
            Ok(Err(e)) => {
                warn!(topic, id = command.target_id, "Publish failed: {}", e);
                return Err(e);
            }
            Err(_) => {
                warn!(topic, id = command.target_id, "Publish timed out");
                return Err(RelayError::PublishTimeout {
                    topic: topic.to_string(),
                    timeout_ms: self.publish_timeout.as_millis() as u64,
                });
            }
        };

        debug!(
            topic,
            id = command.target_id,
            partition = receipt.partition,
            offset = receipt.offset,
            "Command accepted"
        );
        Ok(Accepted {
            route,
            target_id: command.target_id,
            receipt,
        })
    }

    /// Flush and close the underlying publisher
    pub async fn close(&self, timeout: Duration) -> Result<()> {
        self.publisher.close(timeout).await
    }
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("publish_timeout", &self.publish_timeout)
            .field("order_by_entity", &self.order_by_entity)
            .finish()
    }
}
