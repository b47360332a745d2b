//! Mock implementations of the relay's seams
//!
//! `MockStore` stands in for a database in handler and runtime tests.

use async_trait::async_trait;
use mockall::mock;

use crate::config::{Config, PostgresConfig, StorageBackend};
use crate::relay::command::{EntityKind, FieldMap};
use crate::relay::consumer::FailurePolicy;
use crate::relay::constants::{
    DEFAULT_HANDLER_MAX_RETRIES, DEFAULT_MESSAGE_TIMEOUT_MS, DEFAULT_PUBLISH_TIMEOUT_MS,
    DEFAULT_SESSION_TIMEOUT_MS, DEFAULT_SHUTDOWN_TIMEOUT_MS, DEFAULT_STREAM_ERROR_LIMIT,
};
use crate::relay::error::Result;
use crate::relay::storage::{Row, Store, StoreAck};

mock! {
    pub Store {}

    #[async_trait]
    impl Store for Store {
        async fn create(&self, entity: EntityKind, fields: FieldMap) -> Result<i64>;
        async fn get(&self, entity: EntityKind, id: i64) -> Result<Option<Row>>;
        async fn list(&self, entity: EntityKind) -> Result<Vec<Row>>;
        async fn update(&self, entity: EntityKind, id: i64, fields: &FieldMap) -> Result<StoreAck>;
        async fn delete(&self, entity: EntityKind, id: i64) -> Result<StoreAck>;
    }
}

/// Returns a Config with test values: in-memory storage, fast retries
///
/// Avoids reading the process environment.
pub fn mock_config() -> Config {
    Config {
        bootstrap_servers: "localhost:9092".to_string(),
        client_id: "post-relay-test".to_string(),
        publish_timeout_ms: DEFAULT_PUBLISH_TIMEOUT_MS,
        message_timeout_ms: DEFAULT_MESSAGE_TIMEOUT_MS,
        session_timeout_ms: DEFAULT_SESSION_TIMEOUT_MS,
        order_by_entity: false,
        handler_max_retries: DEFAULT_HANDLER_MAX_RETRIES,
        retry_backoff_ms: 1,
        failure_policy: FailurePolicy::DeadLetter,
        stream_error_limit: DEFAULT_STREAM_ERROR_LIMIT,
        shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
        storage: StorageBackend::Memory,
        postgres: PostgresConfig::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_config_defaults() {
        let config = mock_config();
        assert_eq!(config.storage, StorageBackend::Memory);
        assert_eq!(config.failure_policy, FailurePolicy::DeadLetter);
        assert_eq!(config.shutdown_timeout_ms, DEFAULT_SHUTDOWN_TIMEOUT_MS);
        assert_eq!(config.retry_backoff_ms, 1);
    }
}
