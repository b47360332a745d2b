//! Common utilities shared across E2E test modules
//!
//! Builds relay components from the same environment variables the
//! deployed services read.

use std::sync::Arc;
use std::time::Duration;

use post_relay::config::Config;
use post_relay::relay::{
    FailurePolicy, KafkaPublisher, KafkaSource, PostgresStore, Publisher, Relay, RuntimeSettings,
    SubscriptionRegistry,
};

/// Test result type alias for cleaner function signatures
pub type TestResult = Result<(), Box<dyn std::error::Error>>;

/// How long a test waits for a command to be applied
pub const APPLY_TIMEOUT: Duration = Duration::from_secs(30);

/// Interval between database polls while waiting
pub const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Configuration from the environment, with a client id unique to this run
pub fn load_config(test_id: &str) -> Result<Config, Box<dyn std::error::Error>> {
    let mut config = Config::from_env()?;
    config.client_id = format!("relay-e2e-{}", test_id);
    config.retry_backoff_ms = 10;
    Ok(config)
}

/// Connect to PostgreSQL and make sure the entity tables exist
pub async fn create_store(config: &Config) -> Result<Arc<PostgresStore>, Box<dyn std::error::Error>> {
    let store = PostgresStore::connect(&config.postgres).await?;
    store.migrate().await?;
    Ok(Arc::new(store))
}

/// Gateway-side relay over a Kafka publisher
pub fn create_relay(config: &Config) -> Result<Relay, Box<dyn std::error::Error>> {
    let publisher = create_publisher(config)?;
    Ok(Relay::new(publisher).with_publish_timeout(config.publish_timeout()))
}

pub fn create_publisher(config: &Config) -> Result<Arc<KafkaPublisher>, Box<dyn std::error::Error>> {
    Ok(Arc::new(KafkaPublisher::new(Arc::new(config.publisher_config()))?))
}

/// Backend-side registry over Kafka with the given failure policy
pub fn create_registry(
    config: &Config,
    policy: FailurePolicy,
) -> Result<SubscriptionRegistry, Box<dyn std::error::Error>> {
    let dead_letters: Option<Arc<dyn Publisher>> = match policy {
        FailurePolicy::DeadLetter => Some(create_publisher(config)?),
        FailurePolicy::Skip | FailurePolicy::Halt => None,
    };
    let settings = RuntimeSettings {
        failure_policy: policy,
        ..config.runtime_settings()
    };
    Ok(SubscriptionRegistry::new(
        Arc::new(KafkaSource::new(config.source_config())),
        dead_letters,
        settings,
    ))
}
