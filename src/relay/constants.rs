//! Relay constants
//!
//! This module centralizes the topic names, consumer group ids, defaults and
//! configuration bounds used by the mutation relay.
//!
//! # Terminology
//! - **Route**: one relayed (entity, operation) pair, e.g. post/update
//! - **Topic**: the broker log a route is published to, e.g. `post-update`
//! - **Group**: the consumer group id that scopes offset tracking for a route

// ===== Topic Names =====
// Wire-level contract: publisher and subscriber must agree on these exactly.

/// Topic carrying post update commands
pub const TOPIC_POST_UPDATE: &str = "post-update";

/// Topic carrying post delete commands
pub const TOPIC_POST_DELETE: &str = "post-delete";

/// Topic carrying log update commands
pub const TOPIC_LOG_UPDATE: &str = "log-update";

/// Topic carrying log delete commands
pub const TOPIC_LOG_DELETE: &str = "log-delete";

/// Suffix appended to a topic name to form its dead-letter topic
pub const DEAD_LETTER_SUFFIX: &str = ".dlq";

// ===== Consumer Groups =====
// Short, stable ids distinct from the topic names. Changing one of these
// resets the committed offsets for that route.

/// Consumer group for `post-update`
pub const GROUP_POST_UPDATE: &str = "post-u";

/// Consumer group for `post-delete`
pub const GROUP_POST_DELETE: &str = "post-d";

/// Consumer group for `log-update`
pub const GROUP_LOG_UPDATE: &str = "log-u";

/// Consumer group for `log-delete`
pub const GROUP_LOG_DELETE: &str = "log-d";

// ===== Dead-Letter Headers =====

/// Header holding the failure reason of a dead-lettered message
pub const HEADER_ERROR: &str = "relay-error";

/// Header holding the topic the dead-lettered message was consumed from
pub const HEADER_SOURCE_TOPIC: &str = "relay-source-topic";

/// Header holding the partition the dead-lettered message was consumed from
pub const HEADER_SOURCE_PARTITION: &str = "relay-source-partition";

/// Header holding the offset the dead-lettered message was consumed from
pub const HEADER_SOURCE_OFFSET: &str = "relay-source-offset";

// ===== Broker Connection =====

/// Default bootstrap servers
pub const DEFAULT_BOOTSTRAP_SERVERS: &str = "localhost:9092";

/// Default client id reported to the brokers
pub const DEFAULT_CLIENT_ID: &str = "post-relay";

/// Default caller-side bound on a single publish (milliseconds)
pub const DEFAULT_PUBLISH_TIMEOUT_MS: u64 = 5_000;

/// Minimum publish timeout (milliseconds)
pub const MIN_PUBLISH_TIMEOUT_MS: u64 = 100;

/// Maximum publish timeout (milliseconds)
pub const MAX_PUBLISH_TIMEOUT_MS: u64 = 120_000;

/// Default librdkafka `message.timeout.ms`
pub const DEFAULT_MESSAGE_TIMEOUT_MS: u64 = 30_000;

/// Minimum `message.timeout.ms`
pub const MIN_MESSAGE_TIMEOUT_MS: u64 = 1_000;

/// Maximum `message.timeout.ms`
pub const MAX_MESSAGE_TIMEOUT_MS: u64 = 300_000;

/// Default consumer `session.timeout.ms`
pub const DEFAULT_SESSION_TIMEOUT_MS: u64 = 10_000;

/// Minimum `session.timeout.ms`
pub const MIN_SESSION_TIMEOUT_MS: u64 = 6_000;

/// Maximum `session.timeout.ms`
pub const MAX_SESSION_TIMEOUT_MS: u64 = 300_000;

/// Timeout used by publisher health checks (metadata fetch)
pub const HEALTH_CHECK_TIMEOUT_MS: u64 = 5_000;

// ===== Consumer Runtime =====

/// Default number of handler retries before the failure policy applies
pub const DEFAULT_HANDLER_MAX_RETRIES: u32 = 3;

/// Minimum handler retries
pub const MIN_HANDLER_MAX_RETRIES: u32 = 0;

/// Maximum handler retries
pub const MAX_HANDLER_MAX_RETRIES: u32 = 20;

/// Default base backoff between handler retries (milliseconds)
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 100;

/// Minimum retry backoff (milliseconds)
pub const MIN_RETRY_BACKOFF_MS: u64 = 1;

/// Maximum retry backoff (milliseconds)
pub const MAX_RETRY_BACKOFF_MS: u64 = 60_000;

/// Upper bound on a single exponential backoff step (milliseconds)
pub const RETRY_BACKOFF_CEILING_MS: u64 = 30_000;

/// Default consecutive receive errors tolerated before a loop is marked crashed
pub const DEFAULT_STREAM_ERROR_LIMIT: u32 = 10;

/// Minimum stream error limit
pub const MIN_STREAM_ERROR_LIMIT: u32 = 1;

/// Maximum stream error limit
pub const MAX_STREAM_ERROR_LIMIT: u32 = 10_000;

/// Default failure policy name
pub const DEFAULT_FAILURE_POLICY: &str = "dead_letter";

/// Default time allowed for receive loops to stop (milliseconds)
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 5_000;

/// Minimum shutdown timeout (milliseconds)
pub const MIN_SHUTDOWN_TIMEOUT_MS: u64 = 100;

/// Maximum shutdown timeout (milliseconds)
pub const MAX_SHUTDOWN_TIMEOUT_MS: u64 = 60_000;

/// How often the worker checks for crashed receive loops (milliseconds)
pub const SUPERVISE_INTERVAL_MS: u64 = 100;

// ===== Storage =====

/// Default storage backend name
pub const DEFAULT_STORAGE_BACKEND: &str = "postgres";

/// Default PostgreSQL host
pub const DEFAULT_POSTGRES_HOST: &str = "localhost";

/// Default PostgreSQL port
pub const DEFAULT_POSTGRES_PORT: u16 = 5432;

/// Default PostgreSQL user
pub const DEFAULT_POSTGRES_USER: &str = "postgres";

/// Default PostgreSQL database
pub const DEFAULT_POSTGRES_DATABASE: &str = "posts";
