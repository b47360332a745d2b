// post_relay: asynchronous update/delete relay for the posts service
//
// The gateway publishes update and delete commands for posts and logs to
// Kafka instead of calling the backend directly; the backend consumes them
// and applies each one to its database.

pub mod config; // Environment configuration
pub mod relay; // Envelope codec, publisher, consumers, handlers, storage
pub mod worker; // Backend consumer entry point

// Test utilities (only compiled in test builds)
#[cfg(test)]
pub mod testing;

pub use config::{Config, PostgresConfig, StorageBackend};
pub use relay::{RelayError, Result};
