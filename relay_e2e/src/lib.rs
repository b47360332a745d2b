//! post_relay E2E Test Suite
//!
//! Runs the relay against a live Kafka broker and PostgreSQL:
//! - Test isolation via unique consumer groups and freshly created rows
//! - Automatic row cleanup via RAII
//! - Assertions that poll the database until a command is applied
//!
//! ## Test Categories
//!
//! - **mutation**: update and delete reach the database
//! - **delivery**: dead-lettering and redelivery after a halted loop
//! - **registration**: duplicate registration is refused
//!
//! ## Usage
//!
//! ```bash
//! # Broker and database from the usual variables
//! KAFKA_URL=localhost:9092 POSTGRES_HOST=localhost cargo run -p relay_e2e --release
//! ```

// Infrastructure modules
pub mod assertions;
pub mod common;
pub mod setup;

// Test modules
pub mod delivery;
pub mod mutation;
pub mod registration;

pub use delivery::{test_dead_letter, test_redelivery_after_halt};
pub use mutation::{test_log_delete, test_post_update};
pub use registration::test_duplicate_registration;
