//! Delivery E2E tests
//!
//! Failure handling on the consumer side:
//! - Malformed payloads go to the dead-letter topic
//! - A halted loop redelivers its uncommitted message once re-registered

mod dead_letter;
mod redelivery;

pub use dead_letter::test_dead_letter;
pub use redelivery::test_redelivery_after_halt;
