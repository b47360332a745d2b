//! Testing utilities for post_relay
//!
//! Only compiled when running tests.
//!
//! # Organization
//! - `mocks.rs` - mockall doubles for the storage seam, plus `mock_config`
//! - `helpers.rs` - fixture builders for messages and seeded stores

#![cfg(test)]

pub mod helpers;
pub mod mocks;

// Re-export commonly used items
pub use helpers::{inbound, seeded_store};
pub use mocks::mock_config;
