//! Mutation E2E tests
//!
//! A command submitted through the gateway relay is applied by a consumer
//! registered on the route's topic.

mod delete;
mod update;

pub use delete::test_log_delete;
pub use update::test_post_update;
