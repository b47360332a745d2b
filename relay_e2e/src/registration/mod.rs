//! Registration E2E tests

mod duplicate;

pub use duplicate::test_duplicate_registration;
