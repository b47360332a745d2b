//! Custom test assertions
//!
//! Asynchronous application means every check polls until it holds or the
//! timeout expires.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use post_relay::relay::{EntityKind, FieldValue, Row, Store};

use crate::common::{APPLY_TIMEOUT, POLL_INTERVAL};

/// Custom assertion error with detailed information
#[derive(Debug)]
pub struct AssertionError {
    pub message: String,
    pub expected: String,
    pub actual: String,
}

impl fmt::Display for AssertionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\n  Expected: {}\n  Actual: {}",
            self.message, self.expected, self.actual
        )
    }
}

impl std::error::Error for AssertionError {}

impl AssertionError {
    pub fn new(
        message: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self {
            message: message.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

/// Poll `condition` until it returns true or `timeout` passes
pub async fn eventually<F, Fut>(timeout: Duration, mut condition: F) -> Result<bool, Box<dyn std::error::Error>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, Box<dyn std::error::Error>>>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await? {
            return Ok(true);
        }
        if tokio::time::Instant::now() >= deadline {
            return Ok(false);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Assert that a live row eventually has `field` set to `expected`
pub async fn assert_field_eventually(
    store: &dyn Store,
    entity: EntityKind,
    id: i64,
    field: &str,
    expected: FieldValue,
) -> Result<Row, Box<dyn std::error::Error>> {
    let matched = eventually(APPLY_TIMEOUT, || {
        let expected = expected.clone();
        async move {
            let row = store.get(entity, id).await?;
            Ok(row.is_some_and(|row| row.fields.get(field) == Some(&expected)))
        }
    })
    .await?;

    let last = store.get(entity, id).await?;
    match last {
        Some(row) if matched => Ok(row),
        last => Err(Box::new(AssertionError::new(
            format!("{} {} was not updated", entity, id),
            format!("{} = {}", field, expected),
            match last {
                Some(row) => format!("{:?}", row.fields.get(field)),
                None => "row missing or deleted".to_string(),
            },
        ))),
    }
}

/// Assert that a row eventually disappears from reads
pub async fn assert_deleted_eventually(
    store: &dyn Store,
    entity: EntityKind,
    id: i64,
) -> Result<(), Box<dyn std::error::Error>> {
    let gone = eventually(APPLY_TIMEOUT, || async move {
        Ok(store.get(entity, id).await?.is_none())
    })
    .await?;

    if !gone {
        return Err(Box::new(AssertionError::new(
            format!("{} {} was not deleted", entity, id),
            "get() returns nothing",
            "row still visible",
        )));
    }

    let listed = store.list(entity).await?.iter().any(|row| row.id == id);
    if listed {
        return Err(Box::new(AssertionError::new(
            format!("{} {} still listed", entity, id),
            "excluded from list()",
            "present in list()",
        )));
    }
    Ok(())
}
