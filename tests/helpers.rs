// Test helpers shared by the integration tests
//
// Each test binary includes this file with `mod helpers;` and uses a subset
// of it.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use post_relay::relay::{
    EntityKind, FieldMap, MemoryStore, RelayError, Result, Row, Store, StoreAck,
};

/// MemoryStore wrapper that counts mutations and can fail them on demand
///
/// While `failures_left` is positive, update and delete return a retriable
/// storage error and decrement it.
#[derive(Default)]
pub struct CountingStore {
    pub inner: MemoryStore,
    pub updates: AtomicUsize,
    pub deletes: AtomicUsize,
    failures_left: Mutex<usize>,
}

impl CountingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_next(&self, times: usize) {
        *self.failures_left.lock() = times;
    }

    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    fn injected_failure(&self) -> Result<()> {
        let mut left = self.failures_left.lock();
        if *left > 0 {
            *left -= 1;
            return Err(RelayError::Storage("injected failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for CountingStore {
    async fn create(&self, entity: EntityKind, fields: FieldMap) -> Result<i64> {
        self.inner.create(entity, fields).await
    }

    async fn get(&self, entity: EntityKind, id: i64) -> Result<Option<Row>> {
        self.inner.get(entity, id).await
    }

    async fn list(&self, entity: EntityKind) -> Result<Vec<Row>> {
        self.inner.list(entity).await
    }

    async fn update(&self, entity: EntityKind, id: i64, fields: &FieldMap) -> Result<StoreAck> {
        self.injected_failure()?;
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.inner.update(entity, id, fields).await
    }

    async fn delete(&self, entity: EntityKind, id: i64) -> Result<StoreAck> {
        self.injected_failure()?;
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(entity, id).await
    }
}

/// Poll `condition` every 10ms for up to 3 seconds
pub async fn wait_until(condition: impl Fn() -> bool) -> bool {
    for _ in 0..300 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
