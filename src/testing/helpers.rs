//! Test helper functions
//!
//! Fixture builders shared by the unit tests.

use bytes::Bytes;

use crate::relay::command::{EntityKind, FieldMap};
use crate::relay::source::InboundMessage;
use crate::relay::storage::MemoryStore;

/// Creates an inbound message on partition 0 with no key
pub fn inbound(topic: &str, offset: i64, payload: &'static [u8]) -> InboundMessage {
    InboundMessage {
        topic: topic.to_string(),
        partition: 0,
        offset,
        key: None,
        payload: Bytes::from_static(payload),
    }
}

/// Creates a MemoryStore holding one default-valued row per id
pub fn seeded_store(entity: EntityKind, ids: &[i64]) -> MemoryStore {
    let store = MemoryStore::new();
    for &id in ids {
        store
            .insert_row(entity, id, FieldMap::new())
            .expect("seed row");
    }
    store
}
