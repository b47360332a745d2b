// Storage abstraction layer for the relay
//
// Mutation handlers apply commands through the Store trait. The trait also
// carries the synchronous create/read/list path so tests and the end-to-end
// harness can observe the effect of relayed mutations.
//
// Soft-delete contract shared by every implementation:
// - delete sets deleted_at once; deleting again is Applied and keeps the marker
// - get and list never return deleted rows
// - update of a deleted row is NotFound

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::command::{EntityKind, FieldMap};
use super::error::Result;

/// Outcome of a mutation at the storage layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreAck {
    /// The row exists and is in the requested state
    Applied,
    /// No live row with that id
    NotFound,
}

/// A stored entity row
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub id: i64,
    /// Every column of the entity schema
    pub fields: FieldMap,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Row {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Row-oriented persistence keyed by integer ids
///
/// Implementations must be safe for concurrent use; handlers from several
/// receive loops may call the same store at once. Last writer wins.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert a row; unset columns take their defaults (0 or "")
    async fn create(&self, entity: EntityKind, fields: FieldMap) -> Result<i64>;

    /// Fetch a live row
    async fn get(&self, entity: EntityKind, id: i64) -> Result<Option<Row>>;

    /// All live rows, ordered by id
    async fn list(&self, entity: EntityKind) -> Result<Vec<Row>>;

    /// Overwrite the given columns and touch updated_at
    ///
    /// Columns absent from `fields` keep their stored value.
    async fn update(&self, entity: EntityKind, id: i64, fields: &FieldMap) -> Result<StoreAck>;

    /// Soft-delete a row
    async fn delete(&self, entity: EntityKind, id: i64) -> Result<StoreAck>;
}

// Submodules
pub mod memory;
pub mod postgres;

#[cfg(test)]
mod tests;

// Re-export main types
pub use memory::MemoryStore;
pub use postgres::PostgresStore;
