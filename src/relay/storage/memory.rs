// In-memory Store implementation
//
// Backs the relay when RELAY_STORAGE=memory and serves as the reference
// implementation of the soft-delete contract in tests.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

use super::{Row, Store, StoreAck};
use crate::relay::command::{EntityKind, FieldKind, FieldMap, FieldValue};
use crate::relay::error::Result;

#[derive(Default)]
struct Tables {
    rows: HashMap<EntityKind, BTreeMap<i64, Row>>,
    next_id: HashMap<EntityKind, i64>,
}

/// Thread-safe in-memory tables for every entity kind
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a row with a caller-chosen id, replacing any row with that id
    pub fn insert_row(&self, entity: EntityKind, id: i64, fields: FieldMap) -> Result<()> {
        entity.check_fields(&fields)?;
        let row = Row {
            id,
            fields: with_defaults(entity, fields),
            created_at: Utc::now(),
            updated_at: None,
            deleted_at: None,
        };

        let mut tables = self.tables.lock();
        let next = tables.next_id.entry(entity).or_insert(1);
        if *next <= id {
            *next = id + 1;
        }
        tables.rows.entry(entity).or_default().insert(id, row);
        Ok(())
    }

    /// Fetch a row whether or not it is deleted
    pub fn raw_row(&self, entity: EntityKind, id: i64) -> Option<Row> {
        self.tables
            .lock()
            .rows
            .get(&entity)
            .and_then(|rows| rows.get(&id))
            .cloned()
    }
}

fn with_defaults(entity: EntityKind, mut fields: FieldMap) -> FieldMap {
    for (column, kind) in entity.columns() {
        fields.entry(column.to_string()).or_insert_with(|| match kind {
            FieldKind::Text => FieldValue::Text(String::new()),
            FieldKind::Integer => FieldValue::Integer(0),
        });
    }
    fields
}

#[async_trait]
impl Store for MemoryStore {
    async fn create(&self, entity: EntityKind, fields: FieldMap) -> Result<i64> {
        entity.check_fields(&fields)?;

        let mut tables = self.tables.lock();
        let next = tables.next_id.entry(entity).or_insert(1);
        let id = *next;
        *next += 1;

        tables.rows.entry(entity).or_default().insert(
            id,
            Row {
                id,
                fields: with_defaults(entity, fields),
                created_at: Utc::now(),
                updated_at: None,
                deleted_at: None,
            },
        );
        Ok(id)
    }

    async fn get(&self, entity: EntityKind, id: i64) -> Result<Option<Row>> {
        Ok(self
            .tables
            .lock()
            .rows
            .get(&entity)
            .and_then(|rows| rows.get(&id))
            .filter(|row| !row.is_deleted())
            .cloned())
    }

    async fn list(&self, entity: EntityKind) -> Result<Vec<Row>> {
        Ok(self
            .tables
            .lock()
            .rows
            .get(&entity)
            .map(|rows| {
                rows.values()
                    .filter(|row| !row.is_deleted())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn update(&self, entity: EntityKind, id: i64, fields: &FieldMap) -> Result<StoreAck> {
        entity.check_fields(fields)?;

        let mut tables = self.tables.lock();
        let row = match tables
            .rows
            .get_mut(&entity)
            .and_then(|rows| rows.get_mut(&id))
        {
            Some(row) if !row.is_deleted() => row,
            _ => return Ok(StoreAck::NotFound),
        };

        for (name, value) in fields {
            row.fields.insert(name.clone(), value.clone());
        }
        row.updated_at = Some(Utc::now());
        Ok(StoreAck::Applied)
    }

    async fn delete(&self, entity: EntityKind, id: i64) -> Result<StoreAck> {
        let mut tables = self.tables.lock();
        match tables
            .rows
            .get_mut(&entity)
            .and_then(|rows| rows.get_mut(&id))
        {
            Some(row) => {
                if row.deleted_at.is_none() {
                    row.deleted_at = Some(Utc::now());
                }
                Ok(StoreAck::Applied)
            }
            None => Ok(StoreAck::NotFound),
        }
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tables = self.tables.lock();
        let counts: BTreeMap<&str, usize> = tables
            .rows
            .iter()
            .map(|(entity, rows)| (entity.table(), rows.len()))
            .collect();
        f.debug_struct("MemoryStore").field("rows", &counts).finish()
    }
}
