// Mutation command model
//
// A MutationCommand is the unit of work carried through the relay: which
// entity, which operation, which row, and (for updates) which columns change.
// Unset columns are absent from `fields`; an empty string is a real value.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::error::{RelayError, Result};

/// Entity kinds whose mutations are relayed through the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    Post,
    Log,
}

/// Relayed operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operation {
    Update,
    Delete,
}

/// Column type in an entity schema
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
}

const POST_COLUMNS: &[(&str, FieldKind)] = &[
    ("user_id", FieldKind::Integer),
    ("title", FieldKind::Text),
    ("content", FieldKind::Text),
];

const LOG_COLUMNS: &[(&str, FieldKind)] = &[
    ("level", FieldKind::Text),
    ("message", FieldKind::Text),
    ("service_name", FieldKind::Text),
];

impl EntityKind {
    pub const ALL: [EntityKind; 2] = [EntityKind::Post, EntityKind::Log];

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Post => "post",
            EntityKind::Log => "log",
        }
    }

    /// Backing table name
    pub fn table(self) -> &'static str {
        match self {
            EntityKind::Post => "posts",
            EntityKind::Log => "logs",
        }
    }

    /// Mutable columns, in storage order
    pub fn columns(self) -> &'static [(&'static str, FieldKind)] {
        match self {
            EntityKind::Post => POST_COLUMNS,
            EntityKind::Log => LOG_COLUMNS,
        }
    }

    pub fn field_kind(self, name: &str) -> Option<FieldKind> {
        self.columns()
            .iter()
            .find(|(column, _)| *column == name)
            .map(|(_, kind)| *kind)
    }

    /// Every field must be a column of this entity with a matching type
    pub fn check_fields(self, fields: &FieldMap) -> Result<()> {
        for (name, value) in fields {
            match self.field_kind(name) {
                None => {
                    return Err(RelayError::UnsupportedCommand(format!(
                        "{} has no field '{}'",
                        self, name
                    )))
                }
                Some(kind) if kind != value.kind() => {
                    return Err(RelayError::UnsupportedCommand(format!(
                        "field '{}' of {} expects {:?}, got {:?}",
                        name,
                        self,
                        kind,
                        value.kind()
                    )))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "post" => Ok(EntityKind::Post),
            "log" => Ok(EntityKind::Log),
            other => Err(RelayError::RejectedInvalid(format!(
                "unknown entity kind '{}'",
                other
            ))),
        }
    }
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "update" => Ok(Operation::Update),
            "delete" => Ok(Operation::Delete),
            other => Err(RelayError::RejectedInvalid(format!(
                "unknown operation '{}'",
                other
            ))),
        }
    }
}

/// One relayed (entity, operation) pair
///
/// Each route maps to exactly one topic and one default consumer group; see
/// the naming methods in `topic.rs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Route {
    pub entity: EntityKind,
    pub operation: Operation,
}

impl Route {
    pub const ALL: [Route; 4] = [
        Route::new(EntityKind::Post, Operation::Update),
        Route::new(EntityKind::Post, Operation::Delete),
        Route::new(EntityKind::Log, Operation::Update),
        Route::new(EntityKind::Log, Operation::Delete),
    ];

    pub const fn new(entity: EntityKind, operation: Operation) -> Self {
        Self { entity, operation }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.entity, self.operation)
    }
}

/// New value for one column
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Integer(i64),
}

impl FieldValue {
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldValue::Text(_) => FieldKind::Text,
            FieldValue::Integer(_) => FieldKind::Integer,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            FieldValue::Integer(_) => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(v) => Some(*v),
            FieldValue::Text(_) => None,
        }
    }

    /// Parse a raw string (e.g. from the command line) as a value of `kind`
    pub fn parse_as(kind: FieldKind, raw: &str) -> Result<Self> {
        match kind {
            FieldKind::Text => Ok(FieldValue::Text(raw.to_string())),
            FieldKind::Integer => raw.trim().parse::<i64>().map(FieldValue::Integer).map_err(|e| {
                RelayError::RejectedInvalid(format!("'{}' is not an integer: {}", raw, e))
            }),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) => write!(f, "{:?}", s),
            FieldValue::Integer(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Integer(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::Integer(i64::from(v))
    }
}

/// Column name to new value; only set columns are present
pub type FieldMap = BTreeMap<String, FieldValue>;

/// The unit of work carried through the relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationCommand {
    pub entity: EntityKind,
    pub operation: Operation,
    /// Row to mutate; values <= 0 mean "absent"
    pub target_id: i64,
    pub fields: FieldMap,
}

impl MutationCommand {
    pub fn update(entity: EntityKind, target_id: i64) -> Self {
        Self {
            entity,
            operation: Operation::Update,
            target_id,
            fields: FieldMap::new(),
        }
    }

    pub fn delete(entity: EntityKind, target_id: i64) -> Self {
        Self {
            entity,
            operation: Operation::Delete,
            target_id,
            fields: FieldMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn route(&self) -> Route {
        Route::new(self.entity, self.operation)
    }

    pub fn has_target(&self) -> bool {
        self.target_id > 0
    }

    /// Check every field against the entity's column schema
    pub fn check_fields(&self) -> Result<()> {
        self.entity.check_fields(&self.fields)
    }
}
