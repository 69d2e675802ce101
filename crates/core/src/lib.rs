//! Vigil core types: entities, severities, update records and limits.

#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

pub mod config;
pub mod error;

pub use config::EngineConfig;
pub use error::{ConfigError, DecodeError, IndexDesyncError};

/// Name of the identifier field every entity carries.
pub const ID_FIELD: &str = "id";
pub const SEVERITY_FIELD: &str = "severity";
pub const DISMISS_FIELD: &str = "dismiss";

/// Stable entity identifier. Integer and string ids never compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityId {
    Num(i64),
    Str(String),
}

impl EntityId {
    pub fn from_value(v: &Value) -> Result<Self, DecodeError> {
        match v {
            Value::Number(n) => match n.as_i64() {
                Some(i) => Ok(EntityId::Num(i)),
                None if n.is_u64() => Err(DecodeError::InvalidId("integer out of range")),
                None => Err(DecodeError::InvalidId("non-integer number")),
            },
            Value::String(s) => Ok(EntityId::Str(s.clone())),
            other => Err(DecodeError::InvalidId(json_type(other))),
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Num(n) => write!(f, "{}", n),
            EntityId::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for EntityId {
    fn from(v: i64) -> Self { EntityId::Num(v) }
}

impl From<&str> for EntityId {
    fn from(v: &str) -> Self { EntityId::Str(v.to_string()) }
}

/// Alert severity, totally ordered by priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    #[default]
    None = 0,
    Info = 1,
    Notice = 2,
    Warning = 3,
    Error = 4,
    Critical = 5,
}

impl Severity {
    pub const COUNT: usize = 6;
    /// Ascending priority.
    pub const ALL: [Severity; Severity::COUNT] = [
        Severity::None,
        Severity::Info,
        Severity::Notice,
        Severity::Warning,
        Severity::Error,
        Severity::Critical,
    ];

    pub fn priority(self) -> u8 { self as u8 }

    pub fn from_priority(p: u64) -> Option<Self> {
        Severity::ALL.get(usize::try_from(p).ok()?).copied()
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Severity::ALL.iter().copied().find(|s| s.name().eq_ignore_ascii_case(name))
    }

    pub fn name(self) -> &'static str {
        match self {
            Severity::None => "NONE",
            Severity::Info => "INFO",
            Severity::Notice => "NOTICE",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
        }
    }

    /// Reads the wire form (name or integer priority); anything else is `None`.
    pub fn from_value(v: Option<&Value>) -> Self {
        match v {
            Some(Value::String(s)) => Severity::from_name(s).unwrap_or_default(),
            Some(Value::Number(n)) => n.as_u64().and_then(Severity::from_priority).unwrap_or_default(),
            _ => Severity::None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.name()) }
}

/// An opaque record with a stable `id`. The full field map (including `id`)
/// is kept verbatim so it round-trips to the consumer unchanged.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "Map<String, Value>")]
pub struct Entity {
    id: EntityId,
    fields: Map<String, Value>,
}

impl Entity {
    pub fn from_map(fields: Map<String, Value>) -> Result<Self, DecodeError> {
        let id = fields.get(ID_FIELD).ok_or(DecodeError::MissingId)?;
        let id = EntityId::from_value(id)?;
        Ok(Self { id, fields })
    }

    pub fn from_value(v: Value) -> Result<Self, DecodeError> {
        match v {
            Value::Object(map) => Self::from_map(map),
            other => Err(DecodeError::NotAnObject(json_type(&other))),
        }
    }

    pub fn id(&self) -> &EntityId { &self.id }
    pub fn fields(&self) -> &Map<String, Value> { &self.fields }
    pub fn get(&self, field: &str) -> Option<&Value> { self.fields.get(field) }

    pub fn severity(&self) -> Severity { Severity::from_value(self.fields.get(SEVERITY_FIELD)) }

    /// Alert dismissal flag; only `true` counts.
    pub fn dismissed(&self) -> bool {
        matches!(self.fields.get(DISMISS_FIELD), Some(Value::Bool(true)))
    }

    pub fn into_value(self) -> Value { Value::Object(self.fields) }
}

impl TryFrom<Map<String, Value>> for Entity {
    type Error = DecodeError;
    fn try_from(map: Map<String, Value>) -> Result<Self, Self::Error> { Entity::from_map(map) }
}

impl Serialize for Entity {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> { self.fields.serialize(s) }
}

/// A decoded update record.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// Full replacement of the collection.
    Snapshot(Vec<Entity>),
    Upsert(Entity),
    Tombstone(EntityId),
}

impl Update {
    /// The id this record targets; `None` for snapshots.
    pub fn id(&self) -> Option<&EntityId> {
        match self {
            Update::Snapshot(_) => None,
            Update::Upsert(e) => Some(e.id()),
            Update::Tombstone(id) => Some(id),
        }
    }
}

/// A raw text frame as delivered by the transport. Whether a frame is a full
/// snapshot is decided by the caller, never inferred from content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RawFrame {
    Snapshot(String),
    Incremental(String),
}

impl RawFrame {
    pub fn text(&self) -> &str {
        match self {
            RawFrame::Snapshot(t) | RawFrame::Incremental(t) => t,
        }
    }

    pub fn is_snapshot(&self) -> bool { matches!(self, RawFrame::Snapshot(_)) }
}

/// One end of an ordered collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum End {
    Front,
    Back,
}

/// Signed collection bound: `0` is unbounded, `n > 0` keeps the newest `n`
/// (append at back, drop from front), `n < 0` keeps `|n|` with new items at
/// the front and drops from the back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Limit(pub i64);

impl Limit {
    pub const UNBOUNDED: Limit = Limit(0);

    pub fn cap(self) -> Option<usize> {
        if self.0 == 0 { None } else { usize::try_from(self.0.unsigned_abs()).ok() }
    }

    pub fn insert_end(self) -> End {
        if self.0 < 0 { End::Front } else { End::Back }
    }

    pub fn evict_end(self) -> End {
        match self.insert_end() {
            End::Front => End::Back,
            End::Back => End::Front,
        }
    }
}

impl From<i64> for Limit {
    fn from(v: i64) -> Self { Limit(v) }
}

pub fn json_type(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

pub mod prelude {
    pub use super::{End, Entity, EntityId, Limit, RawFrame, Severity, Update};
    pub use super::{DecodeError, IndexDesyncError};
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn limit_directions() {
        assert_eq!(Limit(0).cap(), None);
        assert_eq!(Limit(3).cap(), Some(3));
        assert_eq!(Limit(-4).cap(), Some(4));
        assert_eq!(Limit(3).insert_end(), End::Back);
        assert_eq!(Limit(3).evict_end(), End::Front);
        assert_eq!(Limit(-1).insert_end(), End::Front);
        assert_eq!(Limit(-1).evict_end(), End::Back);
        assert_eq!(Limit::UNBOUNDED.insert_end(), End::Back);
    }

    #[test]
    fn severity_wire_forms() {
        assert_eq!(Severity::from_value(Some(&json!("CRITICAL"))), Severity::Critical);
        assert_eq!(Severity::from_value(Some(&json!("warning"))), Severity::Warning);
        assert_eq!(Severity::from_value(Some(&json!(4))), Severity::Error);
        assert_eq!(Severity::from_value(Some(&json!(99))), Severity::None);
        assert_eq!(Severity::from_value(Some(&json!("bogus"))), Severity::None);
        assert_eq!(Severity::from_value(None), Severity::None);
        assert!(Severity::Critical > Severity::Warning);
        assert_eq!(Severity::Critical.priority(), 5);
    }

    #[test]
    fn entity_ids_and_flags() {
        let e = Entity::from_value(json!({"id": 7, "severity": "ERROR", "dismiss": true})).unwrap();
        assert_eq!(e.id(), &EntityId::Num(7));
        assert_eq!(e.severity(), Severity::Error);
        assert!(e.dismissed());
        let s = Entity::from_value(json!({"id": "7"})).unwrap();
        assert_ne!(s.id(), e.id());
        assert!(matches!(Entity::from_value(json!({"id": 1.5})), Err(DecodeError::InvalidId("non-integer number"))));
        assert!(matches!(Entity::from_value(json!({"id": u64::MAX})), Err(DecodeError::InvalidId("integer out of range"))));
        assert!(matches!(Entity::from_value(json!({"x": 1})), Err(DecodeError::MissingId)));
        assert!(matches!(Entity::from_value(json!([1])), Err(DecodeError::NotAnObject("array"))));
    }

    #[test]
    fn entity_serializes_as_its_fields() {
        let v = json!({"id": "a", "px": 10});
        let e: Entity = serde_json::from_value(v.clone()).unwrap();
        assert_eq!(serde_json::to_value(&e).unwrap(), v);
    }
}
