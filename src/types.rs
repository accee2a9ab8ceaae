//! Core value types shared across the coordination layer.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identity of a context within one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContextId(u64);

impl ContextId {
    /// Generate the next context ID (process-unique, monotonic)
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        ContextId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx:{}", self.0)
    }
}

/// Identity of a serial execution queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueueId(u64);

impl QueueId {
    /// Generate the next queue ID (process-unique, monotonic)
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        QueueId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "queue:{}", self.0)
    }
}

/// Identity of a calling execution context: a managed serial queue when the
/// caller is running on one, otherwise the plain OS thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueIdentity {
    Queue(QueueId),
    Thread(std::thread::ThreadId),
}

impl fmt::Display for QueueIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueIdentity::Queue(id) => write!(f, "{}", id),
            QueueIdentity::Thread(id) => write!(f, "thread:{:?}", id),
        }
    }
}

/// Names a logical object independent of which context holds it.
///
/// Temporary identifiers are minted by the context that created the object
/// and are only meaningful inside that context before its first commit.
/// Permanent identifiers are allocated by the durable store and are stable
/// across every context and in the store itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Identifier {
    Temporary { context: ContextId, seq: u64 },
    Permanent { raw: u64 },
}

impl Identifier {
    pub fn permanent(raw: u64) -> Self {
        Identifier::Permanent { raw }
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, Identifier::Permanent { .. })
    }

    pub fn is_temporary(&self) -> bool {
        !self.is_permanent()
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Temporary { context, seq } => write!(f, "tmp:{}:{}", context.as_u64(), seq),
            Identifier::Permanent { raw } => write!(f, "obj:{}", raw),
        }
    }
}

/// Attribute value stored on an object.
///
/// A closed enum rather than arbitrary JSON so records round-trip through
/// bincode in the sled store. `to_json`/`from_json` convert at the embedding
/// boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl AttributeValue {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            AttributeValue::Null => serde_json::Value::Null,
            AttributeValue::Bool(b) => serde_json::Value::Bool(*b),
            AttributeValue::Int(i) => serde_json::Value::from(*i),
            AttributeValue::Float(x) => {
                serde_json::Number::from_f64(*x).map_or(serde_json::Value::Null, serde_json::Value::Number)
            }
            AttributeValue::Text(s) => serde_json::Value::String(s.clone()),
            AttributeValue::Bytes(b) => {
                serde_json::Value::Array(b.iter().map(|v| serde_json::Value::from(*v)).collect())
            }
        }
    }

    /// Best-effort conversion from JSON; arrays and maps are not attribute
    /// values and come back as None.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => Some(AttributeValue::Null),
            serde_json::Value::Bool(b) => Some(AttributeValue::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(AttributeValue::Int(i))
                } else {
                    n.as_f64().map(AttributeValue::Float)
                }
            }
            serde_json::Value::String(s) => Some(AttributeValue::Text(s.clone())),
            _ => None,
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Text(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::Text(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Int(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Float(value)
    }
}

/// Attribute map type used throughout.
pub type Attributes = HashMap<String, AttributeValue>;

/// Value form of an object: what travels in save batches and lives in the
/// durable store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub id: Identifier,
    pub entity: String,
    pub attributes: Attributes,
}

impl ObjectRecord {
    pub fn new(id: Identifier, entity: impl Into<String>, attributes: Attributes) -> Self {
        Self {
            id,
            entity: entity.into(),
            attributes,
        }
    }

    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }
}

/// An object instance bound to exactly one context.
///
/// Always a fresh value: instances never cross a context boundary by
/// reference. Fetch translation builds a new one for the destination context.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagedObject {
    pub record: ObjectRecord,
    /// The context this instance is bound to.
    pub context: ContextId,
    /// Whether the backing record carries uncommitted changes in that context.
    pub dirty: bool,
}

impl ManagedObject {
    pub fn id(&self) -> Identifier {
        self.record.id
    }

    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.record.attribute(key)
    }
}

/// One fetch result: a bare identifier or a materialized object.
#[derive(Debug, Clone)]
pub enum FetchItem {
    Id(Identifier),
    Object(ManagedObject),
}

impl FetchItem {
    pub fn id(&self) -> Identifier {
        match self {
            FetchItem::Id(id) => *id,
            FetchItem::Object(obj) => obj.id(),
        }
    }
}

/// Batch of committed changes passed between save hops and described by
/// did-save events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub inserted: Vec<ObjectRecord>,
    pub updated: Vec<ObjectRecord>,
    pub deleted: Vec<Identifier>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    /// Total number of object changes in the batch.
    pub fn len(&self) -> usize {
        self.inserted.len() + self.updated.len() + self.deleted.len()
    }
}

/// Point-in-time copy of a context's visible state, layered over the durable
/// store when queries execute.
#[derive(Debug, Clone, Default)]
pub struct ContextSnapshot {
    /// Committed rows plus pending upserts, keyed by identifier.
    pub rows: HashMap<Identifier, ObjectRecord>,
    /// Identifiers tombstoned by pending deletions.
    pub deleted: HashSet<Identifier>,
}

impl ContextSnapshot {
    pub fn is_deleted(&self, id: &Identifier) -> bool {
        self.deleted.contains(id)
    }
}

/// Filter applied by the query engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    All,
    AttributeEquals { key: String, value: AttributeValue },
}

impl Predicate {
    pub fn matches(&self, record: &ObjectRecord) -> bool {
        match self {
            Predicate::All => true,
            Predicate::AttributeEquals { key, value } => record.attribute(key) == Some(value),
        }
    }
}

/// A query over one entity's records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub entity: String,
    pub predicate: Predicate,
    /// Cap on result count; None means unbounded.
    pub limit: Option<usize>,
}

impl Query {
    pub fn all(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            predicate: Predicate::All,
            limit: None,
        }
    }

    pub fn matching(entity: impl Into<String>, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Self {
            entity: entity.into(),
            predicate: Predicate::AttributeEquals {
                key: key.into(),
                value: value.into(),
            },
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a record belongs in this query's result set.
    pub fn accepts(&self, record: &ObjectRecord) -> bool {
        record.entity == self.entity && self.predicate.matches(record)
    }
}
