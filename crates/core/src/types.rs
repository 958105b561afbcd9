//! Identifier and record types for the ingestion data model.
//!
//! A collection is the unit of isolation: sequence numbers, segments and
//! ordering guarantees are all scoped to a single collection. Different
//! collections are fully independent.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::value::MetadataValue;

/// Metadata map attached to an item.
///
/// Key order is irrelevant to semantics; a BTreeMap keeps serialization
/// deterministic.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// Identifier of a collection.
///
/// Collections are addressed by name. The name is the stable external handle;
/// everything durable (log directory, segment snapshots) is keyed by it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CollectionId(String);

impl CollectionId {
    /// Create a new CollectionId from a name.
    pub fn new(name: impl Into<String>) -> Self {
        CollectionId(name.into())
    }

    /// Get the collection name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CollectionId {
    fn from(name: &str) -> Self {
        CollectionId::new(name)
    }
}

/// Unique identifier of a segment instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SegmentId(Uuid);

impl SegmentId {
    /// Generate a fresh segment id.
    pub fn new() -> Self {
        SegmentId(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SegmentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kind of storage a segment provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SegmentKind {
    /// Embeddings + nearest-neighbor index
    Vector,
    /// Documents + structured metadata
    Metadata,
}

impl fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentKind::Vector => write!(f, "vector"),
            SegmentKind::Metadata => write!(f, "metadata"),
        }
    }
}

/// Position of a record in a collection's ingestion log.
///
/// SeqIds are assigned by the producer at append time, start at 1, and are
/// strictly increasing with no gaps within a collection. Storage segments
/// persist the highest SeqId they have applied so recovery can resume exactly
/// after it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct SeqId(pub u64);

impl SeqId {
    /// Create a SeqId from a raw u64.
    pub fn new(v: u64) -> Self {
        SeqId(v)
    }

    /// Get the underlying u64 value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// The SeqId following this one.
    pub fn next(&self) -> SeqId {
        SeqId(self.0 + 1)
    }
}

impl fmt::Display for SeqId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of mutation described by an [`OperationRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Insert a new item; a record for an already-present id does not apply.
    Add,
    /// Modify an existing item; a record for an unknown id does not apply.
    Update,
    /// Insert or modify unconditionally.
    Upsert,
    /// Remove the item.
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Add => write!(f, "add"),
            Operation::Update => write!(f, "update"),
            Operation::Upsert => write!(f, "upsert"),
            Operation::Delete => write!(f, "delete"),
        }
    }
}

/// Immutable description of one item mutation.
///
/// Created by the write-request layer and submitted to the producer. The
/// payload fields are all optional: a Delete carries none of them, an Update
/// carries only the fields it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    /// Item id, unique within the collection. Must be non-empty.
    pub item_id: String,

    /// Mutation kind
    pub operation: Operation,

    /// Embedding vector; dimension is fixed per collection after first write
    pub vector: Option<Vec<f32>>,

    /// Document text
    pub document: Option<String>,

    /// Structured metadata
    pub metadata: Option<Metadata>,
}

impl OperationRecord {
    /// Record that upserts an item with the given vector.
    pub fn upsert(item_id: impl Into<String>, vector: Vec<f32>) -> Self {
        OperationRecord {
            item_id: item_id.into(),
            operation: Operation::Upsert,
            vector: Some(vector),
            document: None,
            metadata: None,
        }
    }

    /// Record that deletes an item.
    pub fn delete(item_id: impl Into<String>) -> Self {
        OperationRecord {
            item_id: item_id.into(),
            operation: Operation::Delete,
            vector: None,
            document: None,
            metadata: None,
        }
    }

    /// Attach a document to the record.
    pub fn with_document(mut self, document: impl Into<String>) -> Self {
        self.document = Some(document.into());
        self
    }

    /// Attach metadata to the record.
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// An [`OperationRecord`] as seen by log consumers: stamped with its SeqId.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Position in the collection's log
    pub seq_id: SeqId,

    /// The mutation itself
    pub record: OperationRecord,
}

impl LogRecord {
    /// Create a new LogRecord.
    pub fn new(seq_id: SeqId, record: OperationRecord) -> Self {
        LogRecord { seq_id, record }
    }
}

/// A fully materialized item, the unit of data in a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Item id, unique within the collection
    pub id: String,

    /// Embedding vector
    pub vector: Vec<f32>,

    /// Document text
    pub document: Option<String>,

    /// Structured metadata
    pub metadata: Option<Metadata>,
}
