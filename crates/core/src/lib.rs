//! Core types for Tessera
//!
//! This crate defines the foundational types shared by every layer of the
//! engine:
//! - CollectionId / SegmentId / SeqId: identifier newtypes
//! - Operation / OperationRecord / LogRecord: the ingestion data model
//! - MetadataValue: scalar value enum for item metadata
//! - MetadataPredicate / DocumentPredicate: filter expressions
//! - Plan types: Scan, Filter, Knn, Limit, Projection and the result model
//! - Error: shared error hierarchy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod plan;
pub mod predicate;
pub mod types;
pub mod value;

// Re-export commonly used types at the crate root
pub use error::{Error, Result};
pub use plan::{
    CountPlan, FilterSpec, GetPlan, KnnPlan, KnnSpec, LimitSpec, Plan, Projection, QueryOutput,
    Record, ScanSpec,
};
pub use predicate::{DocumentPredicate, MetadataPredicate};
pub use types::{
    CollectionId, Item, LogRecord, Metadata, Operation, OperationRecord, SegmentId, SegmentKind,
    SeqId,
};
pub use value::MetadataValue;
