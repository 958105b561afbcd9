//! Storage segments for Tessera
//!
//! A segment is a specialized storage unit holding one collection's data of
//! one kind:
//! - [`VectorSegment`]: embeddings behind a pluggable nearest-neighbor index
//! - [`MetadataSegment`]: documents and structured metadata with filtered
//!   lookup
//!
//! Both apply ingestion-log records in SeqId order and persist snapshots
//! whose max-applied checkpoint is co-located with the data. The
//! [`SegmentDirectory`] caches live instances and resolves configurations
//! through the injected [`Catalog`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod checkpoint;
pub mod directory;
pub mod metadata;
pub mod state;
pub mod vector;

pub use directory::{Catalog, InMemoryCatalog, SegmentDirectory, SegmentSpecs};
pub use metadata::{MetadataSegment, MetadataSegmentConfig, Row, RowId};
pub use state::{ApplyStats, SegmentState};
pub use vector::{
    DistanceMetric, ExactIndex, IndexBackendKind, Label, VectorIndexBackend, VectorSegment,
    VectorSegmentConfig,
};
