//! Metadata segment: documents and structured metadata with filtered lookup.

pub mod store;

pub use store::{MetadataSegment, MetadataSegmentConfig, Row, RowId};
