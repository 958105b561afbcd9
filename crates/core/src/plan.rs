//! Query plans and the result model.
//!
//! A Plan is an ephemeral, per-request structure: fully determined by the
//! request, never persisted. Executing the same plan twice against unchanged
//! segment state yields identical results.
//!
//! Three plan shapes exist, one per execution-engine entry point:
//! - [`CountPlan`]: row count, metadata segment only
//! - [`GetPlan`]: filtered retrieval, metadata segment only
//! - [`KnnPlan`]: pre-filter + vector search + hydration

use serde::{Deserialize, Serialize};

use crate::predicate::{DocumentPredicate, MetadataPredicate};
use crate::types::{CollectionId, Metadata};

/// Which collection a plan runs against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSpec {
    /// Target collection
    pub collection: CollectionId,
}

impl ScanSpec {
    /// Scan the given collection.
    pub fn new(collection: impl Into<CollectionId>) -> Self {
        ScanSpec {
            collection: collection.into(),
        }
    }
}

impl From<&str> for ScanSpec {
    fn from(name: &str) -> Self {
        ScanSpec::new(CollectionId::new(name))
    }
}

/// Row restriction: explicit ids, metadata predicate, document predicate.
/// Supplied parts combine with logical AND.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FilterSpec {
    /// Allow-list of item ids (unknown ids simply yield no row)
    pub ids: Option<Vec<String>>,

    /// Predicate over metadata keys
    pub where_metadata: Option<MetadataPredicate>,

    /// Predicate over document text
    pub where_document: Option<DocumentPredicate>,
}

impl FilterSpec {
    /// Filter with no restrictions (matches every row).
    pub fn none() -> Self {
        FilterSpec::default()
    }

    /// True when no restriction of any kind is present.
    pub fn is_empty(&self) -> bool {
        self.ids.is_none() && self.where_metadata.is_none() && self.where_document.is_none()
    }

    /// Restrict to the given ids.
    pub fn with_ids(mut self, ids: Vec<String>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Restrict by metadata predicate.
    pub fn with_metadata(mut self, predicate: MetadataPredicate) -> Self {
        self.where_metadata = Some(predicate);
        self
    }

    /// Restrict by document predicate.
    pub fn with_document(mut self, predicate: DocumentPredicate) -> Self {
        self.where_document = Some(predicate);
        self
    }

    /// Validate the contained predicates.
    pub fn validate(&self) -> crate::error::Result<()> {
        if let Some(p) = &self.where_metadata {
            p.validate()?;
        }
        if let Some(p) = &self.where_document {
            p.validate()?;
        }
        Ok(())
    }
}

/// Nearest-neighbor parameters: one result list per query vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnnSpec {
    /// Query vectors (each must match the collection dimension)
    pub queries: Vec<Vec<f32>>,

    /// Neighbors requested per query vector
    pub k: usize,
}

impl KnnSpec {
    /// Search for the `k` nearest neighbors of each query vector.
    pub fn new(queries: Vec<Vec<f32>>, k: usize) -> Self {
        KnnSpec { queries, k }
    }

    /// Single-query convenience constructor.
    pub fn single(query: Vec<f32>, k: usize) -> Self {
        KnnSpec {
            queries: vec![query],
            k,
        }
    }
}

/// Pagination window over an ordered result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LimitSpec {
    /// Rows to skip from the front
    pub skip: usize,

    /// Rows to return after skipping (None = unbounded)
    pub take: Option<usize>,
}

impl LimitSpec {
    /// No pagination: everything.
    pub fn all() -> Self {
        LimitSpec::default()
    }

    /// First `take` rows after skipping `skip`.
    pub fn new(skip: usize, take: Option<usize>) -> Self {
        LimitSpec { skip, take }
    }
}

/// Which fields to include in result records.
///
/// The item id is always included. Distance is only meaningful on the knn
/// path; vector projection is likewise served from the vector phase (a `get`
/// never involves the vector segment, so its records carry no vector).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Projection {
    /// Include document text
    pub document: bool,
    /// Include the metadata map
    pub metadata: bool,
    /// Include the embedding vector (knn only)
    pub vector: bool,
    /// Include the distance to the query vector (knn only)
    pub distance: bool,
}

impl Default for Projection {
    fn default() -> Self {
        // Documents and metadata are what callers usually want back
        Projection {
            document: true,
            metadata: true,
            vector: false,
            distance: true,
        }
    }
}

impl Projection {
    /// Ids only.
    pub fn ids_only() -> Self {
        Projection {
            document: false,
            metadata: false,
            vector: false,
            distance: false,
        }
    }

    /// True if the metadata segment must be consulted to fill records.
    pub fn needs_hydration(&self) -> bool {
        self.document || self.metadata
    }
}

/// Count rows in a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountPlan {
    /// Scan target
    pub scan: ScanSpec,
}

/// Filtered retrieval from the metadata segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetPlan {
    /// Scan target
    pub scan: ScanSpec,
    /// Row restriction
    pub filter: FilterSpec,
    /// Pagination window
    pub limit: LimitSpec,
    /// Fields to include
    pub projection: Projection,
}

/// Nearest-neighbor search with optional pre-filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnnPlan {
    /// Scan target
    pub scan: ScanSpec,
    /// Pre-filter restricting the candidate set
    pub filter: FilterSpec,
    /// Search parameters
    pub knn: KnnSpec,
    /// Fields to include
    pub projection: Projection,
}

/// A query plan, one variant per execution-engine entry point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Plan {
    /// Row count
    Count(CountPlan),
    /// Filtered retrieval
    Get(GetPlan),
    /// Nearest-neighbor search
    Knn(KnnPlan),
}

impl Plan {
    /// The collection this plan targets.
    pub fn collection(&self) -> &CollectionId {
        match self {
            Plan::Count(p) => &p.scan.collection,
            Plan::Get(p) => &p.scan.collection,
            Plan::Knn(p) => &p.scan.collection,
        }
    }
}

/// One record of a query result. Fields beyond `id` are present only when the
/// plan's projection asked for them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Item id
    pub id: String,
    /// Document text, when projected
    pub document: Option<String>,
    /// Metadata map, when projected
    pub metadata: Option<Metadata>,
    /// Embedding vector, when projected (knn only)
    pub vector: Option<Vec<f32>>,
    /// Distance to the query vector (knn only)
    pub distance: Option<f32>,
}

impl Record {
    /// Bare record carrying only the id.
    pub fn with_id(id: impl Into<String>) -> Self {
        Record {
            id: id.into(),
            document: None,
            metadata: None,
            vector: None,
            distance: None,
        }
    }
}

/// Result of executing a [`Plan`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryOutput {
    /// Result of a Count plan
    Count(usize),
    /// Result of a Get plan
    Get(Vec<Record>),
    /// Result of a Knn plan: one record list per query vector
    Knn(Vec<Vec<Record>>),
}
