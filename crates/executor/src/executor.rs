//! Plan execution against storage segments.
//!
//! The engine is a stateless dispatcher: it holds a reference to the segment
//! directory and no state of its own, so it is `Send + Sync` and shared
//! freely across query threads.
//!
//! Execution order per plan kind:
//! - **count**: metadata segment row count, nothing else
//! - **get**: metadata segment filtered lookup + limit + projection
//! - **knn**: pre-filter (metadata) → vector search → hydration (metadata),
//!   failing atomically — either every query vector gets its full result
//!   list or the call errors

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use tessera_core::{
    CountPlan, GetPlan, KnnPlan, Plan, Projection, QueryOutput, Record, Result,
};
use tessera_segment::{Row, SegmentDirectory};

/// The execution engine — single entry point for queries.
pub struct ExecutionEngine {
    directory: Arc<SegmentDirectory>,
}

impl ExecutionEngine {
    /// Create an engine over a segment directory.
    pub fn new(directory: Arc<SegmentDirectory>) -> Self {
        ExecutionEngine { directory }
    }

    /// Execute any plan, dispatching on its kind.
    pub fn execute(&self, plan: &Plan) -> Result<QueryOutput> {
        match plan {
            Plan::Count(plan) => self.count(plan).map(QueryOutput::Count),
            Plan::Get(plan) => self.get(plan).map(QueryOutput::Get),
            Plan::Knn(plan) => self.knn(plan).map(QueryOutput::Knn),
        }
    }

    /// Row count of a collection. Delegates to the metadata segment; the
    /// vector segment is never involved.
    pub fn count(&self, plan: &CountPlan) -> Result<usize> {
        let metadata = self.directory.metadata(&plan.scan.collection)?;
        metadata.count()
    }

    /// Filtered retrieval. Resolves ids/predicates via the metadata segment,
    /// applies the limit window and projection; no vector segment
    /// involvement (so no vectors in the result records).
    pub fn get(&self, plan: &GetPlan) -> Result<Vec<Record>> {
        plan.filter.validate()?;

        let metadata = self.directory.metadata(&plan.scan.collection)?;
        let rows = metadata.get(
            plan.filter.ids.as_deref(),
            plan.filter.where_metadata.as_ref(),
            plan.filter.where_document.as_ref(),
            plan.limit.take,
            plan.limit.skip,
            plan.projection.metadata,
        )?;

        Ok(rows
            .into_iter()
            .map(|row| project_row(row, &plan.projection))
            .collect())
    }

    /// Nearest-neighbor search in three phases.
    ///
    /// 1. **Pre-filter**: when the plan has any id/metadata/document
    ///    constraint, resolve matching ids via the metadata segment. An
    ///    explicit empty result set short-circuits to empty per-query lists
    ///    without touching the vector index — that is a documented fast
    ///    path, not an error.
    /// 2. **Vector phase**: k-NN over the (possibly restricted) candidates.
    /// 3. **Hydration**: when the projection wants documents or metadata,
    ///    re-query the metadata segment for exactly the returned ids and
    ///    merge, preserving the vector phase's per-query ordering.
    pub fn knn(&self, plan: &KnnPlan) -> Result<Vec<Vec<Record>>> {
        plan.filter.validate()?;

        // Phase 1: pre-filter
        let allowed: Option<HashSet<String>> = if plan.filter.is_empty() {
            None
        } else {
            let metadata = self.directory.metadata(&plan.scan.collection)?;
            let rows = metadata.get(
                plan.filter.ids.as_deref(),
                plan.filter.where_metadata.as_ref(),
                plan.filter.where_document.as_ref(),
                None,
                0,
                false,
            )?;
            Some(rows.into_iter().map(|row| row.item_id).collect())
        };

        if let Some(allowed) = &allowed {
            if allowed.is_empty() {
                debug!(
                    collection = %plan.scan.collection,
                    "pre-filter matched nothing, skipping vector search"
                );
                return Ok(vec![Vec::new(); plan.knn.queries.len()]);
            }
        }

        // Phase 2: vector search
        let vector = self.directory.vector(&plan.scan.collection)?;
        let neighbor_lists = vector.query(&plan.knn.queries, plan.knn.k, allowed.as_ref())?;

        // Phase 3: hydration
        let mut rows_by_id: HashMap<String, Row> = HashMap::new();
        let mut vectors_by_id: HashMap<String, Vec<f32>> = HashMap::new();

        if plan.projection.needs_hydration() || plan.projection.vector {
            let ids: Vec<String> = neighbor_lists
                .iter()
                .flatten()
                .map(|(id, _)| id.clone())
                .collect::<HashSet<_>>()
                .into_iter()
                .collect();

            if plan.projection.needs_hydration() {
                let metadata = self.directory.metadata(&plan.scan.collection)?;
                let rows = metadata.get(Some(&ids), None, None, None, 0, plan.projection.metadata)?;
                rows_by_id = rows.into_iter().map(|row| (row.item_id.clone(), row)).collect();
            }
            if plan.projection.vector {
                vectors_by_id = vector.fetch(&ids)?;
            }
        }

        let results = neighbor_lists
            .into_iter()
            .map(|neighbors| {
                neighbors
                    .into_iter()
                    .map(|(id, distance)| {
                        let mut record = match rows_by_id.get(&id) {
                            Some(row) => project_row(row.clone(), &plan.projection),
                            None => Record::with_id(&id),
                        };
                        if plan.projection.distance {
                            record.distance = Some(distance);
                        }
                        if plan.projection.vector {
                            record.vector = vectors_by_id.get(&id).cloned();
                        }
                        record
                    })
                    .collect()
            })
            .collect();

        Ok(results)
    }
}

/// Reduce a metadata row to the projected fields.
fn project_row(row: Row, projection: &Projection) -> Record {
    Record {
        id: row.item_id,
        document: if projection.document { row.document } else { None },
        metadata: if projection.metadata { row.metadata } else { None },
        vector: None,
        distance: None,
    }
}
