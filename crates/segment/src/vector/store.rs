//! The vector segment: embeddings + nearest-neighbor index for one collection.
//!
//! Owns the mapping between external item ids and the internal integer labels
//! the index backend works with, enforces the collection's vector dimension,
//! and persists a snapshot whose max-applied SeqId is co-located with the
//! data (the checkpoint can never run ahead of the vectors it describes).
//!
//! # Concurrency
//!
//! One RwLock guards the whole segment: queries take it shared, apply/flush
//! take it exclusive. Writes are single-writer; queries run concurrently with
//! each other and block only for the duration of an apply.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use tessera_core::{CollectionId, Error, LogRecord, Operation, Result, SegmentId, SeqId};

use crate::checkpoint::{read_snapshot, write_snapshot};
use crate::state::{ApplyStats, SegmentState};
use crate::vector::backend::{IndexBackendKind, Label, VectorIndexBackend};
use crate::vector::distance::DistanceMetric;

const SNAPSHOT_MAGIC: [u8; 4] = *b"TSVS";
const SNAPSHOT_VERSION: u32 = 1;
const SNAPSHOT_FILE: &str = "vector.snap";

/// Configuration of a vector segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorSegmentConfig {
    /// Vector dimension. None = established by the first applied vector.
    pub dimension: Option<usize>,

    /// Distance metric
    pub metric: DistanceMetric,

    /// Index backend implementation
    pub backend: IndexBackendKind,

    /// Auto-flush after this many applied records (0 = manual flush only)
    pub flush_threshold: usize,
}

impl VectorSegmentConfig {
    /// Default configuration: L2, exact index, flush every 4096 records.
    pub fn new() -> Self {
        VectorSegmentConfig {
            dimension: None,
            metric: DistanceMetric::L2,
            backend: IndexBackendKind::Exact,
            flush_threshold: 4096,
        }
    }

    /// Small thresholds for tests.
    pub fn for_testing() -> Self {
        VectorSegmentConfig {
            dimension: None,
            metric: DistanceMetric::L2,
            backend: IndexBackendKind::Exact,
            flush_threshold: 8,
        }
    }

    /// Fix the vector dimension up front.
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = Some(dimension);
        self
    }

    /// Set the distance metric.
    pub fn with_metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = metric;
        self
    }

    /// Set the auto-flush threshold (0 disables auto-flush).
    pub fn with_flush_threshold(mut self, records: usize) -> Self {
        self.flush_threshold = records;
        self
    }
}

impl Default for VectorSegmentConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Durable snapshot payload. The max-applied SeqId lives inside the payload,
/// so data and checkpoint are atomic by construction.
#[derive(Serialize, Deserialize)]
struct VectorSnapshot {
    dimension: Option<usize>,
    next_label: u64,
    max_applied: u64,
    /// (label, item id, vector) triples in label order
    entries: Vec<(Label, String, Vec<f32>)>,
}

struct VectorInner {
    state: SegmentState,
    config: VectorSegmentConfig,
    dimension: Option<usize>,
    backend: Box<dyn VectorIndexBackend>,
    id_to_label: HashMap<String, Label>,
    label_to_id: HashMap<Label, String>,
    next_label: u64,
    max_applied: SeqId,
    applied_since_flush: usize,
}

/// Vector storage segment for one collection.
pub struct VectorSegment {
    id: SegmentId,
    collection: CollectionId,
    dir: PathBuf,
    inner: RwLock<VectorInner>,
}

impl VectorSegment {
    /// Construct an uninitialized segment rooted at `dir`.
    pub fn new(collection: CollectionId, dir: impl Into<PathBuf>, config: VectorSegmentConfig) -> Self {
        let backend = config.backend.create(config.metric);
        VectorSegment {
            id: SegmentId::new(),
            collection,
            dir: dir.into(),
            inner: RwLock::new(VectorInner {
                state: SegmentState::Uninitialized,
                dimension: config.dimension,
                backend,
                config,
                id_to_label: HashMap::new(),
                label_to_id: HashMap::new(),
                next_label: 1,
                max_applied: SeqId::new(0),
                applied_since_flush: 0,
            }),
        }
    }

    /// Load durable state (if any) and transition to Running.
    pub fn start(&self) -> Result<()> {
        let mut inner = self.inner.write();
        match inner.state {
            SegmentState::Uninitialized => {
                self.load_locked(&mut inner)?;
                inner.state = SegmentState::Running;
            }
            SegmentState::Loaded => inner.state = SegmentState::Running,
            SegmentState::Running => {}
            SegmentState::Stopped => {
                return Err(Error::InvalidOperation(
                    "cannot start a stopped segment".to_string(),
                ))
            }
        }
        info!(
            collection = %self.collection,
            segment = %self.id,
            vectors = inner.backend.len(),
            max_applied = inner.max_applied.as_u64(),
            "vector segment running"
        );
        Ok(())
    }

    /// Flush pending state and release the segment.
    pub fn stop(&self) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.state == SegmentState::Running {
            self.flush_locked(&mut inner)?;
        }
        inner.state = SegmentState::Stopped;
        Ok(())
    }

    /// Apply a batch of log records in SeqId order.
    ///
    /// Record-level failures (dimension mismatch, Add of an existing id,
    /// Update of a missing id) are logged and skipped; the rest of the batch
    /// still applies. Records at or below the current checkpoint are replay
    /// duplicates and are ignored, which makes re-application idempotent.
    pub fn apply(&self, records: &[LogRecord]) -> Result<ApplyStats> {
        let mut inner = self.inner.write();
        if inner.state != SegmentState::Running {
            return Err(self.unavailable());
        }

        let mut stats = ApplyStats::default();

        for record in records {
            if record.seq_id <= inner.max_applied {
                stats.replayed += 1;
                continue;
            }

            match self.apply_one(&mut inner, record) {
                Ok(()) => stats.applied += 1,
                Err(e) => {
                    warn!(
                        collection = %self.collection,
                        seq_id = record.seq_id.as_u64(),
                        item_id = %record.record.item_id,
                        error = %e,
                        "skipping record during vector apply"
                    );
                    stats.failed += 1;
                }
            }

            // The checkpoint advances past poison records too: they will
            // never become applicable on replay.
            inner.max_applied = record.seq_id;
            inner.applied_since_flush += 1;
        }

        if inner.config.flush_threshold > 0
            && inner.applied_since_flush >= inner.config.flush_threshold
        {
            self.flush_locked(&mut inner)?;
        }

        Ok(stats)
    }

    fn apply_one(&self, inner: &mut VectorInner, record: &LogRecord) -> Result<()> {
        let op = &record.record;

        if op.operation == Operation::Delete {
            if let Some(label) = inner.id_to_label.remove(&op.item_id) {
                inner.label_to_id.remove(&label);
                inner.backend.remove(label);
            }
            return Ok(());
        }

        // Add/Update/Upsert without a vector carry nothing for this segment
        // (e.g. a metadata-only update)
        let Some(vector) = &op.vector else {
            return Ok(());
        };

        // Dimension is established by the first vector and enforced forever
        match inner.dimension {
            Some(expected) if vector.len() != expected => {
                return Err(Error::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                });
            }
            Some(_) => {}
            None => inner.dimension = Some(vector.len()),
        }

        let existing = inner.id_to_label.get(&op.item_id).copied();
        let label = match (op.operation, existing) {
            (Operation::Add, Some(_)) => {
                return Err(Error::InvalidRecord(format!(
                    "add of existing item '{}'",
                    op.item_id
                )));
            }
            (Operation::Update, None) => {
                return Err(Error::InvalidRecord(format!(
                    "update of unknown item '{}'",
                    op.item_id
                )));
            }
            (_, Some(label)) => label,
            (_, None) => {
                let label = inner.next_label;
                inner.next_label += 1;
                inner.id_to_label.insert(op.item_id.clone(), label);
                inner.label_to_id.insert(label, op.item_id.clone());
                label
            }
        };

        inner.backend.upsert(label, vector);
        Ok(())
    }

    /// Nearest neighbors for each query vector.
    ///
    /// `allowed_ids = None` means no restriction; `Some(empty)` means no
    /// candidates, yielding an empty result list per query. Each result list
    /// is at most `k` long, sorted by distance ascending with ties broken by
    /// item id ascending. Deleted ids never appear.
    pub fn query(
        &self,
        queries: &[Vec<f32>],
        k: usize,
        allowed_ids: Option<&HashSet<String>>,
    ) -> Result<Vec<Vec<(String, f32)>>> {
        let inner = self.inner.read();
        if inner.state != SegmentState::Running {
            return Err(self.unavailable());
        }

        // Nothing applied yet: every query has zero candidates
        let Some(dimension) = inner.dimension else {
            return Ok(vec![Vec::new(); queries.len()]);
        };

        for query in queries {
            if query.len() != dimension {
                return Err(Error::DimensionMismatch {
                    expected: dimension,
                    actual: query.len(),
                });
            }
        }

        // Translate the external allow-list into labels; unknown ids simply
        // contribute no candidates
        let allowed_labels: Option<HashSet<Label>> = allowed_ids.map(|ids| {
            ids.iter()
                .filter_map(|id| inner.id_to_label.get(id).copied())
                .collect()
        });

        let mut out = Vec::with_capacity(queries.len());
        for query in queries {
            if let Some(labels) = &allowed_labels {
                if labels.is_empty() {
                    out.push(Vec::new());
                    continue;
                }
            }

            let hits = inner.backend.search(query, k, allowed_labels.as_ref());

            // Map labels back to ids and re-break distance ties by item id.
            // The backend includes boundary ties, so no candidate is lost.
            let mut mapped: Vec<(String, f32)> = hits
                .into_iter()
                .filter_map(|(label, dist)| {
                    inner.label_to_id.get(&label).map(|id| (id.clone(), dist))
                })
                .collect();

            mapped.sort_by(|(id_a, dist_a), (id_b, dist_b)| {
                dist_a
                    .partial_cmp(dist_b)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| id_a.cmp(id_b))
            });
            mapped.truncate(k);

            out.push(mapped);
        }

        Ok(out)
    }

    /// Fetch stored vectors for the given ids (for result hydration).
    /// Unknown ids are absent from the result.
    pub fn fetch(&self, ids: &[String]) -> Result<HashMap<String, Vec<f32>>> {
        let inner = self.inner.read();
        if inner.state != SegmentState::Running {
            return Err(self.unavailable());
        }

        let mut out = HashMap::with_capacity(ids.len());
        for id in ids {
            if let Some(label) = inner.id_to_label.get(id) {
                if let Some(vector) = inner.backend.get(*label) {
                    out.insert(id.clone(), vector.to_vec());
                }
            }
        }
        Ok(out)
    }

    /// Write the snapshot now, regardless of the auto-flush threshold.
    pub fn flush(&self) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.state != SegmentState::Running {
            return Err(self.unavailable());
        }
        self.flush_locked(&mut inner)
    }

    fn flush_locked(&self, inner: &mut VectorInner) -> Result<()> {
        let entries: Vec<(Label, String, Vec<f32>)> = inner
            .backend
            .labels()
            .into_iter()
            .filter_map(|label| {
                let id = inner.label_to_id.get(&label)?.clone();
                let vector = inner.backend.get(label)?.to_vec();
                Some((label, id, vector))
            })
            .collect();

        let snapshot = VectorSnapshot {
            dimension: inner.dimension,
            next_label: inner.next_label,
            max_applied: inner.max_applied.as_u64(),
            entries,
        };

        write_snapshot(
            &self.dir.join(SNAPSHOT_FILE),
            SNAPSHOT_MAGIC,
            SNAPSHOT_VERSION,
            &snapshot,
        )?;
        inner.applied_since_flush = 0;

        debug!(
            collection = %self.collection,
            max_applied = inner.max_applied.as_u64(),
            vectors = inner.backend.len(),
            "vector segment flushed"
        );
        Ok(())
    }

    fn load_locked(&self, inner: &mut VectorInner) -> Result<()> {
        let snapshot: Option<VectorSnapshot> = read_snapshot(
            &self.dir.join(SNAPSHOT_FILE),
            SNAPSHOT_MAGIC,
            SNAPSHOT_VERSION,
        )?;

        if let Some(snapshot) = snapshot {
            let mut backend = inner.config.backend.create(inner.config.metric);
            inner.id_to_label.clear();
            inner.label_to_id.clear();

            for (label, id, vector) in snapshot.entries {
                backend.upsert(label, &vector);
                inner.id_to_label.insert(id.clone(), label);
                inner.label_to_id.insert(label, id);
            }

            inner.backend = backend;
            inner.dimension = snapshot.dimension;
            inner.next_label = snapshot.next_label;
            inner.max_applied = SeqId::new(snapshot.max_applied);

            info!(
                collection = %self.collection,
                vectors = inner.backend.len(),
                max_applied = inner.max_applied.as_u64(),
                "vector segment loaded from snapshot"
            );
        }

        inner.state = SegmentState::Loaded;
        Ok(())
    }

    fn unavailable(&self) -> Error {
        Error::SegmentUnavailable {
            collection: self.collection.clone(),
            kind: "vector".to_string(),
        }
    }

    /// Segment id.
    pub fn id(&self) -> SegmentId {
        self.id
    }

    /// Owning collection.
    pub fn collection(&self) -> &CollectionId {
        &self.collection
    }

    /// Highest applied SeqId.
    pub fn applied_seq_id(&self) -> SeqId {
        self.inner.read().max_applied
    }

    /// Number of live vectors.
    pub fn len(&self) -> usize {
        self.inner.read().backend.len()
    }

    /// True when the segment holds no vectors.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Established vector dimension, if any vector has been applied.
    pub fn dimension(&self) -> Option<usize> {
        self.inner.read().dimension
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SegmentState {
        self.inner.read().state
    }
}
