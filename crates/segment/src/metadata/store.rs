//! The metadata segment: documents and structured metadata for one collection.
//!
//! Rows live in a BTreeMap keyed by an internal RowId assigned at first
//! insert. RowId order is the default (and only) result order, which makes
//! limit/offset pagination stable across repeated calls on unchanged data —
//! deliberately *not* "whatever order the map iterates in".
//!
//! Batches apply transactionally: mutations are staged against the current
//! state first, then committed in one pass under the write lock. The
//! checkpoint advances only with the commit.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use tessera_core::{
    CollectionId, DocumentPredicate, Error, LogRecord, Metadata, MetadataPredicate, Operation,
    Result, SegmentId, SeqId,
};

use crate::checkpoint::{read_snapshot, write_snapshot};
use crate::state::{ApplyStats, SegmentState};

const SNAPSHOT_MAGIC: [u8; 4] = *b"TSMS";
const SNAPSHOT_VERSION: u32 = 1;
const SNAPSHOT_FILE: &str = "metadata.snap";

/// Internal row identifier, ascending by first insertion.
pub type RowId = u64;

/// One stored row: an item's document and metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    /// Internal row id (stable result order)
    pub row_id: RowId,
    /// External item id
    pub item_id: String,
    /// Document text
    pub document: Option<String>,
    /// Metadata map
    pub metadata: Option<Metadata>,
}

/// Configuration of a metadata segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataSegmentConfig {
    /// Auto-flush after this many applied records (0 = manual flush only)
    pub flush_threshold: usize,
}

impl MetadataSegmentConfig {
    /// Default configuration: flush every 4096 records.
    pub fn new() -> Self {
        MetadataSegmentConfig {
            flush_threshold: 4096,
        }
    }

    /// Small thresholds for tests.
    pub fn for_testing() -> Self {
        MetadataSegmentConfig { flush_threshold: 8 }
    }

    /// Set the auto-flush threshold (0 disables auto-flush).
    pub fn with_flush_threshold(mut self, records: usize) -> Self {
        self.flush_threshold = records;
        self
    }
}

impl Default for MetadataSegmentConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize, Deserialize)]
struct MetadataSnapshot {
    next_row_id: u64,
    max_applied: u64,
    rows: Vec<Row>,
}

/// A staged mutation, resolved against pre-batch state.
enum StagedOp {
    Upsert(Row),
    Delete(RowId, String),
}

struct MetadataInner {
    state: SegmentState,
    config: MetadataSegmentConfig,
    rows: BTreeMap<RowId, Row>,
    by_item: HashMap<String, RowId>,
    next_row_id: u64,
    max_applied: SeqId,
    applied_since_flush: usize,
}

/// Metadata storage segment for one collection.
pub struct MetadataSegment {
    id: SegmentId,
    collection: CollectionId,
    dir: PathBuf,
    inner: RwLock<MetadataInner>,
}

impl MetadataSegment {
    /// Construct an uninitialized segment rooted at `dir`.
    pub fn new(
        collection: CollectionId,
        dir: impl Into<PathBuf>,
        config: MetadataSegmentConfig,
    ) -> Self {
        MetadataSegment {
            id: SegmentId::new(),
            collection,
            dir: dir.into(),
            inner: RwLock::new(MetadataInner {
                state: SegmentState::Uninitialized,
                config,
                rows: BTreeMap::new(),
                by_item: HashMap::new(),
                next_row_id: 1,
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
            rows = inner.rows.len(),
            max_applied = inner.max_applied.as_u64(),
            "metadata segment running"
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
    /// Mutations are staged first, then committed together; a failure before
    /// the commit leaves the segment at its previous checkpoint so the batch
    /// can be retried from the log.
    pub fn apply(&self, records: &[LogRecord]) -> Result<ApplyStats> {
        let mut inner = self.inner.write();
        if inner.state != SegmentState::Running {
            return Err(self.unavailable());
        }

        let mut stats = ApplyStats::default();
        let mut staged: Vec<StagedOp> = Vec::with_capacity(records.len());

        // Stage phase: resolve each record against current state plus what
        // the batch itself has staged so far
        let mut staged_rows: HashMap<String, Row> = HashMap::new();
        let mut staged_deletes: HashSet<String> = HashSet::new();
        let mut next_row_id = inner.next_row_id;

        for record in records {
            if record.seq_id <= inner.max_applied {
                stats.replayed += 1;
                continue;
            }

            let op = &record.record;
            let visible_row = if staged_deletes.contains(&op.item_id) {
                None
            } else {
                staged_rows
                    .get(&op.item_id)
                    .cloned()
                    .or_else(|| {
                        inner
                            .by_item
                            .get(&op.item_id)
                            .and_then(|row_id| inner.rows.get(row_id))
                            .cloned()
                    })
            };

            match (op.operation, visible_row) {
                (Operation::Delete, Some(row)) => {
                    staged_deletes.insert(op.item_id.clone());
                    staged_rows.remove(&op.item_id);
                    staged.push(StagedOp::Delete(row.row_id, op.item_id.clone()));
                    stats.applied += 1;
                }
                (Operation::Delete, None) => {
                    // Deleting an unknown id is a no-op, not an error
                    stats.applied += 1;
                }
                (Operation::Add, Some(_)) => {
                    warn!(
                        collection = %self.collection,
                        seq_id = record.seq_id.as_u64(),
                        item_id = %op.item_id,
                        "skipping add of existing item during metadata apply"
                    );
                    stats.failed += 1;
                }
                (Operation::Update, None) => {
                    warn!(
                        collection = %self.collection,
                        seq_id = record.seq_id.as_u64(),
                        item_id = %op.item_id,
                        "skipping update of unknown item during metadata apply"
                    );
                    stats.failed += 1;
                }
                (_, existing) => {
                    // Fields present on the record overwrite; absent fields
                    // are retained from the existing row
                    let row = match existing {
                        Some(mut row) => {
                            if op.document.is_some() {
                                row.document = op.document.clone();
                            }
                            if op.metadata.is_some() {
                                row.metadata = op.metadata.clone();
                            }
                            row
                        }
                        None => {
                            let row = Row {
                                row_id: next_row_id,
                                item_id: op.item_id.clone(),
                                document: op.document.clone(),
                                metadata: op.metadata.clone(),
                            };
                            next_row_id += 1;
                            row
                        }
                    };
                    staged_deletes.remove(&op.item_id);
                    staged_rows.insert(op.item_id.clone(), row.clone());
                    staged.push(StagedOp::Upsert(row));
                    stats.applied += 1;
                }
            }
        }

        // Commit phase: all staged mutations land together
        for op in staged {
            match op {
                StagedOp::Upsert(row) => {
                    inner.by_item.insert(row.item_id.clone(), row.row_id);
                    inner.rows.insert(row.row_id, row);
                }
                StagedOp::Delete(row_id, item_id) => {
                    inner.rows.remove(&row_id);
                    inner.by_item.remove(&item_id);
                }
            }
        }
        inner.next_row_id = next_row_id;
        if let Some(last) = records.last() {
            if last.seq_id > inner.max_applied {
                inner.max_applied = last.seq_id;
            }
        }
        inner.applied_since_flush += stats.applied + stats.failed;

        if inner.config.flush_threshold > 0
            && inner.applied_since_flush >= inner.config.flush_threshold
        {
            self.flush_locked(&mut inner)?;
        }

        Ok(stats)
    }

    /// Filtered lookup.
    ///
    /// All supplied filters combine with logical AND. Results come back in
    /// RowId order; `offset`/`limit` window that order, so pagination is
    /// stable on unchanged data. Unknown ids and predicates over absent keys
    /// are non-matching, not errors. `include_metadata = false` strips the
    /// metadata maps from the result.
    #[allow(clippy::too_many_arguments)]
    pub fn get(
        &self,
        ids: Option<&[String]>,
        where_metadata: Option<&MetadataPredicate>,
        where_document: Option<&DocumentPredicate>,
        limit: Option<usize>,
        offset: usize,
        include_metadata: bool,
    ) -> Result<Vec<Row>> {
        let inner = self.inner.read();
        if inner.state != SegmentState::Running {
            return Err(self.unavailable());
        }

        let id_set: Option<HashSet<&str>> =
            ids.map(|ids| ids.iter().map(|s| s.as_str()).collect());

        let mut out = Vec::new();
        let mut matched = 0usize;

        for row in inner.rows.values() {
            if let Some(id_set) = &id_set {
                if !id_set.contains(row.item_id.as_str()) {
                    continue;
                }
            }
            if let Some(predicate) = where_metadata {
                if !predicate.matches(row.metadata.as_ref()) {
                    continue;
                }
            }
            if let Some(predicate) = where_document {
                if !predicate.matches(row.document.as_deref()) {
                    continue;
                }
            }

            matched += 1;
            if matched <= offset {
                continue;
            }
            if let Some(limit) = limit {
                if out.len() >= limit {
                    break;
                }
            }

            let mut row = row.clone();
            if !include_metadata {
                row.metadata = None;
            }
            out.push(row);
        }

        Ok(out)
    }

    /// Number of rows in the segment.
    pub fn count(&self) -> Result<usize> {
        let inner = self.inner.read();
        if inner.state != SegmentState::Running {
            return Err(self.unavailable());
        }
        Ok(inner.rows.len())
    }

    /// Write the snapshot now, regardless of the auto-flush threshold.
    pub fn flush(&self) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.state != SegmentState::Running {
            return Err(self.unavailable());
        }
        self.flush_locked(&mut inner)
    }

    fn flush_locked(&self, inner: &mut MetadataInner) -> Result<()> {
        let snapshot = MetadataSnapshot {
            next_row_id: inner.next_row_id,
            max_applied: inner.max_applied.as_u64(),
            rows: inner.rows.values().cloned().collect(),
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
            rows = inner.rows.len(),
            "metadata segment flushed"
        );
        Ok(())
    }

    fn load_locked(&self, inner: &mut MetadataInner) -> Result<()> {
        let snapshot: Option<MetadataSnapshot> = read_snapshot(
            &self.dir.join(SNAPSHOT_FILE),
            SNAPSHOT_MAGIC,
            SNAPSHOT_VERSION,
        )?;

        if let Some(snapshot) = snapshot {
            inner.rows.clear();
            inner.by_item.clear();
            for row in snapshot.rows {
                inner.by_item.insert(row.item_id.clone(), row.row_id);
                inner.rows.insert(row.row_id, row);
            }
            inner.next_row_id = snapshot.next_row_id;
            inner.max_applied = SeqId::new(snapshot.max_applied);

            info!(
                collection = %self.collection,
                rows = inner.rows.len(),
                max_applied = inner.max_applied.as_u64(),
                "metadata segment loaded from snapshot"
            );
        }

        inner.state = SegmentState::Loaded;
        Ok(())
    }

    fn unavailable(&self) -> Error {
        Error::SegmentUnavailable {
            collection: self.collection.clone(),
            kind: "metadata".to_string(),
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

    /// Current lifecycle state.
    pub fn state(&self) -> SegmentState {
        self.inner.read().state
    }
}
