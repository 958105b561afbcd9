//! Tessera — embedded segment-based vector and metadata storage engine.
//!
//! Writes flow through an ordered, durable ingestion log; per-collection
//! storage segments (vector + metadata) subscribe to the log and apply
//! records in SeqId order; queries compile to plans executed against the
//! segments.
//!
//! ```text
//! writes ─▶ IngestionLog ─▶ subscriptions ─▶ VectorSegment
//!                                        └─▶ MetadataSegment
//! query  ─▶ Plan ─▶ ExecutionEngine ─▶ SegmentDirectory ─▶ segments
//! ```
//!
//! [`Engine`] wires the pieces together for embedded use:
//!
//! ```no_run
//! use std::sync::Arc;
//! use tessera::{Engine, EngineConfig, InMemoryCatalog, OperationRecord, SegmentSpecs};
//!
//! # fn main() -> tessera::Result<()> {
//! let catalog = Arc::new(InMemoryCatalog::with_default(SegmentSpecs::default()));
//! let engine = Engine::open("/tmp/tessera-data", catalog, EngineConfig::default())?;
//!
//! let collection = "docs".into();
//! engine.submit_embeddings(
//!     &collection,
//!     vec![OperationRecord::upsert("a", vec![1.0, 0.0])],
//! )?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use tracing::error;

pub use tessera_core::{
    CollectionId, CountPlan, DocumentPredicate, Error, FilterSpec, GetPlan, Item, KnnPlan,
    KnnSpec, LimitSpec, LogRecord, Metadata, MetadataPredicate, MetadataValue, Operation,
    OperationRecord, Plan, Projection, QueryOutput, Record, Result, ScanSpec, SegmentId,
    SegmentKind, SeqId,
};
pub use tessera_executor::ExecutionEngine;
pub use tessera_log::{IngestionLog, LogConfig, LogCounters, SubscriptionId};
pub use tessera_segment::{
    ApplyStats, Catalog, DistanceMetric, InMemoryCatalog, IndexBackendKind, MetadataSegment,
    MetadataSegmentConfig, Row, SegmentDirectory, SegmentSpecs, SegmentState, VectorSegment,
    VectorSegmentConfig,
};

/// Engine configuration.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Ingestion log configuration
    pub log: LogConfig,
}

impl EngineConfig {
    /// Small limits for tests.
    pub fn for_testing() -> Self {
        EngineConfig {
            log: LogConfig::for_testing(),
        }
    }
}

/// Watermark pair tracking how far each segment kind has applied the log.
///
/// Subscription handlers bump their side after every applied batch; callers
/// that need read-your-writes block on [`wait_for`](ApplyGate::wait_for).
struct ApplyGate {
    applied: Mutex<(u64, u64)>,
    ready: Condvar,
}

impl ApplyGate {
    fn new(vector: SeqId, metadata: SeqId) -> Self {
        ApplyGate {
            applied: Mutex::new((vector.as_u64(), metadata.as_u64())),
            ready: Condvar::new(),
        }
    }

    fn advance_vector(&self, seq: SeqId) {
        let mut applied = self.applied.lock();
        applied.0 = applied.0.max(seq.as_u64());
        self.ready.notify_all();
    }

    fn advance_metadata(&self, seq: SeqId) {
        let mut applied = self.applied.lock();
        applied.1 = applied.1.max(seq.as_u64());
        self.ready.notify_all();
    }

    fn wait_for(&self, seq: SeqId, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut applied = self.applied.lock();
        while applied.0 < seq.as_u64() || applied.1 < seq.as_u64() {
            let remaining = match deadline.checked_duration_since(Instant::now()) {
                Some(remaining) => remaining,
                None => return false,
            };
            if self.ready.wait_for(&mut applied, remaining).timed_out() {
                return false;
            }
        }
        true
    }
}

struct Attachment {
    gate: Arc<ApplyGate>,
    subscriptions: Vec<SubscriptionId>,
}

/// The embedded engine: ingestion log + segment directory + executor.
pub struct Engine {
    log: Arc<IngestionLog>,
    directory: Arc<SegmentDirectory>,
    executor: ExecutionEngine,
    attachments: DashMap<CollectionId, Attachment>,
}

impl Engine {
    /// Open (or create) an engine rooted at `data_dir`.
    pub fn open(
        data_dir: impl Into<PathBuf>,
        catalog: Arc<dyn Catalog>,
        config: EngineConfig,
    ) -> Result<Self> {
        let data_dir = data_dir.into();
        let log = Arc::new(IngestionLog::open(data_dir.join("log"), config.log)?);
        let directory = Arc::new(SegmentDirectory::new(data_dir.join("segments"), catalog));
        let executor = ExecutionEngine::new(directory.clone());

        Ok(Engine {
            log,
            directory,
            executor,
            attachments: DashMap::new(),
        })
    }

    /// Submit a batch of operation records — the only mutation entry point.
    ///
    /// Returns one SeqId per record, in submission order. On return the batch
    /// is durable and handed to the collection's segments; segment
    /// application is asynchronous (see [`sync`](Self::sync)).
    pub fn submit_embeddings(
        &self,
        collection: &CollectionId,
        records: Vec<OperationRecord>,
    ) -> Result<Vec<SeqId>> {
        self.attach(collection)?;
        self.log.submit(collection, records)
    }

    /// Execute a query plan.
    pub fn execute(&self, plan: &Plan) -> Result<QueryOutput> {
        self.attach(plan.collection())?;
        self.executor.execute(plan)
    }

    /// Block until both segments have applied everything submitted so far.
    ///
    /// Returns false on timeout.
    pub fn sync(&self, collection: &CollectionId, timeout: Duration) -> Result<bool> {
        let target = self.log.last_seq_id(collection)?;
        if target.as_u64() == 0 {
            return Ok(true);
        }
        let gate = self.attach(collection)?;
        Ok(gate.wait_for(target, timeout))
    }

    /// Flush every live segment's snapshot.
    pub fn flush_all(&self) -> Result<()> {
        self.directory.flush_all()
    }

    /// Delete a collection: segments, durable snapshots and log.
    pub fn drop_collection(&self, collection: &CollectionId) -> Result<()> {
        if let Some((_, attachment)) = self.attachments.remove(collection) {
            for id in attachment.subscriptions {
                self.log.unsubscribe(id);
            }
        }
        self.directory.drop_collection(collection)?;
        self.log.drop_collection(collection)
    }

    /// Direct access to the segment directory (for inspection and tests).
    pub fn directory(&self) -> &Arc<SegmentDirectory> {
        &self.directory
    }

    /// Cumulative log counters for a collection.
    pub fn log_counters(&self, collection: &CollectionId) -> Result<LogCounters> {
        self.log.counters(collection)
    }

    /// Ensure the collection's segments exist and are subscribed to the log.
    ///
    /// Each segment resumes from its own persisted checkpoint: the
    /// subscription starts at `applied_seq_id`, so replay after a restart
    /// fills exactly the gap between snapshot and log, no duplicates.
    fn attach(&self, collection: &CollectionId) -> Result<Arc<ApplyGate>> {
        if let Some(attachment) = self.attachments.get(collection) {
            return Ok(attachment.gate.clone());
        }

        match self.attachments.entry(collection.clone()) {
            Entry::Occupied(entry) => Ok(entry.get().gate.clone()),
            Entry::Vacant(entry) => {
                let vector = self.directory.vector(collection)?;
                let metadata = self.directory.metadata(collection)?;

                let gate = Arc::new(ApplyGate::new(
                    vector.applied_seq_id(),
                    metadata.applied_seq_id(),
                ));

                let vector_sub = {
                    let segment = vector.clone();
                    let gate = gate.clone();
                    let name = collection.clone();
                    self.log.subscribe(
                        collection,
                        Some(segment.applied_seq_id()),
                        None,
                        Box::new(move |batch: Vec<LogRecord>| {
                            if let Err(e) = segment.apply(&batch) {
                                error!(
                                    collection = %name,
                                    error = %e,
                                    "vector segment apply failed; batch will be retried from the log"
                                );
                                return;
                            }
                            gate.advance_vector(segment.applied_seq_id());
                        }),
                    )?
                };

                let metadata_sub = {
                    let segment = metadata.clone();
                    let gate = gate.clone();
                    let name = collection.clone();
                    self.log.subscribe(
                        collection,
                        Some(segment.applied_seq_id()),
                        None,
                        Box::new(move |batch: Vec<LogRecord>| {
                            if let Err(e) = segment.apply(&batch) {
                                error!(
                                    collection = %name,
                                    error = %e,
                                    "metadata segment apply failed; batch will be retried from the log"
                                );
                                return;
                            }
                            gate.advance_metadata(segment.applied_seq_id());
                        }),
                    )?
                };

                entry.insert(Attachment {
                    gate: gate.clone(),
                    subscriptions: vec![vector_sub, metadata_sub],
                });
                Ok(gate)
            }
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        for attachment in self.attachments.iter() {
            for id in &attachment.value().subscriptions {
                self.log.unsubscribe(*id);
            }
        }
        if let Err(e) = self.directory.flush_all() {
            error!(error = %e, "flush on engine shutdown failed");
        }
    }
}
