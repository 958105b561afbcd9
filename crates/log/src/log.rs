//! The ingestion log: ordered durable write path plus subscription fan-out.
//!
//! One [`IngestionLog`] serves every collection in the engine. Each
//! collection gets its own log directory, its own SeqId counter and its own
//! subscriber list; collections are fully independent and carry no
//! cross-collection ordering guarantee.
//!
//! # Delivery model
//!
//! Each subscription owns a bounded channel and a dedicated drain thread.
//! `submit` appends durably, then pushes the new batch into every live
//! subscription's channel before returning; the subscriber's handler runs on
//! the drain thread, in SeqId order, exactly once per record. A full channel
//! makes the producer wait (bounded), never drop.
//!
//! Replay on subscribe happens under the same per-collection lock that
//! `submit` takes, so a subscriber observes a gapless, duplicate-free
//! sequence: first the durable backlog, then every batch appended after
//! registration.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use tessera_core::{CollectionId, Error, LogRecord, OperationRecord, Result, SeqId};

use crate::config::LogConfig;
use crate::reader::LogReader;
use crate::writer::{LogCounters, LogWriter};

/// Identifier of a live subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Get the underlying u64 value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Handler invoked on the subscription's drain thread for each batch.
pub type BatchHandler = Box<dyn FnMut(Vec<LogRecord>) + Send + 'static>;

struct LiveSubscription {
    id: SubscriptionId,
    sender: SyncSender<Vec<LogRecord>>,
    /// Records at or below this SeqId are never delivered (replay covered
    /// them, or the subscriber asked to start past them)
    floor: SeqId,
    end: Option<SeqId>,
    cancelled: Arc<AtomicBool>,
}

struct CollectionLogState {
    writer: LogWriter,
    /// Next SeqId to assign
    next_seq: u64,
    subscriptions: Vec<LiveSubscription>,
}

impl CollectionLogState {
    /// Highest assigned SeqId (0 when the log is empty).
    fn last_seq(&self) -> SeqId {
        SeqId::new(self.next_seq - 1)
    }
}

/// Decrements the in-flight counter when a submission finishes.
struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Ordered, durable ingestion log with per-subscription delivery channels.
pub struct IngestionLog {
    root: PathBuf,
    config: LogConfig,
    collections: DashMap<CollectionId, Arc<Mutex<CollectionLogState>>>,
    subscription_index: DashMap<SubscriptionId, (CollectionId, Arc<AtomicBool>)>,
    in_flight: AtomicUsize,
    next_subscription_id: AtomicU64,
}

impl IngestionLog {
    /// Open (or create) the log rooted at the given directory.
    pub fn open(root: impl Into<PathBuf>, config: LogConfig) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;

        Ok(IngestionLog {
            root,
            config,
            collections: DashMap::new(),
            subscription_index: DashMap::new(),
            in_flight: AtomicUsize::new(0),
            next_subscription_id: AtomicU64::new(1),
        })
    }

    /// Submit a batch of operation records for a collection.
    ///
    /// On success every record is durably appended, assigned a strictly
    /// increasing SeqId in submission order, and handed to every live
    /// subscription before this call returns. The call does not wait for
    /// segments to finish *applying* the batch.
    pub fn submit(
        &self,
        collection: &CollectionId,
        records: Vec<OperationRecord>,
    ) -> Result<Vec<SeqId>> {
        if records.is_empty() {
            return Err(Error::EmptyBatch);
        }
        if records.len() > self.config.max_batch_size {
            return Err(Error::BatchTooLarge {
                size: records.len(),
                max: self.config.max_batch_size,
            });
        }
        for record in &records {
            if record.item_id.is_empty() {
                return Err(Error::InvalidRecord("empty item id".to_string()));
            }
        }

        // Admission control: reject rather than queue unbounded
        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst);
        let _guard = InFlightGuard(&self.in_flight);
        if in_flight >= self.config.max_in_flight {
            return Err(Error::Overloaded {
                in_flight: in_flight + 1,
                max: self.config.max_in_flight,
            });
        }

        let state = self.state(collection)?;
        let mut state = state.lock();

        // Assign SeqIds in submission order and append durably
        let batch: Vec<LogRecord> = records
            .into_iter()
            .enumerate()
            .map(|(i, record)| LogRecord::new(SeqId::new(state.next_seq + i as u64), record))
            .collect();

        state.writer.append_batch(&batch)?;
        state.next_seq += batch.len() as u64;

        let seq_ids: Vec<SeqId> = batch.iter().map(|r| r.seq_id).collect();
        let last_seq = *seq_ids.last().expect("batch is non-empty");

        // Fan out to live subscriptions. Delivery into the channel is
        // synchronous; the handler itself runs on the drain thread.
        state.subscriptions.retain_mut(|sub| {
            if sub.cancelled.load(Ordering::Acquire) {
                return false;
            }

            let slice: Vec<LogRecord> = batch
                .iter()
                .filter(|r| r.seq_id > sub.floor && sub.end.map_or(true, |end| r.seq_id <= end))
                .cloned()
                .collect();

            if !slice.is_empty() && sub.sender.send(slice).is_err() {
                debug!(subscription = sub.id.as_u64(), "dropping disconnected subscription");
                return false;
            }

            // Bounded subscription finished once its end bound is reached
            match sub.end {
                Some(end) if last_seq >= end => false,
                _ => true,
            }
        });

        Ok(seq_ids)
    }

    /// Subscribe to a collection's records.
    ///
    /// First replays already-durable records with SeqId in `(start, end]` in
    /// order, then keeps delivering newly appended records until `end` is
    /// reached or [`unsubscribe`](Self::unsubscribe) is called. The handler
    /// runs on a dedicated drain thread, one batch at a time, in order.
    pub fn subscribe(
        &self,
        collection: &CollectionId,
        start: Option<SeqId>,
        end: Option<SeqId>,
        mut handler: BatchHandler,
    ) -> Result<SubscriptionId> {
        let id = SubscriptionId(self.next_subscription_id.fetch_add(1, Ordering::SeqCst));
        let cancelled = Arc::new(AtomicBool::new(false));

        let (sender, receiver): (SyncSender<Vec<LogRecord>>, Receiver<Vec<LogRecord>>) =
            sync_channel(self.config.channel_capacity);

        // Drain thread: delivers batches to the handler in channel order.
        // Checking the cancel flag here means unsubscribe takes effect before
        // the next batch delivery even if batches are already queued.
        let thread_cancelled = cancelled.clone();
        std::thread::Builder::new()
            .name(format!("tessera-log-sub-{}", id.as_u64()))
            .spawn(move || {
                while let Ok(batch) = receiver.recv() {
                    if thread_cancelled.load(Ordering::Acquire) {
                        break;
                    }
                    handler(batch);
                }
            })
            .map_err(Error::StorageIo)?;

        let state = self.state(collection)?;
        let mut state = state.lock();

        // Replay the durable backlog while holding the collection lock, so
        // live appends cannot interleave with it.
        let backlog = LogReader::new(state.writer.dir()).replay(start, end)?;
        let backlog_done = backlog.last().map(|r| r.seq_id);

        for chunk in backlog.chunks(self.config.replay_chunk.max(1)) {
            sender
                .send(chunk.to_vec())
                .map_err(|_| Error::InvalidOperation("subscription closed during replay".into()))?;
        }

        let finished = match (end, backlog_done) {
            (Some(end), Some(done)) => done >= end,
            _ => false,
        };

        if !finished {
            state.subscriptions.push(LiveSubscription {
                id,
                sender,
                floor: backlog_done.or(start).unwrap_or(SeqId::new(0)),
                end,
                cancelled: cancelled.clone(),
            });
        }
        // A finished subscription never registers: dropping its sender here
        // lets the drain thread exit after the queued backlog.

        self.subscription_index
            .insert(id, (collection.clone(), cancelled));

        info!(
            collection = %collection,
            subscription = id.as_u64(),
            replayed = backlog.len(),
            "subscription registered"
        );

        Ok(id)
    }

    /// Cancel a subscription. Unknown ids are a no-op, not an error.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let Some((_, (collection, cancelled))) = self.subscription_index.remove(&id) else {
            return;
        };

        cancelled.store(true, Ordering::Release);

        if let Some(state) = self.collections.get(&collection) {
            let mut state = state.lock();
            state.subscriptions.retain(|sub| sub.id != id);
        }
    }

    /// Drop a collection's log: close the writer, disconnect its
    /// subscriptions and delete the durable segment files.
    pub fn drop_collection(&self, collection: &CollectionId) -> Result<()> {
        // Removing the state drops the writer and every subscription sender;
        // drain threads exit once their channels disconnect.
        if let Some((_, state)) = self.collections.remove(collection) {
            let mut state = state.lock();
            for sub in state.subscriptions.drain(..) {
                sub.cancelled.store(true, Ordering::Release);
                self.subscription_index.remove(&sub.id);
            }
        }

        let dir = self.root.join(collection.as_str());
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        info!(collection = %collection, "collection log dropped");
        Ok(())
    }

    /// Highest SeqId assigned for a collection (0 when nothing was written).
    pub fn last_seq_id(&self, collection: &CollectionId) -> Result<SeqId> {
        let state = self.state(collection)?;
        let state = state.lock();
        Ok(state.last_seq())
    }

    /// Cumulative writer counters for a collection.
    pub fn counters(&self, collection: &CollectionId) -> Result<LogCounters> {
        let state = self.state(collection)?;
        let state = state.lock();
        Ok(state.writer.counters())
    }

    fn state(&self, collection: &CollectionId) -> Result<Arc<Mutex<CollectionLogState>>> {
        if let Some(state) = self.collections.get(collection) {
            return Ok(state.clone());
        }

        match self.collections.entry(collection.clone()) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let dir = self.root.join(collection.as_str());
                let (writer, last) = LogWriter::open(dir, self.config.clone())?;
                if last.is_some() {
                    debug!(collection = %collection, last = last.unwrap(), "reopened collection log");
                }
                let state = Arc::new(Mutex::new(CollectionLogState {
                    writer,
                    next_seq: last.unwrap_or(0) + 1,
                    subscriptions: Vec::new(),
                }));
                entry.insert(state.clone());
                Ok(state)
            }
        }
    }
}

impl Drop for IngestionLog {
    fn drop(&mut self) {
        // Dropping collection states drops every subscription sender, which
        // disconnects the channels and lets drain threads exit.
        let live: usize = self
            .collections
            .iter()
            .map(|s| s.value().lock().subscriptions.len())
            .sum();
        if live > 0 {
            warn!(subscriptions = live, "ingestion log dropped with live subscriptions");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Condvar;
    use std::time::Duration;
    use tempfile::tempdir;

    fn coll(name: &str) -> CollectionId {
        CollectionId::new(name)
    }

    fn upserts(ids: &[&str]) -> Vec<OperationRecord> {
        ids.iter()
            .map(|id| OperationRecord::upsert(*id, vec![1.0, 0.0]))
            .collect()
    }

    /// Collects delivered seq ids and lets tests block until `n` arrived.
    #[derive(Default)]
    struct Sink {
        state: Mutex<Vec<u64>>,
        ready: Condvar,
    }

    impl Sink {
        fn handler(self: &Arc<Self>) -> BatchHandler {
            let sink = self.clone();
            Box::new(move |batch: Vec<LogRecord>| {
                let mut seqs = sink.state.lock();
                seqs.extend(batch.iter().map(|r| r.seq_id.as_u64()));
                sink.ready.notify_all();
            })
        }

        fn wait_for(&self, n: usize) -> Vec<u64> {
            let mut seqs = self.state.lock();
            while seqs.len() < n {
                if self
                    .ready
                    .wait_for(&mut seqs, Duration::from_secs(5))
                    .timed_out()
                {
                    panic!("timed out waiting for {} records, have {:?}", n, *seqs);
                }
            }
            seqs.clone()
        }
    }

    #[test]
    fn test_submit_assigns_increasing_seq_ids() {
        let dir = tempdir().unwrap();
        let log = IngestionLog::open(dir.path(), LogConfig::for_testing()).unwrap();

        let ids = log.submit(&coll("c"), upserts(&["a", "b", "c"])).unwrap();
        assert_eq!(ids, vec![SeqId::new(1), SeqId::new(2), SeqId::new(3)]);

        let ids = log.submit(&coll("c"), upserts(&["d"])).unwrap();
        assert_eq!(ids, vec![SeqId::new(4)]);

        assert_eq!(log.last_seq_id(&coll("c")).unwrap(), SeqId::new(4));
    }

    #[test]
    fn test_collections_are_independent() {
        let dir = tempdir().unwrap();
        let log = IngestionLog::open(dir.path(), LogConfig::for_testing()).unwrap();

        log.submit(&coll("a"), upserts(&["x", "y"])).unwrap();
        let ids = log.submit(&coll("b"), upserts(&["x"])).unwrap();

        // Collection b starts from 1, unaffected by a
        assert_eq!(ids, vec![SeqId::new(1)]);
    }

    #[test]
    fn test_validation_errors() {
        let dir = tempdir().unwrap();
        let config = LogConfig::for_testing().with_max_batch_size(2);
        let log = IngestionLog::open(dir.path(), config).unwrap();

        assert!(matches!(
            log.submit(&coll("c"), vec![]),
            Err(Error::EmptyBatch)
        ));

        assert!(matches!(
            log.submit(&coll("c"), upserts(&["a", "b", "c"])),
            Err(Error::BatchTooLarge { size: 3, max: 2 })
        ));

        assert!(matches!(
            log.submit(&coll("c"), upserts(&[""])),
            Err(Error::InvalidRecord(_))
        ));
    }

    #[test]
    fn test_live_subscription_receives_submits() {
        let dir = tempdir().unwrap();
        let log = IngestionLog::open(dir.path(), LogConfig::for_testing()).unwrap();
        let sink = Arc::new(Sink::default());

        log.subscribe(&coll("c"), None, None, sink.handler()).unwrap();

        log.submit(&coll("c"), upserts(&["a", "b"])).unwrap();
        log.submit(&coll("c"), upserts(&["c"])).unwrap();

        assert_eq!(sink.wait_for(3), vec![1, 2, 3]);
    }

    #[test]
    fn test_replay_then_live_no_gaps_no_duplicates() {
        let dir = tempdir().unwrap();
        let log = IngestionLog::open(dir.path(), LogConfig::for_testing()).unwrap();

        log.submit(&coll("c"), upserts(&["a", "b", "c"])).unwrap();

        let sink = Arc::new(Sink::default());
        log.subscribe(&coll("c"), None, None, sink.handler()).unwrap();

        log.submit(&coll("c"), upserts(&["d", "e"])).unwrap();

        assert_eq!(sink.wait_for(5), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_resume_from_checkpoint() {
        let dir = tempdir().unwrap();
        let log = IngestionLog::open(dir.path(), LogConfig::for_testing()).unwrap();

        log.submit(&coll("c"), upserts(&["a", "b", "c", "d"])).unwrap();

        // A consumer that already applied through SeqId 2 resumes after it
        let sink = Arc::new(Sink::default());
        log.subscribe(&coll("c"), Some(SeqId::new(2)), None, sink.handler())
            .unwrap();

        assert_eq!(sink.wait_for(2), vec![3, 4]);
    }

    #[test]
    fn test_bounded_subscription_stops_at_end() {
        let dir = tempdir().unwrap();
        let log = IngestionLog::open(dir.path(), LogConfig::for_testing()).unwrap();

        log.submit(&coll("c"), upserts(&["a", "b"])).unwrap();

        let sink = Arc::new(Sink::default());
        log.subscribe(&coll("c"), None, Some(SeqId::new(3)), sink.handler())
            .unwrap();

        log.submit(&coll("c"), upserts(&["c", "d", "e"])).unwrap();

        // Only records up to the end bound are delivered
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(sink.wait_for(3), vec![1, 2, 3]);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let dir = tempdir().unwrap();
        let log = IngestionLog::open(dir.path(), LogConfig::for_testing()).unwrap();
        let sink = Arc::new(Sink::default());

        let id = log.subscribe(&coll("c"), None, None, sink.handler()).unwrap();
        log.unsubscribe(id);
        log.unsubscribe(id); // no-op

        log.submit(&coll("c"), upserts(&["a"])).unwrap();
        std::thread::sleep(Duration::from_millis(100));
        assert!(sink.state.lock().is_empty());
    }

    #[test]
    fn test_overloaded_rejects_excess_in_flight() {
        let dir = tempdir().unwrap();
        let config = LogConfig::for_testing().with_max_in_flight(0);
        let log = IngestionLog::open(dir.path(), config).unwrap();

        assert!(matches!(
            log.submit(&coll("c"), upserts(&["a"])),
            Err(Error::Overloaded { .. })
        ));
    }

    #[test]
    fn test_restart_resumes_seq_ids() {
        let dir = tempdir().unwrap();

        {
            let log = IngestionLog::open(dir.path(), LogConfig::for_testing()).unwrap();
            log.submit(&coll("c"), upserts(&["a", "b"])).unwrap();
        }

        let log = IngestionLog::open(dir.path(), LogConfig::for_testing()).unwrap();
        let ids = log.submit(&coll("c"), upserts(&["c"])).unwrap();
        assert_eq!(ids, vec![SeqId::new(3)]);
    }
}
