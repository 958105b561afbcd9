//! Crash-recovery and replay behavior of the whole engine.

use std::sync::Arc;
use std::time::Duration;

use tempfile::tempdir;
use tessera::{
    CollectionId, CountPlan, Engine, EngineConfig, FilterSpec, InMemoryCatalog, KnnPlan, KnnSpec,
    OperationRecord, Plan, Projection, QueryOutput, ScanSpec, SegmentSpecs, SeqId,
};

const SYNC_TIMEOUT: Duration = Duration::from_secs(5);

fn open_engine(dir: &std::path::Path) -> Engine {
    let _ = tracing_subscriber::fmt::try_init();
    let catalog = Arc::new(InMemoryCatalog::with_default(SegmentSpecs::default()));
    Engine::open(dir, catalog, EngineConfig::for_testing()).unwrap()
}

fn submit_and_sync(engine: &Engine, collection: &CollectionId, records: Vec<OperationRecord>) {
    engine.submit_embeddings(collection, records).unwrap();
    assert!(engine.sync(collection, SYNC_TIMEOUT).unwrap());
}

fn knn_ids(engine: &Engine, collection: &CollectionId, query: Vec<f32>, k: usize) -> Vec<String> {
    let plan = Plan::Knn(KnnPlan {
        scan: ScanSpec::new(collection.clone()),
        filter: FilterSpec::none(),
        knn: KnnSpec::single(query, k),
        projection: Projection::ids_only(),
    });
    match engine.execute(&plan).unwrap() {
        QueryOutput::Knn(mut lists) => lists.remove(0).into_iter().map(|r| r.id).collect(),
        other => panic!("unexpected output: {:?}", other),
    }
}

fn count(engine: &Engine, collection: &CollectionId) -> usize {
    let plan = Plan::Count(CountPlan {
        scan: ScanSpec::new(collection.clone()),
    });
    match engine.execute(&plan).unwrap() {
        QueryOutput::Count(n) => n,
        other => panic!("unexpected output: {:?}", other),
    }
}

/// Simulate a crash: the engine disappears without flushing or shutting
/// down. Drain threads stay parked on disconnected-later channels; the next
/// open must rebuild purely from durable state.
fn crash(engine: Engine) {
    std::mem::forget(engine);
}

#[test]
fn clean_restart_preserves_state() {
    let dir = tempdir().unwrap();
    let collection = CollectionId::new("docs");

    {
        let engine = open_engine(dir.path());
        submit_and_sync(
            &engine,
            &collection,
            vec![
                OperationRecord::upsert("a", vec![1.0, 0.0]).with_document("doc a"),
                OperationRecord::upsert("b", vec![0.0, 1.0]).with_document("doc b"),
            ],
        );
        engine.flush_all().unwrap();
    }

    let engine = open_engine(dir.path());
    assert!(engine.sync(&collection, SYNC_TIMEOUT).unwrap());
    assert_eq!(count(&engine, &collection), 2);
    assert_eq!(knn_ids(&engine, &collection, vec![1.0, 0.0], 1), vec!["a"]);

    // SeqIds continue where they left off
    let ids = engine
        .submit_embeddings(&collection, vec![OperationRecord::upsert("c", vec![1.0, 1.0])])
        .unwrap();
    assert_eq!(ids, vec![SeqId::new(3)]);
}

#[test]
fn crash_without_flush_recovers_from_log() {
    let dir = tempdir().unwrap();
    let collection = CollectionId::new("docs");

    {
        let engine = open_engine(dir.path());
        // Stay below the auto-flush threshold: nothing is snapshotted, the
        // records exist only in the durable log
        submit_and_sync(
            &engine,
            &collection,
            vec![
                OperationRecord::upsert("a", vec![1.0, 0.0]),
                OperationRecord::upsert("b", vec![0.0, 1.0]),
            ],
        );
        crash(engine);
    }

    let engine = open_engine(dir.path());
    assert!(engine.sync(&collection, SYNC_TIMEOUT).unwrap());
    assert_eq!(count(&engine, &collection), 2);
    assert_eq!(knn_ids(&engine, &collection, vec![1.0, 0.0], 1), vec!["a"]);
}

#[test]
fn crash_after_partial_flush_replays_only_the_gap() {
    let dir = tempdir().unwrap();
    let collection = CollectionId::new("docs");

    {
        let engine = open_engine(dir.path());
        submit_and_sync(
            &engine,
            &collection,
            vec![
                OperationRecord::upsert("a", vec![1.0, 0.0]),
                OperationRecord::upsert("b", vec![0.0, 1.0]),
                OperationRecord::upsert("c", vec![1.0, 1.0]),
            ],
        );
        engine.flush_all().unwrap();

        // These land in the log but never in a snapshot
        submit_and_sync(
            &engine,
            &collection,
            vec![
                OperationRecord::upsert("d", vec![2.0, 0.0]),
                OperationRecord::delete("a"),
            ],
        );
        crash(engine);
    }

    let engine = open_engine(dir.path());
    assert!(engine.sync(&collection, SYNC_TIMEOUT).unwrap());

    // State equals the uninterrupted run: a deleted, d present
    assert_eq!(count(&engine, &collection), 3);
    let ids = knn_ids(&engine, &collection, vec![1.0, 0.0], 10);
    assert!(!ids.contains(&"a".to_string()));
    assert!(ids.contains(&"d".to_string()));
}

#[test]
fn replayed_state_matches_uninterrupted_run() {
    let crash_dir = tempdir().unwrap();
    let clean_dir = tempdir().unwrap();
    let collection = CollectionId::new("docs");

    let workload: Vec<Vec<OperationRecord>> = vec![
        vec![
            OperationRecord::upsert("a", vec![1.0, 0.0]).with_document("alpha"),
            OperationRecord::upsert("b", vec![0.0, 1.0]).with_document("beta"),
        ],
        vec![OperationRecord::delete("a")],
        vec![
            OperationRecord::upsert("c", vec![0.5, 0.5]).with_document("gamma"),
            OperationRecord::upsert("b", vec![0.2, 0.8]).with_document("beta v2"),
        ],
    ];

    // Interrupted run: crash between every batch
    for batch in &workload {
        let engine = open_engine(crash_dir.path());
        submit_and_sync(&engine, &collection, batch.clone());
        crash(engine);
    }

    // Uninterrupted run
    let clean = open_engine(clean_dir.path());
    for batch in &workload {
        submit_and_sync(&clean, &collection, batch.clone());
    }

    let recovered = open_engine(crash_dir.path());
    assert!(recovered.sync(&collection, SYNC_TIMEOUT).unwrap());

    assert_eq!(count(&recovered, &collection), count(&clean, &collection));
    for query in [vec![1.0, 0.0], vec![0.0, 1.0], vec![0.5, 0.5]] {
        assert_eq!(
            knn_ids(&recovered, &collection, query.clone(), 10),
            knn_ids(&clean, &collection, query, 10)
        );
    }
}

#[test]
fn torn_log_tail_is_repaired() {
    let dir = tempdir().unwrap();
    let collection = CollectionId::new("docs");

    {
        let engine = open_engine(dir.path());
        submit_and_sync(
            &engine,
            &collection,
            vec![
                OperationRecord::upsert("a", vec![1.0, 0.0]),
                OperationRecord::upsert("b", vec![0.0, 1.0]),
            ],
        );
        crash(engine);
    }

    // Simulate a crash mid-append: garbage at the end of the active segment
    let segment_path = dir.path().join("log").join("docs").join("log-000001.seg");
    assert!(segment_path.exists());
    {
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&segment_path)
            .unwrap();
        file.write_all(&[0x13, 0x37, 0xFE]).unwrap();
    }

    let engine = open_engine(dir.path());
    assert!(engine.sync(&collection, SYNC_TIMEOUT).unwrap());
    assert_eq!(count(&engine, &collection), 2);

    // The repaired log accepts new appends with the next SeqId
    let ids = engine
        .submit_embeddings(&collection, vec![OperationRecord::upsert("c", vec![1.0, 1.0])])
        .unwrap();
    assert_eq!(ids, vec![SeqId::new(3)]);
    assert!(engine.sync(&collection, SYNC_TIMEOUT).unwrap());
    assert_eq!(count(&engine, &collection), 3);
}
