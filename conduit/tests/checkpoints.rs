use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use conduit::checkpoint::{Checkpoint, CheckpointStore, FileStore, MemoryStore};
use conduit::diagnostic::Collector;
use conduit::element::Value;
use conduit::execute::{execute, Config};
use conduit::operators::{Collect, Collection, Delay, Emit};
use conduit::pipeline::Pipeline;

fn wait_for<F: FnMut() -> bool>(mut condition: F) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out");
        thread::sleep(Duration::from_millis(5));
    }
}

fn scenario(source: Emit) -> (Pipeline, Collection) {
    let (collect, collection) = Collect::new();
    let pipeline = Pipeline::new(vec![
        Box::new(source),
        Box::new(Delay::new("time", 1.0).unwrap()),
        Box::new(collect),
    ]);
    (pipeline, collection)
}

fn indices(collection: &Collection) -> Vec<i64> {
    collection
        .records()
        .iter()
        .filter_map(|record| match record.get("index") {
            Some(Value::Int(index)) => Some(*index),
            _ => None,
        })
        .collect()
}

/// Runs the scenario until two events arrived, checkpoints it, and cancels it.
fn interrupted(store: Arc<dyn CheckpointStore>) -> Checkpoint {
    let gate = Arc::new(AtomicBool::new(false));
    let step = Some(Duration::from_millis(1));
    let (pipeline, collection) = scenario(Emit::generated(3, step).hold_after(2, gate));
    let config = Config {
        store: Some(Arc::clone(&store)),
        diagnostics: Arc::new(Collector::new()),
        ..Config::default()
    };
    let execution = execute(pipeline, config).unwrap();
    wait_for(|| collection.len() == 2);
    execution.checkpoint();
    wait_for(|| store.latest().unwrap().is_some());
    execution.cancel();
    execution.join().unwrap();
    assert_eq!(indices(&collection), vec![0, 1]);
    store.latest().unwrap().unwrap()
}

#[test]
fn restored_pipelines_emit_the_rest_exactly_once() {
    let store = Arc::new(MemoryStore::new());
    let checkpoint = interrupted(store);
    assert_eq!(checkpoint.id, 1);
    assert_eq!(checkpoint.states.len(), 3);
    assert_eq!(checkpoint.state(0), Some(bincode::serialize(&2usize).unwrap()));

    let (pipeline, collection) = scenario(Emit::generated(3, Some(Duration::from_millis(1))));
    let config = Config {
        restore: Some(checkpoint),
        diagnostics: Arc::new(Collector::new()),
        ..Config::default()
    };
    let metrics = execute(pipeline, config).unwrap().join().unwrap();
    assert_eq!(indices(&collection), vec![2]);
    assert_eq!(metrics[0].elements_out, 1);
}

#[test]
fn periodic_checkpoints_are_committed() {
    let store = Arc::new(MemoryStore::new());
    let gate = Arc::new(AtomicBool::new(false));
    let (pipeline, collection) = scenario(Emit::numbered(5).hold_after(3, Arc::clone(&gate)));
    let config = Config {
        store: Some(Arc::clone(&store) as Arc<dyn CheckpointStore>),
        checkpoint_interval: Some(Duration::from_millis(20)),
        diagnostics: Arc::new(Collector::new()),
        ..Config::default()
    };
    let execution = execute(pipeline, config).unwrap();
    wait_for(|| store.latest().unwrap().map_or(false, |checkpoint| checkpoint.id >= 2));
    gate.store(true, std::sync::atomic::Ordering::SeqCst);
    let metrics = execution.join().unwrap();

    assert_eq!(collection.len(), 5);
    assert!(metrics.iter().all(|node| node.checkpoints >= 2));
}

#[test]
fn file_checkpoints_restore_a_new_execution() {
    let path = std::env::temp_dir().join(format!("conduit-checkpoint-{}", std::process::id()));
    let store = Arc::new(FileStore::new(&path));
    let checkpoint = interrupted(Arc::clone(&store) as Arc<dyn CheckpointStore>);

    let reopened = FileStore::new(&path);
    assert_eq!(reopened.latest().unwrap(), Some(checkpoint.clone()));

    let (pipeline, collection) = scenario(Emit::generated(3, Some(Duration::from_millis(1))));
    let config = Config {
        restore: reopened.latest().unwrap(),
        diagnostics: Arc::new(Collector::new()),
        ..Config::default()
    };
    execute(pipeline, config).unwrap().join().unwrap();
    assert_eq!(indices(&collection), vec![2]);
    let _ = std::fs::remove_file(&path);
}
