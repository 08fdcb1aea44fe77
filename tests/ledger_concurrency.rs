use dochook::core::state::StateStore;
use dochook::core::store::Store;
use dochook::core::sync::SyncQueue;
use dochook::plugins::knowledge::{KnowledgeRecord, RecordKind};
use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::tempdir;

const WORKERS: usize = 8;
const PER_WORKER: usize = 15;

#[test]
fn concurrent_enqueues_never_lose_records() {
    let tmp = tempdir().unwrap();
    let root: PathBuf = tmp.path().to_path_buf();
    let start = Arc::new(Barrier::new(WORKERS));

    let mut handles = Vec::new();
    for worker in 0..WORKERS {
        let root = root.clone();
        let start = start.clone();
        handles.push(thread::spawn(move || {
            // Each worker opens its own queue, as separate hook processes do.
            let queue = SyncQueue::new(Store::host(&root), None);
            start.wait();
            let mut ids = Vec::new();
            for n in 0..PER_WORKER {
                let record = KnowledgeRecord::new(
                    RecordKind::Troubleshooting,
                    &format!("worker {} note {}", worker, n),
                    &format!("sha-{}-{}", worker, n),
                    "app",
                    &[],
                );
                ids.push(record.id.clone());
                queue.enqueue(record).unwrap();
            }
            ids
        }));
    }
    let mut expected: HashSet<String> = HashSet::new();
    for h in handles {
        expected.extend(h.join().expect("worker join"));
    }

    let queue = SyncQueue::new(Store::host(&root), None);
    let entries = queue.list().unwrap();
    assert_eq!(entries.len(), WORKERS * PER_WORKER);
    let stored: HashSet<String> = entries.into_iter().map(|e| e.record.id).collect();
    assert_eq!(stored, expected);
}

#[test]
fn concurrent_clears_land_every_cleared_update_in_history() {
    let tmp = tempdir().unwrap();
    let root: PathBuf = tmp.path().to_path_buf();
    let start = Arc::new(Barrier::new(WORKERS));

    let mut handles = Vec::new();
    for worker in 0..WORKERS {
        let root = root.clone();
        let start = start.clone();
        handles.push(thread::spawn(move || {
            let state = StateStore::new(Store::project(&root, "app"));
            let layers: BTreeSet<String> = [format!("layer-{}", worker)].into_iter().collect();
            start.wait();
            let mut cleared = 0;
            for n in 0..PER_WORKER {
                state
                    .set_pending(&layers, &format!("w{} n{}", worker, n), "manual", &[], "")
                    .unwrap();
                if state.clear_pending().unwrap().is_some() {
                    cleared += 1;
                }
            }
            cleared
        }));
    }
    let cleared: usize = handles
        .into_iter()
        .map(|h| h.join().expect("worker join"))
        .sum();

    let state = StateStore::new(Store::project(&root, "app"));
    assert!(cleared >= 1);
    assert_eq!(state.history().unwrap().len(), cleared);
    assert!(!state.is_pending().unwrap());
}
