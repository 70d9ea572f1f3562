//! Concurrent writers and committers against one store.

use delta_journal::{
    DocumentStore, FileStore, GrowOnlySet, KeyKind, KvRead, KvStore, MemoryStore, StoreConfig,
};
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

const WRITERS: usize = 4;
const UPDATES_PER_WRITER: usize = 50;

fn run_writers<S>(store: Arc<DocumentStore<S, GrowOnlySet>>, with_committer: bool)
where
    S: KvStore + 'static,
{
    let mut handles = Vec::new();

    for writer in 0..WRITERS {
        let store = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            for i in 0..UPDATES_PER_WRITER {
                store
                    .store_update(&GrowOnlySet::update([format!("w{}-{}", writer, i)]))
                    .unwrap();
            }
        }));
    }

    if with_committer {
        let store = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            for _ in 0..20 {
                store.commit().unwrap();
                thread::yield_now();
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }
}

fn assert_consistent<S: KvStore>(store: &DocumentStore<S, GrowOnlySet>) {
    let records = store.store().list(KeyKind::Update).unwrap();
    let stats = store.pending_stats().unwrap();

    assert_eq!(stats.count, records.len() as u64);
    assert_eq!(
        stats.bytes,
        records.values().map(|r| r.len() as u64).sum::<u64>()
    );

    let doc = store.get_document().unwrap();
    assert_eq!(doc.len(), WRITERS * UPDATES_PER_WRITER);
    for writer in 0..WRITERS {
        for i in 0..UPDATES_PER_WRITER {
            assert!(doc.contains(&format!("w{}-{}", writer, i)));
        }
    }
}

#[test]
fn test_concurrent_appends_lose_nothing() {
    let store = Arc::new(DocumentStore::new(
        MemoryStore::new(),
        GrowOnlySet::new(),
        StoreConfig {
            max_bytes: 256,
            max_updates: 16,
        },
    ));

    run_writers(Arc::clone(&store), false);
    assert_consistent(&store);
}

#[test]
fn test_concurrent_appends_and_commits() {
    let store = Arc::new(DocumentStore::new(
        MemoryStore::new(),
        GrowOnlySet::new(),
        StoreConfig::default(),
    ));

    run_writers(Arc::clone(&store), true);
    assert_consistent(&store);

    store.commit().unwrap();
    assert!(store.store().list(KeyKind::Update).unwrap().is_empty());
    assert_consistent(&store);
}

#[test]
fn test_concurrent_appends_on_file_store() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("doc");

    {
        let store = Arc::new(DocumentStore::new(
            FileStore::create(&path).unwrap(),
            GrowOnlySet::new(),
            StoreConfig {
                max_bytes: u64::MAX,
                max_updates: 25,
            },
        ));
        run_writers(Arc::clone(&store), true);
        assert_consistent(&store);
    }

    let store = DocumentStore::new(
        FileStore::open(&path).unwrap(),
        GrowOnlySet::new(),
        StoreConfig::default(),
    );
    assert_consistent(&store);
}

#[test]
fn test_shared_backend_between_handles() {
    let backend = Arc::new(MemoryStore::new());
    let a = DocumentStore::new(Arc::clone(&backend), GrowOnlySet::new(), StoreConfig::default());
    let b = DocumentStore::new(Arc::clone(&backend), GrowOnlySet::new(), StoreConfig::default());

    a.store_update(&GrowOnlySet::update(["from-a"])).unwrap();
    b.store_update(&GrowOnlySet::update(["from-b"])).unwrap();
    b.commit().unwrap();

    let doc = a.get_document().unwrap();
    assert!(doc.contains("from-a") && doc.contains("from-b"));
    assert!(backend.list(KeyKind::Update).unwrap().is_empty());
}
