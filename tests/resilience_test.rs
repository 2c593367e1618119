mod helpers;

use mnemo::config::MnemoConfig;
use mnemo::embedding::EmbeddingProvider;
use mnemo::memory::store::RECALL_COUNT_KEY;
use mnemo::{db, Concept, Entity, Error, Recaller, Store};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn open_creates_new_db_at_nonexistent_path() {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("subdir").join("new.db");

    assert!(!db_path.exists());

    let store = Store::open(&db_path).unwrap();

    assert!(db_path.exists());
    assert_eq!(store.db_path(), Some(db_path.as_path()));
    assert_eq!(store.decay_stats().unwrap().total, 0);
}

#[test]
fn health_check_passes_on_valid_db() {
    let tmp = TempDir::new().unwrap();
    let conn = db::open_database(tmp.path().join("health.db")).unwrap();

    let report = db::check_database_health(&conn).unwrap();
    assert!(report.integrity_ok);
    assert_eq!(report.schema_version, db::migrations::CURRENT_SCHEMA_VERSION);
    assert!(!report.sqlite_vec_version.is_empty());
    assert_eq!(report.concept_count, 0);
    assert_eq!(report.relation_count, 0);
    assert_eq!(report.log_count, 0);
}

#[test]
fn busy_timeout_is_set() {
    let tmp = TempDir::new().unwrap();
    let conn = db::open_database(tmp.path().join("test.db")).unwrap();

    let timeout: i64 = conn
        .pragma_query_value(None, "busy_timeout", |row| row.get(0))
        .unwrap();
    assert_eq!(timeout, 5000);
}

#[test]
fn journal_mode_is_wal() {
    let tmp = TempDir::new().unwrap();
    let conn = db::open_database(tmp.path().join("wal.db")).unwrap();

    let mode: String = conn
        .pragma_query_value(None, "journal_mode", |row| row.get(0))
        .unwrap();
    assert_eq!(mode.to_lowercase(), "wal");
}

#[test]
fn garbage_file_is_store_unavailable() {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("junk.db");
    std::fs::write(&db_path, vec![b'x'; 4096]).unwrap();

    let result = Store::open(&db_path);
    assert!(matches!(result, Err(Error::StoreUnavailable(_))));
}

#[test]
fn counter_survives_concurrent_threads() {
    let tmp = TempDir::new().unwrap();
    let store = helpers::file_store(&tmp.path().join("threads.db"));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for _ in 0..25 {
                    store.increment_counter(RECALL_COUNT_KEY).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(store.read_counter(RECALL_COUNT_KEY).unwrap(), 200);
}

#[test]
fn counter_survives_separate_connections() {
    // Two handles on one file behave like two processes: each has its own
    // connection and only SQLite's file locking serializes them.
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("shared.db");
    let first = helpers::file_store(&db_path);
    let second = helpers::file_store(&db_path);

    let handles: Vec<_> = [first.clone(), second.clone()]
        .into_iter()
        .map(|store| {
            thread::spawn(move || {
                for _ in 0..50 {
                    store.increment_counter(RECALL_COUNT_KEY).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(first.read_counter(RECALL_COUNT_KEY).unwrap(), 100);
    assert_eq!(second.read_counter(RECALL_COUNT_KEY).unwrap(), 100);
}

#[test]
fn concurrent_decay_and_rejuvenation_stay_in_bounds() {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("bounds.db");
    let store = helpers::file_store(&db_path);
    for i in 0..10 {
        helpers::put(&store, &format!("c{i}"), helpers::unit(i), &[]);
    }

    let decayer = {
        let store = helpers::file_store(&db_path);
        thread::spawn(move || {
            for _ in 0..20 {
                store.decay_all(0.3, chrono::Duration::zero()).unwrap();
            }
        })
    };
    let booster = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            let boosts: Vec<(String, f64)> = (0..10).map(|i| (format!("c{i}"), 0.7)).collect();
            for _ in 0..20 {
                store.rejuvenate(&boosts).unwrap();
            }
        })
    };
    decayer.join().unwrap();
    booster.join().unwrap();

    for i in 0..10 {
        let f = helpers::decay_factor(&store, &format!("c{i}"));
        assert!((0.0..=1.0).contains(&f), "c{i} out of bounds: {f}");
    }
    let stats = store.decay_stats().unwrap();
    assert!(stats.min_decay_factor >= 0.0);
    assert!(stats.avg_decay_factor <= 1.0);
}

/// Signals when a query reaches `embed`, then holds it until released.
struct GatedEmbedder {
    entered: Mutex<Sender<()>>,
    release: Mutex<Receiver<()>>,
}

impl EmbeddingProvider for GatedEmbedder {
    fn embed(&self, _text: &str) -> mnemo::Result<Vec<f32>> {
        let _ = self.entered.lock().unwrap().send(());
        match self
            .release
            .lock()
            .unwrap()
            .recv_timeout(Duration::from_secs(5))
        {
            Ok(()) => Ok(helpers::unit(0)),
            Err(_) => Err(Error::EmbeddingUnavailable("gate never opened".into())),
        }
    }

    fn model_name(&self) -> &str {
        "gated"
    }
}

#[test]
fn slow_embedding_does_not_block_other_callers() {
    let store = helpers::memory_store();
    store.upsert_entity(&Entity::new("person", "alice")).unwrap();
    helpers::put(&store, "a", helpers::unit(0), &[]);
    store
        .upsert_concept(&Concept::with_id("fact", "alice drinks tea").mentions("person:alice"))
        .unwrap();

    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let embedder = GatedEmbedder {
        entered: Mutex::new(entered_tx),
        release: Mutex::new(release_rx),
    };
    let recaller = Arc::new(
        Recaller::new(Arc::clone(&store), Arc::new(embedder), &MnemoConfig::default()).unwrap(),
    );

    let slow = {
        let recaller = Arc::clone(&recaller);
        thread::spawn(move || recaller.recall("tea", 5, None).unwrap())
    };
    entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    // The semantic recall is parked inside embed; these must still complete
    assert_eq!(recaller.decay_stats().unwrap().total, 2);
    let by_entity = recaller.recall("", 5, Some("person:alice")).unwrap();
    assert_eq!(by_entity.concepts.len(), 1);

    release_tx.send(()).unwrap();
    let semantic = slow.join().unwrap();
    assert!(semantic.embedding_used);
    assert_eq!(semantic.concepts[0].concept.id, "a");
    assert_eq!(recaller.recall_count(), 2);
}
