use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::json;

use service_record::cache::{CachePolicy, Caches, DocumentStore, EphemeralStore};
use service_record::error::{FetchError, StoreError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Doc {
    name: String,
    score: i64,
}

fn doc(name: &str, score: i64) -> Doc {
    Doc {
        name: name.to_string(),
        score,
    }
}

#[test]
fn ephemeral_set_never_overwrites() {
    let store = EphemeralStore::new();
    assert!(store.set("season", json!("v1")));
    assert!(!store.set("season", json!("v2")));
    assert_eq!(store.get("season"), Some(json!("v1")));
    assert_eq!(store.get("missing"), None);
}

#[test]
fn concurrent_ephemeral_writers_keep_one_value() {
    let store = EphemeralStore::new();
    let winners = AtomicUsize::new(0);
    std::thread::scope(|scope| {
        for n in 0..8 {
            let store = &store;
            let winners = &winners;
            scope.spawn(move || {
                if store.set("calendar", json!(n)) {
                    winners.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
    });
    assert_eq!(winners.load(Ordering::SeqCst), 1);
    assert!(store.get("calendar").is_some());
}

#[test]
fn durable_upsert_keeps_latest() {
    let store = DocumentStore::open_in_memory().expect("open store");
    store.upsert("players", "p1", &doc("first", 1)).expect("upsert");
    store.upsert("players", "p1", &doc("second", 2)).expect("upsert");
    let got: Option<Doc> = store.get("players", "p1").expect("get");
    assert_eq!(got, Some(doc("second", 2)));
    assert_eq!(store.count("players").expect("count"), 1);
    let missing: Option<Doc> = store.get("players", "p2").expect("get");
    assert!(missing.is_none());
}

#[test]
fn find_filters_within_collection() {
    let store = DocumentStore::open_in_memory().expect("open store");
    store.upsert("players", "a", &doc("a", 10)).expect("upsert");
    store.upsert("players", "b", &doc("b", 50)).expect("upsert");
    store.upsert("players", "c", &doc("c", 90)).expect("upsert");
    store.upsert("others", "d", &doc("d", 99)).expect("upsert");
    store.ensure_index("players", "score").expect("index");

    let high: Vec<Doc> = store
        .find("players", |d: &Doc| d.score >= 50)
        .expect("find")
        .collect();
    assert_eq!(high, vec![doc("b", 50), doc("c", 90)]);
}

#[test]
fn persisted_read_through_fetches_once_and_survives_new_ephemeral_tier() {
    let dir = std::env::temp_dir().join(format!("service_record_cache_{}", std::process::id()));
    let path = dir.join("tiers.sqlite");
    let _ = std::fs::remove_file(&path);
    let fetches = AtomicUsize::new(0);
    let fetch = || -> Result<Doc, FetchError> {
        fetches.fetch_add(1, Ordering::SeqCst);
        Ok(doc("live", 7))
    };

    {
        let caches = Caches::open(&path).expect("open");
        let first: Doc = caches
            .read_through(CachePolicy::Persisted, "maps", "m:v", fetch)
            .expect("read");
        let second: Doc = caches
            .read_through(CachePolicy::Persisted, "maps", "m:v", fetch)
            .expect("read");
        assert_eq!(first, second);
    }
    {
        // Fresh process: empty ephemeral tier, same durable file.
        let caches = Caches::open(&path).expect("reopen");
        let third: Doc = caches
            .read_through(CachePolicy::Persisted, "maps", "m:v", fetch)
            .expect("read");
        assert_eq!(third, doc("live", 7));
    }
    assert_eq!(fetches.load(Ordering::SeqCst), 1);
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn shared_read_through_skips_durable_tier() {
    let caches = Caches::in_memory().expect("open");
    let value: Doc = caches
        .read_through(CachePolicy::Shared, "season_calendar", "all", || Ok(doc("s", 1)))
        .expect("read");
    assert_eq!(value, doc("s", 1));
    assert_eq!(caches.durable.count("season_calendar").expect("count"), 0);
    assert_eq!(caches.ephemeral.len(), 1);
}

#[test]
fn failed_fetch_caches_nothing() {
    let caches = Caches::in_memory().expect("open");
    let result: Result<Doc, FetchError> =
        caches.read_through(CachePolicy::Persisted, "maps", "x", || {
            Err(FetchError::Empty("map"))
        });
    assert!(result.is_err());
    assert!(caches.ephemeral.is_empty());
    assert_eq!(caches.durable.count("maps").expect("count"), 0);
}

#[test]
fn open_reports_unusable_store_directory() {
    let blocker = std::env::temp_dir().join(format!("service_record_blocker_{}", std::process::id()));
    std::fs::write(&blocker, b"not a directory").expect("write blocker");

    let result = DocumentStore::open(&blocker.join("nested").join("store.sqlite"));
    assert!(matches!(result, Err(StoreError::Io(_))));
    let _ = std::fs::remove_file(&blocker);
}
