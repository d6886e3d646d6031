use std::sync::Arc;
use std::thread;

use ms_core::bucket::{Bucket, EntityKind};
use ms_core::store::{CorrespondenceStore, FileStore, Record};
use ms_core::types::TrackerId;

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[test]
fn concurrent_writers_all_land_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sync.db.json");
    let store = Arc::new(FileStore::create(&path).unwrap());

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..10 {
                    let key = format!("T{t}-{i}");
                    store
                        .put_many(&[
                            Record::new("fwd", key.clone(), format!("S{t}-{i}")),
                            Record::new("rev", format!("S{t}-{i}"), key.clone()),
                        ])
                        .unwrap();
                    assert!(store.get("fwd", &key).unwrap().is_some());
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    store.close().unwrap();

    let reopened = FileStore::open(&path).unwrap();
    let snapshot = reopened.snapshot().unwrap();
    assert_eq!(snapshot["fwd"].len(), 80);
    assert_eq!(snapshot["rev"].len(), 80);
    for (k, v) in &snapshot["fwd"] {
        assert_eq!(snapshot["rev"][v], *k);
    }
}

// ---------------------------------------------------------------------------
// On-disk format
// ---------------------------------------------------------------------------

#[test]
fn buckets_are_tab_separated_in_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sync.db.json");
    let store = FileStore::create(&path).unwrap();

    let p = TrackerId::new("https://jira.example.com");
    let s = TrackerId::new("https://mantis.example.com");
    let bucket = Bucket::new(&p, &s, EntityKind::Issue);
    store.put(bucket.as_str(), "10001", "42").unwrap();

    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(
        raw["https://jira.example.com\thttps://mantis.example.com\tI"]["10001"],
        "42"
    );
}

#[test]
fn hand_written_store_file_is_readable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sync.db.json");
    std::fs::write(
        &path,
        r#"{"P\tS\tC": {"C1": "SC9"}, "S\tP\tC": {"SC9": "C1"}}"#,
    )
    .unwrap();

    let store = FileStore::open(&path).unwrap();
    assert_eq!(store.get("P\tS\tC", "C1").unwrap().as_deref(), Some("SC9"));
    assert_eq!(store.get("S\tP\tC", "SC9").unwrap().as_deref(), Some("C1"));
    assert_eq!(store.get("P\tS\tA", "C1").unwrap(), None);
}
