//! Record store behavior seen through the public API

use crate::common::*;
use foliodb::events::{BEFORE_SAVE, SAVED};
use foliodb::prelude::*;
use recording::Recorder;
use std::fs::{self, File};
use std::time::{Duration, SystemTime};

/// Event log shared with handlers
mod recording {
    use foliodb::prelude::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    pub struct Recorder(Arc<Mutex<Vec<String>>>);

    impl Recorder {
        pub fn attach(&self, store: &RecordStore, events: &str) {
            let sink = self.clone();
            store
                .on(
                    events,
                    move |event: &Event<'_>| {
                        let id = event.id.map(|id| id.to_string()).unwrap_or_default();
                        sink.0.lock().unwrap().push(format!("{}:{}", event.name, id));
                        Ok(())
                    },
                    0,
                )
                .unwrap();
        }

        pub fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.0.lock().unwrap())
        }
    }
}

// ============================================================================
// Round-trip
// ============================================================================

#[test]
fn documents_roundtrip_through_both_codecs() {
    let documents = [
        json!({}),
        json!({"guid": "x-1", "name": "foo", "n": -12, "f": 1.5, "ok": true}),
        json!({"nested": {"list": [1, "two", null, {"three": 3}]}}),
        json!([1, 2, 3]),
        json!("bare string"),
    ];

    for codec in ["json", "msgpack"] {
        let t = TestStore::with_config(StoreConfig {
            codec: codec.to_string(),
            ..StoreConfig::default()
        });
        for (n, doc) in documents.iter().enumerate() {
            let id = format!("doc{n}");
            t.store.save(id.as_str(), doc).unwrap();
            assert_eq!(t.store.load(id.as_str()).unwrap().as_ref(), Some(doc), "{codec}");
        }
    }
}

// ============================================================================
// Auto-increment
// ============================================================================

#[test]
fn create_ids_are_dense_and_increasing() {
    let t = TestStore::new();

    let created: Vec<u64> = (0..10)
        .map(|n| {
            let doc = if n % 2 == 0 { json!({}) } else { json!({"n": n}) };
            t.store.create(&doc).unwrap().as_u64().unwrap()
        })
        .collect();

    assert_eq!(created, (1..=10).collect::<Vec<u64>>());
    assert_eq!(sorted(t.store.ids().unwrap()).len(), 10);
}

#[test]
fn create_continues_after_reopen() {
    let t = TestStore::new();
    t.store.create(&json!({})).unwrap();
    t.store.create(&json!({})).unwrap();

    let other = t.reopen();

    assert_eq!(other.create(&json!({})).unwrap(), "3");
}

// ============================================================================
// Hidden ids
// ============================================================================

#[test]
fn hidden_ids_never_enumerated_or_announced() {
    let t = TestStore::new();
    let recorder = Recorder::default();
    recorder.attach(&t.store, "beforeSave saved beforeDelete deleted");

    t.store.save("_meta", &json!({"kind": "bookkeeping"})).unwrap();
    t.store.save("visible", &json!({"kind": "bookkeeping"})).unwrap();
    t.store.delete("_meta").unwrap();
    t.store.save("_meta", &json!({"kind": "bookkeeping"})).unwrap();

    assert_eq!(
        recorder.take(),
        vec!["beforeSave:visible", "saved:visible"]
    );
    assert_eq!(t.store.ids().unwrap(), ids(&["visible"]));
    let found = t
        .store
        .find(&Filter::equals(json!({"kind": "bookkeeping"})))
        .unwrap();
    assert_eq!(found.keys().cloned().collect::<Vec<_>>(), ids(&["visible"]));
    assert!(t.store.exists("_meta"));
}

// ============================================================================
// No-op write
// ============================================================================

#[test]
fn identical_save_touches_without_rewriting() {
    let t = TestStore::new();
    let recorder = Recorder::default();
    recorder.attach(&t.store, &format!("{BEFORE_SAVE},{SAVED}"));
    let doc = json!({"stable": [1, 2, 3]});
    let path = t.store.layout().path_for("same");

    t.store.save("same", &doc).unwrap();
    let past = SystemTime::now() - Duration::from_secs(3600);
    File::options()
        .write(true)
        .open(&path)
        .unwrap()
        .set_modified(past)
        .unwrap();
    let inode_bytes = fs::read(&path).unwrap();

    t.store.save("same", &doc).unwrap();

    assert_eq!(fs::read(&path).unwrap(), inode_bytes);
    assert!(fs::metadata(&path).unwrap().modified().unwrap() > past);
    assert_eq!(
        recorder.take(),
        vec!["beforeSave:same", "saved:same", "beforeSave:same", "saved:same"]
    );
}

// ============================================================================
// Handlers and errors
// ============================================================================

#[test]
fn priorities_order_handlers_and_errors_propagate() {
    let t = TestStore::new();
    let recorder = Recorder::default();
    recorder.attach(&t.store, "saved");
    t.store
        .on(
            "saved",
            |event: &Event<'_>| match event.document.and_then(|d| d.get("fail")) {
                Some(_) => Err(Error::Aborted("handler refused".into())),
                None => Ok(()),
            },
            10,
        )
        .unwrap();

    t.store.save("ok", &json!({})).unwrap();
    let failed = t.store.save("bad", &json!({"fail": true}));

    assert!(matches!(failed, Err(Error::Aborted(_))));
    // the high priority handler aborted the trigger before the recorder ran
    assert_eq!(recorder.take(), vec!["saved:ok"]);
    // the write itself had already happened
    assert!(t.store.exists("bad"));
}

#[test]
fn invalid_ids() {
    let t = TestStore::new();

    for bad in ["", ".", "..", "a/b", "a?b", "a*b", "a:b", "a;b", "a{b", "a}b", "a\\b"] {
        assert_eq!(t.store.load(bad).unwrap(), None, "{bad:?}");
        assert!(!t.store.exists(bad), "{bad:?}");
        assert!(matches!(t.store.save(bad, &json!({})), Err(Error::InvalidId(_))));
    }
}

#[test]
fn fanout_is_invisible_to_callers() {
    let t = TestStore::with_config(StoreConfig::with_fanout(3));

    t.store.save("abcdef", &json!(1)).unwrap();
    t.store.save("xy", &json!(2)).unwrap();
    let created = t.store.create(&json!(3)).unwrap();

    assert!(t.path().join("a/b/c/abcdef").is_file());
    assert_eq!(
        sorted(t.store.ids().unwrap()),
        sorted(vec![created.clone(), "abcdef".into(), "xy".into()])
    );
    assert_eq!(t.store.load(&created).unwrap(), Some(json!(3)));
    assert!(t.store.delete("abcdef").unwrap());
    assert!(!t.path().join("a/b/c/abcdef").exists());
}

#[test]
fn fanout_enumeration_covers_escaped_levels() {
    let t = TestStore::with_config(StoreConfig::with_fanout(2));
    let visible = ["abc", "a_b", "a.b", ".x", "ü1", "€"];
    for id in visible {
        t.store.save(id, &json!({"kind": "doc", "id": id})).unwrap();
    }
    t.store.save("_private", &json!({"kind": "doc"})).unwrap();

    assert_eq!(sorted(t.store.ids().unwrap()), sorted(ids(&visible)));
    assert_eq!(
        t.store
            .find(&Filter::equals(json!({"kind": "doc"})))
            .unwrap()
            .len(),
        visible.len()
    );

    let by_kind = Index::new(t.handle(), "kind", "kind").unwrap();
    by_kind.rebuild().unwrap();
    assert_eq!(sorted(by_kind.find("doc").unwrap()), sorted(ids(&visible)));

    let cache = Cache::new(t.handle());
    let mut cached = Vec::new();
    cache.each(|id, _| cached.push(id.clone())).unwrap();
    assert_eq!(cached, sorted(ids(&visible)));
}
