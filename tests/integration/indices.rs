//! Index maintenance driven by store mutations

use crate::common::*;
use foliodb::prelude::*;
use std::fs;

#[test]
fn index_tracks_every_mutation_and_survives_rebuild() {
    let t = TestStore::new();
    let by_color = Index::new(t.handle(), "color", "color").unwrap();

    let a = t.store.create(&json!({"color": "red"})).unwrap();
    let b = t.store.create(&json!({"color": "blue"})).unwrap();
    let c = t.store.create(&json!({"color": "red"})).unwrap();
    t.store.save(&b, &json!({"color": "red"})).unwrap();
    t.store.save(&a, &json!({"shade": "none"})).unwrap();
    t.store.delete(&c).unwrap();

    assert_eq!(by_color.find("red").unwrap(), vec![b.clone()]);
    assert!(by_color.find("blue").unwrap().is_empty());

    by_color.rebuild().unwrap();

    assert_eq!(by_color.find("red").unwrap(), vec![b]);
    assert_eq!(by_color.keys().unwrap(), vec!["red"]);
}

#[test]
fn multi_key_document_leaves_every_key_on_delete() {
    let t = TestStore::new();
    let by_tag = Index::new(t.handle(), "tags", "tags").unwrap();

    let id = t.store.create(&json!({"tags": ["k1", "k2"]})).unwrap();
    assert_eq!(by_tag.find("k1").unwrap(), vec![id.clone()]);
    assert_eq!(by_tag.find("k2").unwrap(), vec![id.clone()]);

    t.store.delete(&id).unwrap();

    assert!(by_tag.find("k1").unwrap().is_empty());
    assert!(by_tag.find("k2").unwrap().is_empty());
    assert!(by_tag.is_empty().unwrap());
}

#[test]
fn slice_pages_over_sorted_keys() {
    let t = TestStore::new();
    let by_name = Index::new(t.handle(), "name", "name").unwrap();
    for name in ["foo", "bar", "baz"] {
        t.store.create(&json!({ "name": name })).unwrap();
    }

    let page: Vec<Document> = by_name
        .load_slice(1, Some(2))
        .unwrap()
        .into_iter()
        .filter_map(|(_, doc)| doc)
        .collect();

    assert_eq!(page, vec![json!({"name": "baz"}), json!({"name": "foo"})]);
    assert_eq!(by_name.slice(0, Some(1)).unwrap(), ids(&["2"]));
}

#[test]
fn two_indices_on_one_store_stay_independent() {
    let t = TestStore::new();
    let by_type = Index::new(t.handle(), "type", "type").unwrap();
    let by_owner = Index::new(t.handle(), "owner", "owner").unwrap();

    let id = t.store.create(&json!({"type": "post", "owner": "ann"})).unwrap();
    t.store.save(&id, &json!({"type": "post", "owner": "bob"})).unwrap();

    assert_eq!(by_type.find("post").unwrap(), vec![id.clone()]);
    assert!(by_owner.find("ann").unwrap().is_empty());
    assert_eq!(by_owner.find("bob").unwrap(), vec![id]);
    assert!(t.store.exists("_type_index"));
    assert!(t.store.exists("_owner_index"));
}

#[test]
fn repair_heals_damaged_index_state() {
    let t = TestStore::new();
    let by_type = Index::new(t.handle(), "type", "type").unwrap();
    for kind in ["a", "b", "a"] {
        t.store.create(&json!({ "type": kind })).unwrap();
    }

    // a writer died after splicing the forward map but before fixing offsets
    t.store
        .save(
            "_type_index",
            &json!({
                "name": "type",
                "type": "index",
                "map": {"a": ["3"], "b": ["2"]},
                "inverse": {"1": {"a": 0}, "2": {"b": 0}, "3": {"a": 1}}
            }),
        )
        .unwrap();
    by_type.reload().unwrap();
    assert!(matches!(
        t.store.delete("3"),
        Err(Error::Corruption(_))
    ));

    t.store.repair().unwrap();

    assert_eq!(by_type.find("a").unwrap(), ids(&["1"]));
    assert_eq!(by_type.find("b").unwrap(), ids(&["2"]));
}

#[test]
fn index_state_is_shared_through_the_directory() {
    let t = TestStore::new();
    let writer = Index::new(t.handle(), "type", "type").unwrap();
    t.store.create(&json!({"type": "x"})).unwrap();

    let other_store = t.reopen();
    let reader = Index::new(other_store, "type", "type").unwrap();
    assert_eq!(reader.find("x").unwrap(), ids(&["1"]));

    t.store.create(&json!({"type": "x"})).unwrap();
    assert_eq!(writer.find("x").unwrap(), ids(&["1", "2"]));
    // a cached reader sees the change once reloaded
    reader.reload().unwrap();
    assert_eq!(reader.find("x").unwrap(), ids(&["1", "2"]));

    let raw = fs::read(t.path().join("_type_index")).unwrap();
    let state: Document = serde_json::from_slice(&raw).unwrap();
    assert_eq!(state["type"], json!("index"));
}

#[test]
fn cache_reads_through_and_materializes_once() {
    let t = TestStore::new();
    for n in 0..4 {
        t.store.create(&json!({ "n": n })).unwrap();
    }
    let cache = Cache::new(t.handle());

    let mut total = 0;
    cache
        .each(|_, doc| total += doc.and_then(|d| d["n"].as_i64()).unwrap_or(0))
        .unwrap();
    assert_eq!(total, 6);
    assert!(cache.is_complete());

    t.store.save("1", &json!({"n": 100})).unwrap();
    assert_eq!(cache.load("1").unwrap(), Some(json!({"n": 0})));
    cache.invalidate("1");
    assert_eq!(cache.load("1").unwrap(), Some(json!({"n": 100})));
}
