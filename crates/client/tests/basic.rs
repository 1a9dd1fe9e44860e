//! Reads, writes and deletes against the in-memory emulator.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use nimbus_client::testing::Emulator;
use nimbus_client::{Config, Datastore, RetryPolicy};
use nimbus_core::limits::MAX_INDEXED_VALUE_BYTES;
use nimbus_core::{Entity, Key, PropertyMap, Value};

fn store() -> Datastore {
    Datastore::with_config(
        Arc::new(Emulator::new()),
        "test-project",
        Config::default(),
        RetryPolicy::immediate(3),
    )
}

#[test]
fn test_put_get_roundtrip_all_value_types() {
    let store = store();
    let mut nested = Entity::embedded();
    nested.insert("inner", "nested-value");
    nested.insert("depth", 2i64);

    let mut entity = Entity::new(Key::with_name("test-kind", "everything"));
    entity.insert("string", "hello");
    entity.insert("int", -42i64);
    entity.insert("float", 3.5f64);
    entity.insert("bool", false);
    entity.insert("null", Value::Null);
    entity.insert("bytes", b"\x00\xfe\xff".as_slice());
    entity.insert("when", Utc.with_ymd_and_hms(2023, 1, 2, 3, 4, 5).unwrap());
    entity.insert("ref", Key::with_id("other-kind", 7).with_parent(Key::with_name("root", "r")));
    entity.insert("nested", nested);
    entity.insert(
        "mixed",
        vec![Value::Int(1), Value::Str("two".into()), Value::Bool(true)],
    );
    store.put(&mut entity).unwrap();
    assert!(entity.version().is_some());

    let fetched = store
        .get(&Key::with_name("test-kind", "everything"))
        .unwrap()
        .unwrap();
    assert_eq!(fetched, entity);
    assert_eq!(fetched.version(), entity.version());
}

#[test]
fn test_put_completes_partial_key_in_place() {
    let store = store();
    let mut entity = Entity::new(Key::incomplete("test-kind"));
    entity.insert("value", 1i64);
    store.put(&mut entity).unwrap();

    let key = entity.key().unwrap().clone();
    assert!(key.is_complete());
    assert!(key.id().is_some());
    assert!(store.get(&key).unwrap().is_some());
}

#[test]
fn test_versions_increase_across_rewrites() {
    let store = store();
    let mut entity = Entity::new(Key::with_name("test-kind", "v"));
    entity.insert("value", 1i64);
    store.put(&mut entity).unwrap();
    let first = entity.version().unwrap();
    entity.insert("value", 2i64);
    store.put(&mut entity).unwrap();
    assert!(entity.version().unwrap() > first);
}

#[test]
fn test_get_missing_returns_none() {
    let store = store();
    assert!(store.get(&Key::with_name("test-kind", "nope")).unwrap().is_none());
}

#[test]
fn test_get_multi_aligns_to_input_order() {
    let store = store();
    for name in ["a", "b", "c"] {
        let mut entity = Entity::new(Key::with_name("test-kind", name));
        entity.insert("name", name);
        store.put(&mut entity).unwrap();
    }
    let keys = vec![
        Key::with_name("test-kind", "c"),
        Key::with_name("test-kind", "missing"),
        Key::with_name("test-kind", "a"),
        Key::with_name("test-kind", "b"),
    ];
    let results = store.get_multi(&keys).unwrap();
    assert_eq!(results.len(), 4);
    assert_eq!(results[0].as_ref().unwrap().get("name"), Some(&Value::from("c")));
    assert!(results[1].is_none());
    assert_eq!(results[2].as_ref().unwrap().get("name"), Some(&Value::from("a")));
    assert_eq!(results[3].as_ref().unwrap().get("name"), Some(&Value::from("b")));
}

#[test]
fn test_empty_multis_are_no_ops() {
    let store = store();
    assert!(store.get_multi(&[]).unwrap().is_empty());
    store.put_multi(&mut []).unwrap();
    store.delete_multi(&[]).unwrap();
}

#[test]
fn test_delete_missing_key_is_a_no_op() {
    let store = store();
    store.delete(&Key::with_name("test-kind", "never-existed")).unwrap();
}

#[test]
fn test_delete_removes_entity() {
    let store = store();
    let key = Key::with_name("test-kind", "doomed");
    let mut entity = Entity::new(key.clone());
    entity.insert("value", 1i64);
    store.put(&mut entity).unwrap();
    store.delete(&key).unwrap();
    assert!(store.get(&key).unwrap().is_none());
}

#[test]
fn test_oversized_string_marked_unindexable_on_put() {
    let store = store();
    let mut entity = Entity::new(Key::with_name("test-kind", "big"));
    entity.insert("large", "x".repeat(MAX_INDEXED_VALUE_BYTES));
    entity.insert("small", "y");
    store.put(&mut entity).unwrap();
    assert!(entity.exclude_from_indexes().contains("large"));
    assert!(!entity.exclude_from_indexes().contains("small"));

    // The exclusion survives the trip to the store and back.
    let fetched = store.get(entity.key().unwrap()).unwrap().unwrap();
    assert!(fetched.exclude_from_indexes().contains("large"));
}

#[test]
fn test_oversized_value_inside_list_marks_property() {
    let store = store();
    let mut entity = Entity::new(Key::with_name("test-kind", "biglist"));
    entity.insert(
        "items",
        vec![Value::from("short"), Value::from("z".repeat(600))],
    );
    store.put(&mut entity).unwrap();
    assert!(entity.exclude_from_indexes().contains("items"));
}

#[test]
fn test_oversized_nested_value_marks_top_level_property() {
    let store = store();
    let mut inner = Entity::embedded();
    inner.insert("payload", "w".repeat(600));
    let mut entity = Entity::new(Key::with_name("test-kind", "bignested"));
    entity.insert("wrapper", inner);
    store.put(&mut entity).unwrap();
    assert!(entity.exclude_from_indexes().contains("wrapper"));
}

#[test]
fn test_allocate_ids_returns_distinct_complete_keys() {
    let store = store();
    let keys = store.allocate_ids("test-kind", 5).unwrap();
    assert_eq!(keys.len(), 5);
    for key in &keys {
        assert!(key.is_complete());
        assert_eq!(key.kind(), "test-kind");
    }
    let mut ids: Vec<i64> = keys.iter().filter_map(Key::id).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 5);
}

#[test]
fn test_get_or_insert_creates_then_returns_existing() {
    let store = store();
    let key = Key::with_name("test-kind", "settings");
    let mut defaults = PropertyMap::new();
    defaults.insert("limit", 10i64);

    let created = store.get_or_insert(&key, defaults).unwrap();
    assert_eq!(created.get("limit"), Some(&Value::Int(10)));
    assert!(created.version().is_some());

    let mut other_defaults = PropertyMap::new();
    other_defaults.insert("limit", 99i64);
    let existing = store.get_or_insert(&key, other_defaults).unwrap();
    assert_eq!(existing.get("limit"), Some(&Value::Int(10)));
}

#[test]
fn test_urlsafe_token_addresses_same_entity() {
    let store = store();
    let key = Key::with_id("test-kind", 123).with_parent(Key::with_name("parent-kind", "p"));
    let mut entity = Entity::new(key.clone());
    entity.insert("value", 1i64);
    store.put(&mut entity).unwrap();

    let token = key.to_urlsafe(store.project_id());
    let decoded = Key::from_urlsafe(&token).unwrap();
    assert!(store.get(&decoded).unwrap().is_some());
}
