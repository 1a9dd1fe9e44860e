//! Data-access logging across the client surface.

use std::sync::Arc;

use nimbus_client::testing::Emulator;
use nimbus_client::{
    end_data_access_log, start_data_access_log, AccessEntry, Config, Datastore, RetryPolicy,
};
use nimbus_core::{Entity, Key, Value};

fn store() -> Datastore {
    Datastore::with_config(
        Arc::new(Emulator::new()),
        "test-project",
        Config::default(),
        RetryPolicy::immediate(3),
    )
}

#[test]
fn test_reads_and_writes_log_their_keys() {
    let store = store();
    let key = Key::with_name("test-kind", "logged");
    let mut entity = Entity::new(key.clone());
    entity.insert("value", 1i64);
    store.put(&mut entity).unwrap();

    let outer = start_data_access_log();
    store.get(&key).unwrap();
    store.delete(&key).unwrap();
    let log = end_data_access_log(outer).unwrap();
    assert_eq!(log.len(), 1);
    assert!(log.contains(&AccessEntry::Key(key)));
}

#[test]
fn test_put_logs_complete_keys_only() {
    let store = store();
    let outer = start_data_access_log();
    let mut named = Entity::new(Key::with_name("test-kind", "named"));
    named.insert("value", 1i64);
    store.put(&mut named).unwrap();
    let mut partial = Entity::new(Key::incomplete("test-kind"));
    partial.insert("value", 2i64);
    store.put(&mut partial).unwrap();
    let log = end_data_access_log(outer).unwrap();
    // The partial key identified nothing at log time.
    assert_eq!(log.len(), 1);
    assert!(log.contains(&AccessEntry::Key(Key::with_name("test-kind", "named"))));
}

#[test]
fn test_queries_log_their_kind() {
    let store = store();
    let outer = start_data_access_log();
    store.query("test-kind").filter("value =", 1i64).run(10).unwrap();
    store.count(Some("other-kind"), None, None).unwrap();
    let log = end_data_access_log(outer).unwrap();
    assert!(log.contains(&AccessEntry::Kind("test-kind".into())));
    assert!(log.contains(&AccessEntry::Kind("other-kind".into())));
}

#[test]
fn test_transactional_access_is_logged_too() {
    let store = store();
    let key = Key::with_name("test-kind", "txn-logged");
    let outer = start_data_access_log();
    store
        .run_in_transaction(|txn| {
            txn.get(&key)?;
            let mut entity = Entity::new(key.clone());
            entity.insert("value", Value::Int(1));
            txn.put(entity);
            Ok(())
        })
        .unwrap();
    let log = end_data_access_log(outer).unwrap();
    assert!(log.contains(&AccessEntry::Key(key)));
}

#[test]
fn test_nested_log_scopes_restore_and_merge() {
    let store = store();
    let key_a = Key::with_name("test-kind", "a");
    let key_b = Key::with_name("test-kind", "b");

    let outer = start_data_access_log();
    store.get(&key_a).unwrap();
    let inner_outer = start_data_access_log();
    store.get(&key_b).unwrap();
    let inner = end_data_access_log(inner_outer).unwrap();
    assert_eq!(inner.len(), 1);
    assert!(inner.contains(&AccessEntry::Key(key_b.clone())));

    let full = end_data_access_log(outer).unwrap();
    assert!(full.contains(&AccessEntry::Key(key_a)));
    assert!(full.contains(&AccessEntry::Key(key_b)));
}

#[test]
fn test_no_log_collected_outside_a_scope() {
    let store = store();
    store.get(&Key::with_name("test-kind", "unlogged")).unwrap();
    let outer = start_data_access_log();
    let log = end_data_access_log(outer).unwrap();
    assert!(log.is_empty());
}
