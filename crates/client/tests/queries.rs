//! Query engine behavior: filters, sort orders, cursors, distinct-on,
//! hooks and counting.

use std::sync::Arc;

use nimbus_client::testing::Emulator;
use nimbus_client::{Config, Datastore, RetryPolicy};
use nimbus_core::{Entity, Key, SortOrder, Value, KEY_SPECIAL_PROPERTY};

fn store() -> Datastore {
    Datastore::with_config(
        Arc::new(Emulator::new()),
        "test-project",
        Config::default(),
        RetryPolicy::immediate(3),
    )
}

/// Seed 25 entities: value 0..25, group value % 5, tags ["even"/"odd", "all"].
fn seeded() -> Datastore {
    let store = store();
    let mut entities: Vec<Entity> = (0..25i64)
        .map(|i| {
            let mut e = Entity::new(Key::with_name("test-kind", format!("e{i:02}")));
            e.insert("value", i);
            e.insert("group", i % 5);
            let parity = if i % 2 == 0 { "even" } else { "odd" };
            e.insert("tags", vec![Value::from(parity), Value::from("all")]);
            e
        })
        .collect();
    store.put_multi(&mut entities).unwrap();
    store
}

fn values(entities: &[Entity]) -> Vec<i64> {
    entities
        .iter()
        .map(|e| e.get("value").and_then(Value::as_int).unwrap())
        .collect()
}

#[test]
fn test_equality_filter() {
    let store = seeded();
    let results = store.query("test-kind").filter("value =", 7i64).run(10).unwrap();
    assert_eq!(values(&results), vec![7]);
}

#[test]
fn test_bare_property_spec_means_equality() {
    let store = seeded();
    let results = store.query("test-kind").filter("value", 7i64).run(10).unwrap();
    assert_eq!(values(&results), vec![7]);
}

#[test]
fn test_range_filters_combine() {
    let store = seeded();
    let results = store
        .query("test-kind")
        .filter("value >=", 5i64)
        .filter("value <", 8i64)
        .order(&[("value", SortOrder::Ascending)])
        .run(10)
        .unwrap();
    assert_eq!(values(&results), vec![5, 6, 7]);
}

#[test]
fn test_multivalued_property_equality_is_containment() {
    let store = seeded();
    let results = store
        .query("test-kind")
        .filter("tags =", "even")
        .order(&[("value", SortOrder::Ascending)])
        .run(30)
        .unwrap();
    assert_eq!(results.len(), 13);
    assert!(values(&results).iter().all(|v| v % 2 == 0));
}

#[test]
fn test_list_comparand_expands_to_conjunction() {
    let store = seeded();
    // Containment of both candidates: every entity tagged "all" and "odd".
    let results = store
        .query("test-kind")
        .filter("tags =", vec![Value::from("all"), Value::from("odd")])
        .run(30)
        .unwrap();
    assert_eq!(results.len(), 12);
}

#[test]
fn test_in_filter_matches_candidates() {
    let store = seeded();
    let results = store
        .query("test-kind")
        .filter("value IN", vec![Value::Int(3), Value::Int(17), Value::Int(99)])
        .order(&[("value", SortOrder::Ascending)])
        .run(30)
        .unwrap();
    assert_eq!(values(&results), vec![3, 17]);
}

#[test]
fn test_key_special_property_filter() {
    let store = seeded();
    let spec = format!("{KEY_SPECIAL_PROPERTY} =");
    let results = store
        .query("test-kind")
        .filter(&spec, Key::with_name("test-kind", "e03"))
        .run(10)
        .unwrap();
    assert_eq!(values(&results), vec![3]);
}

#[test]
fn test_four_sort_orders() {
    let store = seeded();
    let page: Vec<i64> = (0..5).collect();
    let reversed: Vec<i64> = (20..25).rev().collect();

    let asc = store
        .query("test-kind")
        .order(&[("value", SortOrder::Ascending)])
        .run(5)
        .unwrap();
    assert_eq!(values(&asc), page);

    let desc = store
        .query("test-kind")
        .order(&[("value", SortOrder::Descending)])
        .run(5)
        .unwrap();
    assert_eq!(values(&desc), reversed);

    // Inverted ascending walks the physically-descending result back to
    // front: the first page holds the highest values in ascending order.
    let inv_asc = store
        .query("test-kind")
        .order(&[("value", SortOrder::InvertedAscending)])
        .run(5)
        .unwrap();
    assert_eq!(values(&inv_asc), vec![20, 21, 22, 23, 24]);

    let inv_desc = store
        .query("test-kind")
        .order(&[("value", SortOrder::InvertedDescending)])
        .run(5)
        .unwrap();
    assert_eq!(values(&inv_desc), vec![4, 3, 2, 1, 0]);
}

#[test]
fn test_entities_missing_ordered_property_drop_out() {
    let store = seeded();
    let mut odd_one_out = Entity::new(Key::with_name("test-kind", "no-value"));
    odd_one_out.insert("other", 1i64);
    store.put(&mut odd_one_out).unwrap();

    let results = store
        .query("test-kind")
        .order(&[("value", SortOrder::Ascending)])
        .run(100)
        .unwrap();
    assert_eq!(results.len(), 25);
}

#[test]
fn test_cursor_pagination_walks_whole_result_set() {
    let store = seeded();
    let mut query = store
        .query("test-kind")
        .order(&[("value", SortOrder::Ascending)]);
    let mut seen = Vec::new();
    for _ in 0..5 {
        let page = query.run(5).unwrap();
        assert_eq!(page.len(), 5);
        seen.extend(values(&page));
        assert!(query.get_cursor().is_some());
    }
    assert_eq!(seen, (0..25).collect::<Vec<i64>>());

    // The set is exhausted: one more run comes back empty and the cursor
    // resets.
    assert!(query.run(5).unwrap().is_empty());
    assert!(query.get_cursor().is_none());
}

#[test]
fn test_exhausted_query_stays_empty_instead_of_replaying() {
    let store = seeded();
    let mut query = store
        .query("test-kind")
        .order(&[("value", SortOrder::Ascending)]);
    assert_eq!(query.run(30).unwrap().len(), 25);
    assert!(query.run(30).unwrap().is_empty());
    // Still terminal on the run after that; no replay from the start.
    assert!(query.run(30).unwrap().is_empty());
    assert!(query.get_cursor().is_none());

    // Re-arming with an explicit cursor resumes normally.
    let mut first = store
        .query("test-kind")
        .order(&[("value", SortOrder::Ascending)]);
    first.run(20).unwrap();
    let cursor = first.get_cursor().unwrap().to_owned();
    let mut rearmed = store
        .query("test-kind")
        .order(&[("value", SortOrder::Ascending)])
        .set_cursor(cursor, None);
    assert_eq!(values(&rearmed.run(30).unwrap()), (20..25).collect::<Vec<i64>>());
}

#[test]
fn test_cursor_resumes_in_fresh_query() {
    let store = seeded();
    let mut first = store
        .query("test-kind")
        .order(&[("value", SortOrder::Ascending)]);
    first.run(10).unwrap();
    let cursor = first.get_cursor().unwrap().to_owned();

    let mut resumed = store
        .query("test-kind")
        .order(&[("value", SortOrder::Ascending)])
        .set_cursor(cursor, None);
    let page = resumed.run(10).unwrap();
    assert_eq!(values(&page), (10..20).collect::<Vec<i64>>());
}

#[test]
fn test_inverted_and_descending_cursors_are_interchangeable() {
    let store = seeded();
    let mut descending = store
        .query("test-kind")
        .order(&[("value", SortOrder::Descending)]);
    descending.run(5).unwrap();
    let cursor = descending.get_cursor().unwrap().to_owned();

    // The physical order is the same, so a descending cursor resumes an
    // inverted-descending... the inverse: inverted ascending.
    let mut inverted = store
        .query("test-kind")
        .order(&[("value", SortOrder::InvertedAscending)])
        .set_cursor(cursor, None);
    let page = inverted.run(5).unwrap();
    assert_eq!(values(&page), vec![15, 16, 17, 18, 19]);
}

#[test]
fn test_distinct_on_collapses_groups() {
    let store = seeded();
    let results = store
        .query("test-kind")
        .order(&[("group", SortOrder::Ascending)])
        .distinct_on(&["group"])
        .run(30)
        .unwrap();
    let groups: Vec<i64> = results
        .iter()
        .map(|e| e.get("group").and_then(Value::as_int).unwrap())
        .collect();
    assert_eq!(groups, vec![0, 1, 2, 3, 4]);
}

#[test]
fn test_get_entry_returns_first_or_none() {
    let store = seeded();
    let first = store
        .query("test-kind")
        .order(&[("value", SortOrder::Ascending)])
        .get_entry()
        .unwrap()
        .unwrap();
    assert_eq!(first.get("value"), Some(&Value::Int(0)));

    let none = store
        .query("test-kind")
        .filter("value =", -1i64)
        .get_entry()
        .unwrap();
    assert!(none.is_none());
}

#[test]
fn test_filter_hook_rewrites_specs() {
    let store = seeded();
    let mut query = store.query("test-kind");
    query.set_filter_hook(Box::new(|spec, value| {
        // Transparent property indirection: callers filter on "score".
        Some((spec.replace("score", "value"), value))
    }));
    let results = query.filter("score =", 4i64).run(10).unwrap();
    assert_eq!(values(&results), vec![4]);
}

#[test]
fn test_filter_hook_can_drop_a_filter() {
    let store = seeded();
    let mut query = store.query("test-kind");
    query.set_filter_hook(Box::new(|spec, value| {
        if spec.starts_with("internal") {
            None
        } else {
            Some((spec.to_owned(), value))
        }
    }));
    let results = query.filter("internal =", 1i64).run(100).unwrap();
    assert_eq!(results.len(), 25);
}

#[test]
fn test_order_hook_rewrites_ordering() {
    let store = seeded();
    let mut query = store.query("test-kind");
    query.set_order_hook(Box::new(|orders| {
        orders
            .into_iter()
            .map(|(prop, dir)| (prop.replace("score", "value"), dir))
            .collect()
    }));
    let results = query
        .order(&[("score", SortOrder::Descending)])
        .run(3)
        .unwrap();
    assert_eq!(values(&results), vec![24, 23, 22]);
}

#[test]
fn test_count_with_and_without_bound() {
    let store = seeded();
    assert_eq!(store.query("test-kind").count(1000).unwrap(), 25);
    assert_eq!(store.query("test-kind").count(10).unwrap(), 10);
    assert_eq!(store.count(Some("test-kind"), None, None).unwrap(), 25);
    assert_eq!(store.count(Some("test-kind"), Some(7), None).unwrap(), 7);
}

#[test]
fn test_count_honors_filters() {
    let store = seeded();
    let query = store.query("test-kind").filter("value <", 10i64);
    assert_eq!(query.count(1000).unwrap(), 10);
    assert_eq!(
        store
            .count(Some("test-kind"), None, Some(query.definition()))
            .unwrap(),
        10
    );
    // No explicit kind: the definition's kind applies.
    assert_eq!(store.count(None, None, Some(query.definition())).unwrap(), 10);
}

#[test]
fn test_kind_isolation() {
    let store = seeded();
    let mut stray = Entity::new(Key::with_name("other-kind", "stray"));
    stray.insert("value", 1i64);
    store.put(&mut stray).unwrap();
    assert_eq!(store.query("other-kind").run(100).unwrap().len(), 1);
    assert_eq!(store.query("test-kind").run(100).unwrap().len(), 25);
}
