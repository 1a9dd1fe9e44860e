//! Entities and their property maps
//!
//! An [`Entity`] is an ordered mapping of property name to [`Value`] plus
//! three sibling metadata fields: its [`Key`] (absent for embedded entities),
//! the set of property names excluded from indexing, and the opaque version
//! token used for optimistic concurrency. Metadata never lives inside the
//! property map itself.

use crate::key::Key;
use crate::limits::MAX_INDEXED_VALUE_BYTES;
use crate::value::Value;
use std::collections::BTreeSet;

/// Ordered property mapping: iteration follows insertion order, replacing an
/// existing property keeps its position.
///
/// Equality is dictionary-like (order-insensitive): two maps are equal when
/// they hold the same name/value pairs.
#[derive(Debug, Clone, Default)]
pub struct PropertyMap {
    entries: Vec<(String, Value)>,
}

impl PropertyMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of properties.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map holds no properties.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert or replace a property. Replacement keeps the original position.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Look up a property by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Mutable lookup by name.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.entries
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Remove a property, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let idx = self.entries.iter().position(|(n, _)| n == name)?;
        Some(self.entries.remove(idx).1)
    }

    /// Whether a property exists.
    pub fn contains_key(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    /// Iterate properties in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Iterate with mutable values, in insertion order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut Value)> {
        self.entries.iter_mut().map(|(n, v)| (n.as_str(), v))
    }

    /// Property names in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }
}

impl PartialEq for PropertyMap {
    fn eq(&self, other: &Self) -> bool {
        self.entries.len() == other.entries.len()
            && self.entries.iter().all(|(n, v)| other.get(n) == Some(v))
    }
}

impl FromIterator<(String, Value)> for PropertyMap {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut map = PropertyMap::new();
        for (name, value) in iter {
            map.insert(name, value);
        }
        map
    }
}

impl IntoIterator for PropertyMap {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// One datastore entity.
///
/// Created by application code; the coordinator fills in the key when a
/// partial key is completed by the server and refreshes the version after
/// every successful mutation that returns one.
#[derive(Debug, Clone)]
pub struct Entity {
    key: Option<Key>,
    properties: PropertyMap,
    exclude_from_indexes: BTreeSet<String>,
    version: Option<u64>,
}

impl Entity {
    /// Create an entity addressed by `key`.
    pub fn new(key: Key) -> Self {
        Entity {
            key: Some(key),
            properties: PropertyMap::new(),
            exclude_from_indexes: BTreeSet::new(),
            version: None,
        }
    }

    /// Create an embedded entity (no key of its own).
    pub fn embedded() -> Self {
        Entity {
            key: None,
            properties: PropertyMap::new(),
            exclude_from_indexes: BTreeSet::new(),
            version: None,
        }
    }

    /// This entity's key, if any.
    pub fn key(&self) -> Option<&Key> {
        self.key.as_ref()
    }

    /// Replace the key. Used by the coordinator when the server assigns a
    /// generated id after a mutation.
    pub fn set_key(&mut self, key: Key) {
        self.key = Some(key);
    }

    /// Opaque version token from the last read or successful mutation.
    pub fn version(&self) -> Option<u64> {
        self.version
    }

    /// Refresh the version token. Set by the coordinator, not by callers.
    pub fn set_version(&mut self, version: Option<u64>) {
        self.version = version;
    }

    /// Insert or replace a property.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.properties.insert(name, value);
    }

    /// Look up a property by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    /// The ordered property map.
    pub fn properties(&self) -> &PropertyMap {
        &self.properties
    }

    /// Mutable access to the property map.
    pub fn properties_mut(&mut self) -> &mut PropertyMap {
        &mut self.properties
    }

    /// Property names excluded from indexing.
    pub fn exclude_from_indexes(&self) -> &BTreeSet<String> {
        &self.exclude_from_indexes
    }

    /// Mutable access to the exclusion set.
    pub fn exclude_from_indexes_mut(&mut self) -> &mut BTreeSet<String> {
        &mut self.exclude_from_indexes
    }
}

// Entities compare by key and properties. The exclusion set and version are
// transport metadata and do not participate in equality.
impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.properties == other.properties
    }
}

/// Recursively mark oversized property values as unindexable.
///
/// Any top-level property whose value contains a string or byte payload of
/// `MAX_INDEXED_VALUE_BYTES` (500) or more -- directly, inside a list, or
/// anywhere within a nested entity -- is added to `exclude_from_indexes`;
/// the remote store rejects the mutation otherwise. Nested entities are
/// normalized recursively as well so their own exclusion sets are correct.
///
/// Runs in place before every Put.
pub fn normalize_index_exclusions(entity: &mut Entity) {
    let mut oversized: Vec<String> = Vec::new();
    for (name, value) in entity.properties.iter_mut() {
        normalize_nested(value);
        if exceeds_index_limit(value) {
            oversized.push(name.to_owned());
        }
    }
    for name in oversized {
        entity.exclude_from_indexes.insert(name);
    }
}

fn normalize_nested(value: &mut Value) {
    match value {
        Value::Entity(inner) => normalize_index_exclusions(inner),
        Value::List(items) => {
            for item in items {
                normalize_nested(item);
            }
        }
        _ => {}
    }
}

fn exceeds_index_limit(value: &Value) -> bool {
    match value {
        Value::Str(s) => s.len() >= MAX_INDEXED_VALUE_BYTES,
        Value::Bytes(b) => b.len() >= MAX_INDEXED_VALUE_BYTES,
        Value::List(items) => items.iter().any(exceeds_index_limit),
        Value::Entity(inner) => inner.properties.iter().any(|(_, v)| exceeds_index_limit(v)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insertion_order_preserved() {
        let mut map = PropertyMap::new();
        map.insert("b", 1i64);
        map.insert("a", 2i64);
        map.insert("c", 3i64);
        map.insert("a", 9i64); // replacement keeps position
        let keys: Vec<_> = map.keys().collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
        assert_eq!(map.get("a"), Some(&Value::Int(9)));
    }

    #[test]
    fn test_map_equality_is_order_insensitive() {
        let mut a = PropertyMap::new();
        a.insert("x", 1i64);
        a.insert("y", 2i64);
        let mut b = PropertyMap::new();
        b.insert("y", 2i64);
        b.insert("x", 1i64);
        assert_eq!(a, b);
        b.insert("z", 3i64);
        assert_ne!(a, b);
    }

    #[test]
    fn test_entity_equality_ignores_metadata() {
        let mut a = Entity::new(Key::with_name("kind", "e"));
        a.insert("v", 1i64);
        let mut b = a.clone();
        b.set_version(Some(99));
        b.exclude_from_indexes_mut().insert("v".into());
        assert_eq!(a, b);
    }

    #[test]
    fn test_normalize_short_value_not_excluded() {
        let mut e = Entity::new(Key::with_name("kind", "e"));
        e.insert("short", "x".repeat(499));
        normalize_index_exclusions(&mut e);
        assert!(!e.exclude_from_indexes().contains("short"));
    }

    #[test]
    fn test_normalize_long_string_excluded() {
        let mut e = Entity::new(Key::with_name("kind", "e"));
        e.insert("long", "x".repeat(500));
        normalize_index_exclusions(&mut e);
        assert!(e.exclude_from_indexes().contains("long"));
    }

    #[test]
    fn test_normalize_long_bytes_excluded() {
        let mut e = Entity::new(Key::with_name("kind", "e"));
        e.insert("blob", vec![0u8; 500]);
        normalize_index_exclusions(&mut e);
        assert!(e.exclude_from_indexes().contains("blob"));
    }

    #[test]
    fn test_normalize_list_with_long_element_excluded() {
        let mut e = Entity::new(Key::with_name("kind", "e"));
        e.insert(
            "list",
            vec![Value::from("ok"), Value::from("y".repeat(600))],
        );
        normalize_index_exclusions(&mut e);
        assert!(e.exclude_from_indexes().contains("list"));
    }

    #[test]
    fn test_normalize_nested_entity_excludes_top_level() {
        let mut inner = Entity::embedded();
        inner.insert("payload", "z".repeat(700));
        let mut e = Entity::new(Key::with_name("kind", "e"));
        e.insert("nested", inner);
        normalize_index_exclusions(&mut e);
        // The top-level property is excluded, and the inner entity's own
        // exclusion set was normalized too.
        assert!(e.exclude_from_indexes().contains("nested"));
        let inner = e.get("nested").unwrap().as_entity().unwrap();
        assert!(inner.exclude_from_indexes().contains("payload"));
    }

    #[test]
    fn test_normalize_non_string_values_never_excluded() {
        let mut e = Entity::new(Key::with_name("kind", "e"));
        e.insert("n", i64::MAX);
        e.insert("f", 1.5f64);
        e.insert("b", true);
        normalize_index_exclusions(&mut e);
        assert!(e.exclude_from_indexes().is_empty());
    }
}
