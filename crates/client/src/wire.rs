//! Wire protocol types
//!
//! Serde representations of the JSON bodies exchanged with the remote store,
//! plus the conversions between them and the core `Key`/`Value`/`Entity`
//! model. Integers travel as decimal strings, byte blobs as standard base64,
//! timestamps as RFC 3339 -- matching the remote REST protocol.
//!
//! Index-exclusion flags are carried per value; for list values the flag sits
//! on each element, which is how the remote API expects it.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use nimbus_core::{Entity, Error, Key, Result, Value};
use serde::{Deserialize, Serialize};

/// Serialize/deserialize `Option<i64>` as an optional decimal string.
mod opt_int64_str {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<i64>, ser: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => ser.serialize_some(&v.to_string()),
            None => ser.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Option<i64>, D::Error> {
        let raw: Option<String> = Option::deserialize(de)?;
        raw.map(|s| s.parse().map_err(serde::de::Error::custom))
            .transpose()
    }
}

/// Serialize/deserialize `Option<u64>` as an optional decimal string.
mod opt_uint64_str {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<u64>, ser: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => ser.serialize_some(&v.to_string()),
            None => ser.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Option<u64>, D::Error> {
        let raw: Option<String> = Option::deserialize(de)?;
        raw.map(|s| s.parse().map_err(serde::de::Error::custom))
            .transpose()
    }
}

/// Partition a key or query belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WirePartitionId {
    /// Project identifier.
    pub project_id: String,
}

/// One element of a key path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WirePathElement {
    /// Entity kind.
    pub kind: String,
    /// Numeric id, if assigned.
    #[serde(default, with = "opt_int64_str", skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// String name, if assigned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Wire form of a key: partition plus root-to-leaf path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireKey {
    /// Owning partition.
    pub partition_id: WirePartitionId,
    /// Path elements, root first.
    pub path: Vec<WirePathElement>,
}

/// Wire form of a list value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct WireArrayValue {
    /// Elements in order.
    #[serde(default)]
    pub values: Vec<WireValue>,
}

/// Wire form of one property value. Exactly one `*_value` field is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct WireValue {
    /// Null marker (`"NULL_VALUE"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub null_value: Option<String>,
    /// Boolean payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boolean_value: Option<bool>,
    /// Integer payload (decimal string on the wire).
    #[serde(
        default,
        with = "opt_int64_str",
        skip_serializing_if = "Option::is_none"
    )]
    pub integer_value: Option<i64>,
    /// Float payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub double_value: Option<f64>,
    /// Timestamp payload (RFC 3339).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_value: Option<DateTime<Utc>>,
    /// String payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string_value: Option<String>,
    /// Byte payload (standard base64).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob_value: Option<String>,
    /// Key payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_value: Option<WireKey>,
    /// Embedded entity payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_value: Option<Box<WireEntity>>,
    /// List payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub array_value: Option<WireArrayValue>,
    /// Excluded from indexing. On list values the flag sits per element.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_from_indexes: Option<bool>,
}

/// One named property of a wire entity. Kept as a pair list rather than a
/// JSON map so property order survives the trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireProperty {
    /// Property name.
    pub name: String,
    /// Property value.
    pub value: WireValue,
}

/// Wire form of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct WireEntity {
    /// Entity key; absent for embedded entities.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<WireKey>,
    /// Ordered properties.
    #[serde(default)]
    pub properties: Vec<WireProperty>,
}

/// An entity plus its version, as returned by lookups and queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityResult {
    /// The entity payload.
    pub entity: WireEntity,
    /// Version token at read time.
    #[serde(
        default,
        with = "opt_uint64_str",
        skip_serializing_if = "Option::is_none"
    )]
    pub version: Option<u64>,
}

/// Batched lookup request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupRequest {
    /// Keys to fetch.
    pub keys: Vec<WireKey>,
    /// Transaction to read under, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<String>,
}

/// Lookup response: found and missing sets in arbitrary order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct LookupResponse {
    /// Entities that exist.
    #[serde(default)]
    pub found: Vec<EntityResult>,
    /// Keys with no entity.
    #[serde(default)]
    pub missing: Vec<WireKey>,
}

/// One buffered mutation. Exactly one of insert/upsert/delete is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Mutation {
    /// Create; fails if the entity already exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insert: Option<WireEntity>,
    /// Create or replace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upsert: Option<WireEntity>,
    /// Remove by key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete: Option<WireKey>,
    /// Version the mutation is conditioned on: the commit aborts when the
    /// entity's current version differs.
    #[serde(
        default,
        with = "opt_uint64_str",
        skip_serializing_if = "Option::is_none"
    )]
    pub base_version: Option<u64>,
}

/// Commit mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommitMode {
    /// All mutations belong to one transaction.
    Transactional,
    /// Standalone batch outside any transaction.
    NonTransactional,
}

/// Commit request carrying the buffered mutations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitRequest {
    /// Commit mode.
    pub mode: CommitMode,
    /// Transaction handle, required in transactional mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<String>,
    /// Mutations in submission order.
    pub mutations: Vec<Mutation>,
}

/// Result of one mutation, aligned with submission order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MutationResult {
    /// Server-assigned key, present only when the mutation completed a
    /// partial key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<WireKey>,
    /// New version of the touched entity.
    #[serde(
        default,
        with = "opt_uint64_str",
        skip_serializing_if = "Option::is_none"
    )]
    pub version: Option<u64>,
}

/// Commit response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CommitResponse {
    /// One result per submitted mutation, in order.
    #[serde(default)]
    pub mutation_results: Vec<MutationResult>,
}

/// Options for beginning a read/write transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct BeginTransactionRequest {
    /// Continuation linkage: the handle of the transaction this one follows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_transaction: Option<String>,
}

/// Begin response carrying the opaque transaction handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeginTransactionResponse {
    /// Opaque handle for subsequent reads/commit/rollback.
    pub transaction: String,
}

/// Rollback request releasing a transaction handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackRequest {
    /// Handle to release.
    pub transaction: String,
}

/// Reference to a property in filters/orders/distinct clauses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyReference {
    /// Property name; `__key__` addresses the entity key.
    pub name: String,
}

/// Filter comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PropertyOperator {
    /// `=`
    Equal,
    /// `<`
    LessThan,
    /// `<=`
    LessThanOrEqual,
    /// `>`
    GreaterThan,
    /// `>=`
    GreaterThanOrEqual,
    /// `IN` (value is an array of candidates)
    In,
}

/// One property comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyFilter {
    /// Property to compare.
    pub property: PropertyReference,
    /// Comparison operator.
    pub op: PropertyOperator,
    /// Comparand.
    pub value: WireValue,
}

/// Physical sort direction sent to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    /// A -> Z.
    Ascending,
    /// Z -> A.
    Descending,
}

/// One ordering term.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyOrder {
    /// Property to order by.
    pub property: PropertyReference,
    /// Physical direction.
    pub direction: Direction,
}

/// Wire form of a query: a conjunction of property filters plus ordering,
/// distinct-on, cursors and limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct WireQuery {
    /// Kind to query; empty for kindless queries.
    #[serde(default)]
    pub kind: Vec<String>,
    /// Conjunction of property filters.
    #[serde(default)]
    pub filters: Vec<PropertyFilter>,
    /// Ordering terms in priority order.
    #[serde(default)]
    pub order: Vec<PropertyOrder>,
    /// Deduplicate on these properties.
    #[serde(default)]
    pub distinct_on: Vec<PropertyReference>,
    /// Resume after this cursor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_cursor: Option<String>,
    /// Stop at this cursor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_cursor: Option<String>,
    /// Page size.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<i32>,
}

/// Query request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunQueryRequest {
    /// Partition to query.
    pub partition_id: WirePartitionId,
    /// The query itself.
    pub query: WireQuery,
}

/// One page of query results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct QueryResultBatch {
    /// Matched entities in server order.
    #[serde(default)]
    pub entity_results: Vec<EntityResult>,
    /// Cursor after the last returned entity; empty when the result set is
    /// exhausted.
    #[serde(default)]
    pub end_cursor: String,
}

/// Query response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunQueryResponse {
    /// The result page.
    pub batch: QueryResultBatch,
}

/// Id-reservation request: each key is partial, one id per key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocateIdsRequest {
    /// Partial keys to complete.
    pub keys: Vec<WireKey>,
}

/// Id-reservation response: the same keys, completed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AllocateIdsResponse {
    /// Completed keys in request order.
    #[serde(default)]
    pub keys: Vec<WireKey>,
}

/// Count aggregation request: the query's filters apply, results are counted
/// server-side up to `up_to`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunAggregationRequest {
    /// Partition to query.
    pub partition_id: WirePartitionId,
    /// Filter/kind source; ordering and cursors are ignored.
    pub query: WireQuery,
    /// Upper bound for the count.
    pub up_to: i64,
}

/// Count aggregation response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunAggregationResponse {
    /// The (bounded) count.
    pub count: i64,
}

// ---------------------------------------------------------------------------
// Conversions between core and wire types
// ---------------------------------------------------------------------------

const NULL_MARKER: &str = "NULL_VALUE";

/// Convert a key into its wire form.
pub fn key_to_wire(key: &Key, project_id: &str) -> WireKey {
    WireKey {
        partition_id: WirePartitionId {
            project_id: project_id.to_owned(),
        },
        path: key
            .path()
            .into_iter()
            .map(|element| WirePathElement {
                kind: element.kind().to_owned(),
                id: element.id(),
                name: element.name().map(str::to_owned),
            })
            .collect(),
    }
}

/// Rebuild a key from its wire form. The partition is discarded; keys always
/// live in the caller's project.
pub fn key_from_wire(wire: &WireKey) -> Result<Key> {
    let mut key: Option<Key> = None;
    for element in &wire.path {
        let mut next = match (element.id, &element.name) {
            (Some(id), None) => Key::with_id(&element.kind, id),
            (None, Some(name)) => Key::with_name(&element.kind, name.clone()),
            (None, None) => Key::incomplete(&element.kind),
            (Some(_), Some(_)) => {
                return Err(Error::Protocol(
                    "wire key path element with both id and name".into(),
                ))
            }
        };
        if let Some(parent) = key {
            next = next.with_parent(parent);
        }
        key = Some(next);
    }
    key.ok_or_else(|| Error::Protocol("wire key with empty path".into()))
}

/// Convert one property value into its wire form.
///
/// `excluded` marks the value (or, for lists, each element) with the
/// index-exclusion flag.
pub fn value_to_wire(value: &Value, project_id: &str, excluded: bool) -> WireValue {
    let mut wire = WireValue::default();
    match value {
        Value::Null => wire.null_value = Some(NULL_MARKER.to_owned()),
        Value::Bool(b) => wire.boolean_value = Some(*b),
        Value::Int(i) => wire.integer_value = Some(*i),
        Value::Float(f) => wire.double_value = Some(*f),
        Value::Str(s) => wire.string_value = Some(s.clone()),
        Value::Bytes(b) => wire.blob_value = Some(BASE64.encode(b)),
        Value::DateTime(ts) => wire.timestamp_value = Some(*ts),
        Value::Key(k) => wire.key_value = Some(key_to_wire(k, project_id)),
        Value::Entity(e) => wire.entity_value = Some(Box::new(entity_to_wire(e, project_id))),
        Value::List(items) => {
            // The exclusion flag belongs on the elements, not the array.
            wire.array_value = Some(WireArrayValue {
                values: items
                    .iter()
                    .map(|item| value_to_wire(item, project_id, excluded))
                    .collect(),
            });
            return wire;
        }
    }
    if excluded {
        wire.exclude_from_indexes = Some(true);
    }
    wire
}

/// Rebuild a property value from its wire form, returning the value and
/// whether it carried the index-exclusion flag.
pub fn value_from_wire(wire: &WireValue) -> Result<(Value, bool)> {
    let excluded = wire.exclude_from_indexes.unwrap_or(false);
    if wire.null_value.is_some() {
        return Ok((Value::Null, excluded));
    }
    if let Some(b) = wire.boolean_value {
        return Ok((Value::Bool(b), excluded));
    }
    if let Some(i) = wire.integer_value {
        return Ok((Value::Int(i), excluded));
    }
    if let Some(f) = wire.double_value {
        return Ok((Value::Float(f), excluded));
    }
    if let Some(ts) = wire.timestamp_value {
        return Ok((Value::DateTime(ts), excluded));
    }
    if let Some(s) = &wire.string_value {
        return Ok((Value::Str(s.clone()), excluded));
    }
    if let Some(blob) = &wire.blob_value {
        let bytes = BASE64
            .decode(blob.as_bytes())
            .map_err(|e| Error::Serialization(format!("invalid blob value: {e}")))?;
        return Ok((Value::Bytes(bytes), excluded));
    }
    if let Some(k) = &wire.key_value {
        return Ok((Value::Key(key_from_wire(k)?), excluded));
    }
    if let Some(e) = &wire.entity_value {
        return Ok((Value::Entity(entity_from_wire(e)?), excluded));
    }
    if let Some(array) = &wire.array_value {
        let mut items = Vec::with_capacity(array.values.len());
        let mut any_excluded = excluded;
        for element in &array.values {
            let (value, element_excluded) = value_from_wire(element)?;
            any_excluded |= element_excluded;
            items.push(value);
        }
        return Ok((Value::List(items), any_excluded));
    }
    // A value with no payload field decodes as null.
    Ok((Value::Null, excluded))
}

/// Convert an entity into its wire form, attaching per-value exclusion flags
/// from the entity's exclusion set.
pub fn entity_to_wire(entity: &Entity, project_id: &str) -> WireEntity {
    WireEntity {
        key: entity.key().map(|k| key_to_wire(k, project_id)),
        properties: entity
            .properties()
            .iter()
            .map(|(name, value)| WireProperty {
                name: name.to_owned(),
                value: value_to_wire(
                    value,
                    project_id,
                    entity.exclude_from_indexes().contains(name),
                ),
            })
            .collect(),
    }
}

/// Rebuild an entity from its wire form, restoring the exclusion set from
/// per-value flags.
pub fn entity_from_wire(wire: &WireEntity) -> Result<Entity> {
    let mut entity = match &wire.key {
        Some(key) => Entity::new(key_from_wire(key)?),
        None => Entity::embedded(),
    };
    for property in &wire.properties {
        let (value, excluded) = value_from_wire(&property.value)?;
        if excluded {
            entity.exclude_from_indexes_mut().insert(property.name.clone());
        }
        entity.insert(property.name.clone(), value);
    }
    Ok(entity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const PROJECT: &str = "test-project";

    fn sample_entity() -> Entity {
        let mut nested = Entity::embedded();
        nested.insert("inner", "value");
        let mut entity = Entity::new(Key::with_name("test-kind", "test-entity"));
        entity.insert("str", "abc");
        entity.insert("int", -123456789i64);
        entity.insert("float", 0.25f64);
        entity.insert("bool", true);
        entity.insert("none", Value::Null);
        entity.insert("bytes", b"\x00\x01\xff".as_slice());
        entity.insert(
            "when",
            Utc.with_ymd_and_hms(2024, 5, 17, 12, 30, 45).unwrap(),
        );
        entity.insert("ref", Key::with_id("other-kind", 42));
        entity.insert("nested", nested);
        entity.insert(
            "list",
            vec![Value::Int(1), Value::Str("two".into()), Value::Null],
        );
        entity
    }

    #[test]
    fn test_entity_wire_roundtrip() {
        let entity = sample_entity();
        let wire = entity_to_wire(&entity, PROJECT);
        let back = entity_from_wire(&wire).unwrap();
        assert_eq!(back, entity);
    }

    #[test]
    fn test_property_order_survives() {
        let entity = sample_entity();
        let wire = entity_to_wire(&entity, PROJECT);
        let names: Vec<_> = wire.properties.iter().map(|p| p.name.as_str()).collect();
        let original: Vec<_> = entity.properties().keys().collect();
        assert_eq!(names, original);
    }

    #[test]
    fn test_exclusion_flag_roundtrip() {
        let mut entity = Entity::new(Key::with_name("test-kind", "e"));
        entity.insert("big", "x".repeat(600));
        entity.exclude_from_indexes_mut().insert("big".into());
        let wire = entity_to_wire(&entity, PROJECT);
        assert_eq!(wire.properties[0].value.exclude_from_indexes, Some(true));
        let back = entity_from_wire(&wire).unwrap();
        assert!(back.exclude_from_indexes().contains("big"));
    }

    #[test]
    fn test_list_exclusion_sits_on_elements() {
        let mut entity = Entity::new(Key::with_name("test-kind", "e"));
        entity.insert(
            "list",
            vec![Value::from("a".repeat(600)), Value::from("b".repeat(600))],
        );
        entity.exclude_from_indexes_mut().insert("list".into());
        let wire = entity_to_wire(&entity, PROJECT);
        let value = &wire.properties[0].value;
        assert_eq!(value.exclude_from_indexes, None);
        let array = value.array_value.as_ref().unwrap();
        assert!(array
            .values
            .iter()
            .all(|v| v.exclude_from_indexes == Some(true)));
        let back = entity_from_wire(&wire).unwrap();
        assert!(back.exclude_from_indexes().contains("list"));
    }

    #[test]
    fn test_integer_travels_as_string() {
        let wire = value_to_wire(&Value::Int(9007199254740993), PROJECT, false);
        let json = serde_json::to_value(&wire).unwrap();
        assert_eq!(json["integerValue"], "9007199254740993");
        let parsed: WireValue = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.integer_value, Some(9007199254740993));
    }

    #[test]
    fn test_blob_travels_as_base64() {
        let wire = value_to_wire(&Value::Bytes(vec![0, 255, 16]), PROJECT, false);
        let json = serde_json::to_value(&wire).unwrap();
        assert_eq!(json["blobValue"], BASE64.encode([0u8, 255, 16]));
    }

    #[test]
    fn test_partial_key_wire_roundtrip() {
        let key = Key::incomplete("test-kind").with_parent(Key::with_id("parent", 9));
        let wire = key_to_wire(&key, PROJECT);
        assert_eq!(wire.path.len(), 2);
        assert_eq!(wire.path[1].id, None);
        assert_eq!(wire.path[1].name, None);
        assert_eq!(key_from_wire(&wire).unwrap(), key);
    }

    #[test]
    fn test_wire_key_digit_name_normalizes() {
        let wire = WireKey {
            partition_id: WirePartitionId {
                project_id: PROJECT.into(),
            },
            path: vec![WirePathElement {
                kind: "test-kind".into(),
                id: None,
                name: Some("314".into()),
            }],
        };
        assert_eq!(key_from_wire(&wire).unwrap(), Key::with_id("test-kind", 314));
    }

    #[test]
    fn test_empty_list_roundtrip() {
        let mut entity = Entity::new(Key::with_name("test-kind", "e"));
        entity.insert("testlist", Vec::<Value>::new());
        let wire = entity_to_wire(&entity, PROJECT);
        let back = entity_from_wire(&wire).unwrap();
        assert_eq!(back.get("testlist"), Some(&Value::List(vec![])));
    }
}
