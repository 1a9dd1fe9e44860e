//! In-process stand-in for the remote store.

use std::collections::HashMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use nimbus_core::{Entity, Error, IdOrName, Key, Result, RpcStatus, Value, KEY_SPECIAL_PROPERTY};
use parking_lot::Mutex;

use crate::transport::Transport;
use crate::wire::{
    entity_from_wire, entity_to_wire, key_from_wire, key_to_wire, value_from_wire,
    AllocateIdsRequest, AllocateIdsResponse, BeginTransactionRequest, BeginTransactionResponse,
    CommitMode, CommitRequest, CommitResponse, Direction, EntityResult, LookupRequest,
    LookupResponse, Mutation, MutationResult, PropertyFilter, PropertyOperator,
    QueryResultBatch, RollbackRequest, RunAggregationRequest, RunAggregationResponse,
    RunQueryRequest, RunQueryResponse, WireQuery,
};

const PROJECT: &str = "emulator";

#[derive(Clone)]
struct StoredEntity {
    entity: Entity,
    version: u64,
}

#[derive(Default)]
struct TxnState {
    // Version each key had when this transaction read it; 0 means absent.
    reads: HashMap<Key, u64>,
}

#[derive(Default)]
struct Inner {
    entities: HashMap<Key, StoredEntity>,
    transactions: HashMap<String, TxnState>,
    next_version: u64,
    next_id: i64,
    next_txn: u64,
}

/// Versioned in-memory store implementing the full transport surface.
///
/// Transactions track the versions they read; a commit whose read set or
/// conditioned writes are stale fails with [`RpcStatus::Aborted`], the way
/// real contention surfaces.
#[derive(Default)]
pub struct Emulator {
    inner: Mutex<Inner>,
}

impl Emulator {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entities, across all kinds.
    pub fn entity_count(&self) -> usize {
        self.inner.lock().entities.len()
    }

    /// Whether an entity exists at `key`.
    pub fn contains(&self, key: &Key) -> bool {
        self.inner.lock().entities.contains_key(key)
    }
}

impl Transport for Emulator {
    fn begin_transaction(&self, _req: BeginTransactionRequest) -> Result<BeginTransactionResponse> {
        let mut inner = self.inner.lock();
        inner.next_txn += 1;
        let handle = format!("txn-{}", inner.next_txn);
        inner.transactions.insert(handle.clone(), TxnState::default());
        Ok(BeginTransactionResponse { transaction: handle })
    }

    fn commit(&self, req: CommitRequest) -> Result<CommitResponse> {
        let mut inner = self.inner.lock();
        if req.mode == CommitMode::Transactional {
            let handle = req
                .transaction
                .as_deref()
                .ok_or_else(|| Error::Protocol("transactional commit without a handle".into()))?;
            let state = inner.transactions.remove(handle).ok_or_else(|| {
                Error::rpc(RpcStatus::InvalidArgument, "unknown transaction handle")
            })?;
            for (key, read_version) in &state.reads {
                let current = inner.entities.get(key).map_or(0, |s| s.version);
                if current != *read_version {
                    return Err(Error::rpc(
                        RpcStatus::Aborted,
                        format!("read of {key:?} is stale"),
                    ));
                }
            }
        }
        // Validate every conditioned write before applying anything; the
        // batch is atomic.
        for mutation in &req.mutations {
            validate_mutation(&inner, mutation)?;
        }
        let mut results = Vec::with_capacity(req.mutations.len());
        for mutation in &req.mutations {
            results.push(apply_mutation(&mut inner, mutation)?);
        }
        Ok(CommitResponse {
            mutation_results: results,
        })
    }

    fn rollback(&self, req: RollbackRequest) -> Result<()> {
        self.inner.lock().transactions.remove(&req.transaction);
        Ok(())
    }

    fn lookup(&self, req: LookupRequest) -> Result<LookupResponse> {
        let mut inner = self.inner.lock();
        let mut found = Vec::new();
        let mut missing = Vec::new();
        for wire_key in &req.keys {
            let key = key_from_wire(wire_key)?;
            let stored = inner.entities.get(&key).cloned();
            if let Some(handle) = &req.transaction {
                let version = stored.as_ref().map_or(0, |s| s.version);
                inner
                    .transactions
                    .get_mut(handle)
                    .ok_or_else(|| {
                        Error::rpc(RpcStatus::InvalidArgument, "unknown transaction handle")
                    })?
                    .reads
                    .insert(key.clone(), version);
            }
            match stored {
                Some(stored) => found.push(EntityResult {
                    entity: entity_to_wire(&stored.entity, PROJECT),
                    version: Some(stored.version),
                }),
                None => missing.push(wire_key.clone()),
            }
        }
        Ok(LookupResponse { found, missing })
    }

    fn run_query(&self, req: RunQueryRequest) -> Result<RunQueryResponse> {
        let inner = self.inner.lock();
        let matches = evaluate(&inner, &req.query)?;

        let start = match &req.query.start_cursor {
            Some(cursor) => decode_cursor(cursor)?,
            None => 0,
        };
        let end = match &req.query.end_cursor {
            Some(cursor) => decode_cursor(cursor)?.min(matches.len()),
            None => matches.len(),
        };
        let limit = req.query.limit.map_or(usize::MAX, |l| l.max(0) as usize);
        let page: Vec<&StoredEntity> = matches
            .iter()
            .skip(start)
            .take(end.saturating_sub(start.min(end)).min(limit))
            .copied()
            .collect();

        let entity_results = page
            .iter()
            .map(|stored| EntityResult {
                entity: entity_to_wire(&stored.entity, PROJECT),
                version: Some(stored.version),
            })
            .collect::<Vec<_>>();
        Ok(RunQueryResponse {
            batch: QueryResultBatch {
                end_cursor: encode_cursor(start + entity_results.len()),
                entity_results,
            },
        })
    }

    fn allocate_ids(&self, req: AllocateIdsRequest) -> Result<AllocateIdsResponse> {
        let mut inner = self.inner.lock();
        let mut keys = Vec::with_capacity(req.keys.len());
        for wire_key in &req.keys {
            let key = key_from_wire(wire_key)?;
            if key.is_complete() {
                return Err(Error::rpc(
                    RpcStatus::InvalidArgument,
                    "cannot allocate an id for a complete key",
                ));
            }
            inner.next_id += 1;
            let mut completed = Key::with_id(key.kind(), inner.next_id);
            if let Some(parent) = key.parent() {
                completed = completed.with_parent(parent.clone());
            }
            keys.push(key_to_wire(&completed, PROJECT));
        }
        Ok(AllocateIdsResponse { keys })
    }

    fn run_aggregation(&self, req: RunAggregationRequest) -> Result<RunAggregationResponse> {
        let inner = self.inner.lock();
        let matches = evaluate(&inner, &req.query)?;
        Ok(RunAggregationResponse {
            count: (matches.len() as i64).min(req.up_to.max(0)),
        })
    }
}

fn validate_mutation(inner: &Inner, mutation: &Mutation) -> Result<()> {
    if let Some(wire) = &mutation.insert {
        let key = mutation_key(wire.key.as_ref())?;
        if key.is_complete() && inner.entities.contains_key(&key) {
            return Err(Error::rpc(
                RpcStatus::FailedPrecondition,
                format!("entity already exists at {key:?}"),
            ));
        }
    }
    if let Some(base) = mutation.base_version {
        let target = mutation
            .upsert
            .as_ref()
            .or(mutation.insert.as_ref())
            .map(|wire| mutation_key(wire.key.as_ref()))
            .transpose()?;
        if let Some(key) = target {
            let current = inner.entities.get(&key).map_or(0, |s| s.version);
            if current != base {
                return Err(Error::rpc(
                    RpcStatus::Aborted,
                    format!("base version {base} is stale for {key:?}"),
                ));
            }
        }
    }
    Ok(())
}

fn apply_mutation(inner: &mut Inner, mutation: &Mutation) -> Result<MutationResult> {
    inner.next_version += 1;
    let version = inner.next_version;
    if let Some(wire_key) = &mutation.delete {
        let key = key_from_wire(wire_key)?;
        inner.entities.remove(&key);
        return Ok(MutationResult {
            key: None,
            version: Some(version),
        });
    }
    let wire = mutation
        .upsert
        .as_ref()
        .or(mutation.insert.as_ref())
        .ok_or_else(|| Error::Protocol("mutation with no operation".into()))?;
    let mut entity = entity_from_wire(wire)?;
    let mut assigned = None;
    let key = match entity.key() {
        Some(key) if key.is_complete() => key.clone(),
        Some(partial) => {
            inner.next_id += 1;
            let mut completed = Key::with_id(partial.kind(), inner.next_id);
            if let Some(parent) = partial.parent() {
                completed = completed.with_parent(parent.clone());
            }
            assigned = Some(completed.clone());
            completed
        }
        None => return Err(Error::Protocol("mutation entity without a key".into())),
    };
    entity.set_key(key.clone());
    entity.set_version(Some(version));
    inner.entities.insert(key, StoredEntity { entity, version });
    Ok(MutationResult {
        key: assigned.map(|k| key_to_wire(&k, PROJECT)),
        version: Some(version),
    })
}

fn mutation_key(wire: Option<&crate::wire::WireKey>) -> Result<Key> {
    key_from_wire(wire.ok_or_else(|| Error::Protocol("mutation entity without a key".into()))?)
}

/// Evaluate a query against the store: filter, order, distinct. Cursors and
/// limits are applied by the caller over the full ordered result.
fn evaluate<'a>(inner: &'a Inner, query: &WireQuery) -> Result<Vec<&'a StoredEntity>> {
    let mut filters = Vec::with_capacity(query.filters.len());
    for filter in &query.filters {
        let (value, _) = value_from_wire(&filter.value)?;
        filters.push((filter, value));
    }

    let mut matches: Vec<&StoredEntity> = inner
        .entities
        .values()
        .filter(|stored| {
            if let Some(kind) = query.kind.first() {
                let entity_kind = stored.entity.key().map(Key::kind);
                if entity_kind != Some(kind.as_str()) {
                    return false;
                }
            }
            filters
                .iter()
                .all(|(filter, value)| matches_filter(&stored.entity, filter, value))
        })
        .collect();

    // Deterministic base order, then the requested terms (stable sort).
    matches.sort_by(|a, b| cmp_keys(a.entity.key(), b.entity.key()));
    if !query.order.is_empty() {
        // Entities missing an ordered property drop out of the result.
        matches.retain(|stored| {
            query
                .order
                .iter()
                .all(|term| property_for(&stored.entity, &term.property.name).is_some())
        });
        matches.sort_by(|a, b| {
            for term in &query.order {
                let left = property_for(&a.entity, &term.property.name);
                let right = property_for(&b.entity, &term.property.name);
                let mut ordering = cmp_opt_values(&left, &right);
                if term.direction == Direction::Descending {
                    ordering = ordering.reverse();
                }
                if ordering != std::cmp::Ordering::Equal {
                    return ordering;
                }
            }
            std::cmp::Ordering::Equal
        });
    }

    if !query.distinct_on.is_empty() {
        let mut seen = Vec::new();
        matches.retain(|stored| {
            let signature: Vec<Option<Value>> = query
                .distinct_on
                .iter()
                .map(|p| property_for(&stored.entity, &p.name))
                .collect();
            if seen.contains(&signature) {
                false
            } else {
                seen.push(signature);
                true
            }
        });
    }
    Ok(matches)
}

/// Resolve a property for filtering/ordering; `__key__` addresses the key.
fn property_for(entity: &Entity, name: &str) -> Option<Value> {
    if name == KEY_SPECIAL_PROPERTY {
        return entity.key().cloned().map(Value::Key);
    }
    entity.get(name).cloned()
}

fn matches_filter(entity: &Entity, filter: &PropertyFilter, comparand: &Value) -> bool {
    let Some(stored) = property_for(entity, &filter.property.name) else {
        return false;
    };
    match filter.op {
        PropertyOperator::In => {
            let Value::List(candidates) = comparand else {
                return false;
            };
            candidates.iter().any(|c| value_satisfies(&stored, c, PropertyOperator::Equal))
        }
        op => value_satisfies(&stored, comparand, op),
    }
}

/// A multi-valued property satisfies a comparison when any element does.
fn value_satisfies(stored: &Value, comparand: &Value, op: PropertyOperator) -> bool {
    if let Value::List(elements) = stored {
        return elements.iter().any(|e| value_satisfies(e, comparand, op));
    }
    match op {
        PropertyOperator::Equal => stored == comparand,
        PropertyOperator::In => unreachable!("IN is expanded by matches_filter"),
        _ => {
            let Some(ordering) = cmp_comparable(stored, comparand) else {
                return false;
            };
            match op {
                PropertyOperator::LessThan => ordering.is_lt(),
                PropertyOperator::LessThanOrEqual => ordering.is_le(),
                PropertyOperator::GreaterThan => ordering.is_gt(),
                PropertyOperator::GreaterThanOrEqual => ordering.is_ge(),
                _ => unreachable!(),
            }
        }
    }
}

/// Cross-type rank used when ordering mixed values.
fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Int(_) | Value::Float(_) => 2,
        Value::DateTime(_) => 3,
        Value::Str(_) => 4,
        Value::Bytes(_) => 5,
        Value::Key(_) => 6,
        Value::Entity(_) => 7,
        Value::List(_) => 8,
    }
}

/// Compare two values of a comparable pairing; `None` when the types do not
/// order against each other (inequality filters then reject the entity).
fn cmp_comparable(left: &Value, right: &Value) -> Option<std::cmp::Ordering> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
        (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
        (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
        (Value::Key(a), Value::Key(b)) => Some(cmp_keys(Some(a), Some(b))),
        _ => None,
    }
}

/// Total order over values for sorting: by type rank, then within the type.
fn cmp_values(left: &Value, right: &Value) -> std::cmp::Ordering {
    type_rank(left)
        .cmp(&type_rank(right))
        .then_with(|| cmp_comparable(left, right).unwrap_or(std::cmp::Ordering::Equal))
}

fn cmp_opt_values(left: &Option<Value>, right: &Option<Value>) -> std::cmp::Ordering {
    match (left, right) {
        (Some(a), Some(b)) => cmp_values(a, b),
        (None, None) => std::cmp::Ordering::Equal,
        (None, Some(_)) => std::cmp::Ordering::Less,
        (Some(_), None) => std::cmp::Ordering::Greater,
    }
}

/// Order keys by path: kind, then ids before names.
fn cmp_keys(left: Option<&Key>, right: Option<&Key>) -> std::cmp::Ordering {
    let left_path: Vec<_> = left.map(Key::path).unwrap_or_default();
    let right_path: Vec<_> = right.map(Key::path).unwrap_or_default();
    for (a, b) in left_path.iter().zip(&right_path) {
        let element = a.kind().cmp(b.kind()).then_with(|| {
            match (a.id_or_name(), b.id_or_name()) {
                (Some(IdOrName::Id(x)), Some(IdOrName::Id(y))) => x.cmp(&y),
                (Some(IdOrName::Name(x)), Some(IdOrName::Name(y))) => x.cmp(&y),
                (Some(IdOrName::Id(_)), Some(IdOrName::Name(_))) => std::cmp::Ordering::Less,
                (Some(IdOrName::Name(_)), Some(IdOrName::Id(_))) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
                (None, Some(_)) => std::cmp::Ordering::Less,
                (Some(_), None) => std::cmp::Ordering::Greater,
            }
        });
        if element != std::cmp::Ordering::Equal {
            return element;
        }
    }
    left_path.len().cmp(&right_path.len())
}

fn encode_cursor(offset: usize) -> String {
    URL_SAFE_NO_PAD.encode(offset.to_string())
}

fn decode_cursor(cursor: &str) -> Result<usize> {
    let bytes = URL_SAFE_NO_PAD
        .decode(cursor)
        .map_err(|_| Error::rpc(RpcStatus::InvalidArgument, "malformed cursor"))?;
    String::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::rpc(RpcStatus::InvalidArgument, "malformed cursor"))
}
