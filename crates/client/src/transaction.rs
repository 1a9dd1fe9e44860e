//! Transaction coordinator.
//!
//! A [`Transaction`] is an explicit context object handed to the closure run
//! by [`Datastore::run_in_transaction`](crate::Datastore::run_in_transaction).
//! Reads go straight through the transport under the transaction's handle;
//! writes are buffered as wire mutations and applied in one atomic commit.
//! The thread-local binding in [`crate::context`] only tracks which handles
//! are active, for nesting detection and continuation linkage.
//!
//! Commit failures classified as contention are retried with a bounded
//! attempt counter and doubling backoff: a fresh handle is obtained (linked
//! to the failed one) and the same buffered mutations are re-sent. Buffered
//! upserts carry the version the entity was read at, so a stale re-send
//! fails instead of silently overwriting a concurrent update.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::thread;

use chrono::Utc;
use nimbus_core::{normalize_index_exclusions, Entity, Error, Key, PropertyMap, Result};
use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::context;
use crate::transport::Transport;
use crate::wire::{
    entity_from_wire, entity_to_wire, key_from_wire, key_to_wire, BeginTransactionRequest,
    CommitMode, CommitRequest, LookupRequest, Mutation, MutationResult, RollbackRequest,
};

/// Kind of the probe entity written by [`Transaction::acquire_success_marker`].
pub const TRANSACTION_MARKER_KIND: &str = "transaction-marker";

/// Options controlling how a transaction begins.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransactionOptions {
    /// Allow beginning while another transaction is active on this thread.
    /// The new transaction is linked to the active one as its continuation.
    pub allow_nested: bool,
}

/// Shared handle to an entity buffered for write.
///
/// Returned by [`Transaction::put`]; after the commit succeeds the
/// server-assigned key and version are visible through it.
#[derive(Clone)]
pub struct PendingEntity {
    inner: Rc<RefCell<Entity>>,
}

impl PendingEntity {
    fn new(entity: Entity) -> Self {
        Self {
            inner: Rc::new(RefCell::new(entity)),
        }
    }

    /// The entity's key, once complete.
    pub fn key(&self) -> Option<Key> {
        self.inner.borrow().key().cloned()
    }

    /// The entity's version after commit.
    pub fn version(&self) -> Option<u64> {
        self.inner.borrow().version()
    }

    /// A snapshot of the buffered entity.
    pub fn entity(&self) -> Entity {
        self.inner.borrow().clone()
    }
}

/// Write the server-reported key/version of one mutation back onto the
/// entity it affected.
pub(crate) fn apply_mutation_result(entity: &mut Entity, result: &MutationResult) -> Result<()> {
    if let Some(wire_key) = &result.key {
        // The server assigns keys only when it completed a partial one.
        if entity.key().map_or(false, Key::is_complete) {
            return Err(Error::Protocol(
                "commit reported a key assignment for an entity whose key was already complete"
                    .into(),
            ));
        }
        entity.set_key(key_from_wire(wire_key)?);
    }
    if result.version.is_some() {
        entity.set_version(result.version);
    }
    Ok(())
}

/// An open read/write transaction.
pub struct Transaction {
    transport: Arc<dyn Transport>,
    project_id: String,
    handle: String,
    mutations: Vec<Mutation>,
    // One slot per mutation; None for deletes and marker writes.
    slots: Vec<Option<PendingEntity>>,
    marker_name: Option<String>,
    finished: bool,
}

impl Transaction {
    /// Begin a transaction and bind it on the current thread.
    pub(crate) fn begin(
        transport: Arc<dyn Transport>,
        project_id: String,
        options: TransactionOptions,
    ) -> Result<Self> {
        let previous = if context::is_in_transaction() {
            if !options.allow_nested {
                return Err(Error::NestedTransaction);
            }
            context::current_transaction()
        } else {
            None
        };
        let response = transport.begin_transaction(BeginTransactionRequest {
            previous_transaction: previous,
        })?;
        context::push_transaction(response.transaction.clone());
        Ok(Self {
            transport,
            project_id,
            handle: response.transaction,
            mutations: Vec::new(),
            slots: Vec::new(),
            marker_name: None,
            finished: false,
        })
    }

    /// Opaque server handle of this transaction.
    pub fn handle(&self) -> &str {
        &self.handle
    }

    /// Read one entity under this transaction.
    pub fn get(&mut self, key: &Key) -> Result<Option<Entity>> {
        Ok(self
            .get_multi(std::slice::from_ref(key))?
            .pop()
            .flatten())
    }

    /// Read several entities under this transaction.
    ///
    /// Results align positionally with `keys`; missing entities are `None`.
    pub fn get_multi(&mut self, keys: &[Key]) -> Result<Vec<Option<Entity>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        for key in keys {
            context::log_key_access(key);
        }
        let response = self.transport.lookup(LookupRequest {
            keys: keys.iter().map(|k| key_to_wire(k, &self.project_id)).collect(),
            transaction: Some(self.handle.clone()),
        })?;
        let mut found = Vec::with_capacity(response.found.len());
        for result in &response.found {
            let mut entity = entity_from_wire(&result.entity)?;
            entity.set_version(result.version);
            found.push(entity);
        }
        Ok(align_lookup(keys, found))
    }

    /// Buffer a create-or-replace for `entity`.
    ///
    /// Index exclusions are normalized before buffering. If the entity
    /// carries a version (it was read earlier), the mutation is conditioned
    /// on it. The returned handle exposes the key and version once the
    /// transaction commits.
    pub fn put(&mut self, mut entity: Entity) -> PendingEntity {
        normalize_index_exclusions(&mut entity);
        let base_version = entity.version();
        if let Some(key) = entity.key() {
            context::log_key_access(key);
        }
        let wire = entity_to_wire(&entity, &self.project_id);
        let slot = PendingEntity::new(entity);
        self.mutations.push(Mutation {
            upsert: Some(wire),
            base_version,
            ..Default::default()
        });
        self.slots.push(Some(slot.clone()));
        slot
    }

    /// Buffer create-or-replace mutations for several entities.
    pub fn put_multi(&mut self, entities: Vec<Entity>) -> Vec<PendingEntity> {
        entities.into_iter().map(|e| self.put(e)).collect()
    }

    /// Buffer a delete for `key`. Deleting a missing entity is a no-op at
    /// commit time.
    pub fn delete(&mut self, key: &Key) {
        context::log_key_access(key);
        self.mutations.push(Mutation {
            delete: Some(key_to_wire(key, &self.project_id)),
            ..Default::default()
        });
        self.slots.push(None);
    }

    /// Buffer deletes for several keys.
    pub fn delete_multi(&mut self, keys: &[Key]) {
        for key in keys {
            self.delete(key);
        }
    }

    /// Read the entity at `key`, or buffer its creation from `defaults`.
    ///
    /// The creation is an insert, not an upsert: if another transaction
    /// creates the entity first, this commit fails rather than overwriting.
    pub fn get_or_insert(&mut self, key: &Key, defaults: PropertyMap) -> Result<PendingEntity> {
        if let Some(existing) = self.get(key)? {
            return Ok(PendingEntity::new(existing));
        }
        let mut entity = Entity::new(key.clone());
        *entity.properties_mut() = defaults;
        normalize_index_exclusions(&mut entity);
        let wire = entity_to_wire(&entity, &self.project_id);
        let slot = PendingEntity::new(entity);
        self.mutations.push(Mutation {
            insert: Some(wire),
            ..Default::default()
        });
        self.slots.push(Some(slot.clone()));
        Ok(slot)
    }

    /// Buffer the success-marker probe for this transaction, at most once.
    ///
    /// The marker is an entity of kind [`TRANSACTION_MARKER_KIND`] named by
    /// the hex of the transaction handle, carrying a `creationdate`
    /// property. It lands together with the transaction's other mutations,
    /// so its existence afterwards proves the commit went through. Returns
    /// the marker name.
    pub fn acquire_success_marker(&mut self) -> String {
        if let Some(name) = &self.marker_name {
            return name.clone();
        }
        let name: String = self
            .handle
            .as_bytes()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect();
        let mut marker = Entity::new(Key::with_name(TRANSACTION_MARKER_KIND, name.clone()));
        marker.insert("creationdate", Utc::now());
        self.mutations.push(Mutation {
            upsert: Some(entity_to_wire(&marker, &self.project_id)),
            ..Default::default()
        });
        self.slots.push(None);
        self.marker_name = Some(name.clone());
        name
    }

    /// Commit the buffered mutations, retrying on contention per `policy`.
    ///
    /// An empty buffer degrades to a rollback; the handle still has to be
    /// released. On success the mutation results are reconciled onto the
    /// buffered entities.
    pub(crate) fn commit(&mut self, policy: &RetryPolicy) -> Result<()> {
        if self.mutations.is_empty() {
            debug!(handle = %self.handle, "empty transaction; rolling back instead of committing");
            return self.rollback();
        }
        let mut attempt = 1u32;
        loop {
            let outcome = self.transport.commit(CommitRequest {
                mode: CommitMode::Transactional,
                transaction: Some(self.handle.clone()),
                mutations: self.mutations.clone(),
            });
            match outcome {
                Ok(response) => {
                    self.finished = true;
                    return self.reconcile(response.mutation_results);
                }
                Err(err) if err.is_contention() && attempt < policy.attempts => {
                    warn!(
                        attempt,
                        handle = %self.handle,
                        %err,
                        "transaction commit contended; retrying with a fresh handle"
                    );
                    thread::sleep(policy.backoff_for(attempt));
                    attempt += 1;
                    let response = self.transport.begin_transaction(BeginTransactionRequest {
                        previous_transaction: Some(self.handle.clone()),
                    })?;
                    context::pop_transaction();
                    context::push_transaction(response.transaction.clone());
                    self.handle = response.transaction;
                }
                Err(err) if err.is_contention() => {
                    self.finished = true;
                    return Err(Error::Collision(
                        "all retries are exhausted for this transaction".into(),
                    ));
                }
                Err(err) => {
                    // Non-contention commit failure: release the handle and
                    // surface the original error.
                    if let Err(rollback_err) = self.rollback() {
                        warn!(%rollback_err, "rollback after failed commit also failed");
                    }
                    return Err(err);
                }
            }
        }
    }

    fn reconcile(&mut self, results: Vec<MutationResult>) -> Result<()> {
        if results.is_empty() {
            return Err(Error::NoMutationResults);
        }
        if results.len() != self.mutations.len() {
            return Err(Error::Protocol(format!(
                "commit returned {} mutation results for {} mutations",
                results.len(),
                self.mutations.len()
            )));
        }
        for (result, slot) in results.iter().zip(&self.slots) {
            match slot {
                Some(slot) => apply_mutation_result(&mut slot.inner.borrow_mut(), result)?,
                // Deletes and marker writes never complete a key; a key
                // assignment here means the server and the buffer disagree.
                None if result.key.is_some() => {
                    return Err(Error::Protocol(
                        "commit reported a key assignment for a mutation without an affected entity"
                            .into(),
                    ))
                }
                None => {}
            }
        }
        Ok(())
    }

    /// Release the transaction without applying anything.
    pub(crate) fn rollback(&mut self) -> Result<()> {
        self.finished = true;
        self.transport.rollback(RollbackRequest {
            transaction: self.handle.clone(),
        })
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(err) = self.rollback() {
                warn!(%err, "rollback of abandoned transaction failed");
            }
        }
        context::pop_transaction();
    }
}

/// Realign lookup results to the requested key order. The server returns
/// found entities in arbitrary order; duplicate request keys all receive
/// the entity.
pub(crate) fn align_lookup(keys: &[Key], found: Vec<Entity>) -> Vec<Option<Entity>> {
    let mut results: Vec<Option<Entity>> = vec![None; keys.len()];
    for entity in found {
        let Some(entity_key) = entity.key() else {
            continue;
        };
        if let Some(position) = keys
            .iter()
            .position(|k| k == entity_key)
            .filter(|&i| results[i].is_none())
        {
            results[position] = Some(entity);
        }
    }
    // The server deduplicates repeated keys; copy the entity into the later
    // duplicate slots.
    for i in 0..keys.len() {
        if results[i].is_none() {
            results[i] = keys
                .iter()
                .position(|k| k == &keys[i])
                .filter(|&first| first < i)
                .and_then(|first| results[first].clone());
        }
    }
    results
}
