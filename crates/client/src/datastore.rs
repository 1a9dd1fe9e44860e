//! Client façade over the remote store.
//!
//! A [`Datastore`] bundles the transport, the project id, the retry policy
//! and a configuration snapshot. Reads outside a transaction go through the
//! cache collaborator when one is configured; reads while a transaction is
//! active on this thread automatically happen under that transaction and
//! bypass the cache.

use std::sync::Arc;

use nimbus_core::limits::DEFAULT_COUNT_UP_TO;
use nimbus_core::{normalize_index_exclusions, Entity, Error, Key, PropertyMap, QueryDefinition, Result};
use tracing::debug;

use crate::cache::Cache;
use crate::config::{self, Config, RetryPolicy};
use crate::context;
use crate::query::{build_wire_query, Query};
use crate::transaction::{align_lookup, apply_mutation_result, Transaction, TransactionOptions};
use crate::transport::Transport;
use crate::wire::{
    entity_from_wire, entity_to_wire, key_from_wire, key_to_wire, AllocateIdsRequest, CommitMode,
    CommitRequest, LookupRequest, Mutation, RunAggregationRequest, WirePartitionId,
};

/// Access layer for one project of the remote store.
#[derive(Clone)]
pub struct Datastore {
    transport: Arc<dyn Transport>,
    project_id: String,
    retry: RetryPolicy,
    config: Config,
    cache: Option<Cache>,
}

impl Datastore {
    /// Build a client snapshotting the process-wide configuration.
    pub fn new(transport: Arc<dyn Transport>, project_id: impl Into<String>) -> Self {
        Self::with_config(transport, project_id, config::snapshot(), RetryPolicy::default())
    }

    /// Build a client with an explicit configuration and retry policy.
    pub fn with_config(
        transport: Arc<dyn Transport>,
        project_id: impl Into<String>,
        config: Config,
        retry: RetryPolicy,
    ) -> Self {
        let project_id = project_id.into();
        let cache = config
            .cache
            .clone()
            .map(|backend| Cache::new(backend, project_id.clone()));
        Self {
            transport,
            project_id,
            retry,
            config,
            cache,
        }
    }

    /// Project this client addresses.
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    /// Fetch one entity.
    pub fn get(&self, key: &Key) -> Result<Option<Entity>> {
        Ok(self.get_multi(std::slice::from_ref(key))?.pop().flatten())
    }

    /// Fetch several entities in one lookup.
    ///
    /// Results align positionally with `keys`; missing entities are `None`.
    pub fn get_multi(&self, keys: &[Key]) -> Result<Vec<Option<Entity>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        for key in keys {
            context::log_key_access(key);
        }
        let transaction = context::current_transaction();

        // Cache applies to non-transactional reads only.
        let mut cached: Vec<Option<Entity>> = vec![None; keys.len()];
        if transaction.is_none() {
            if let Some(cache) = &self.cache {
                let key_refs: Vec<&Key> = keys.iter().collect();
                let mut hits = cache.get_multi(&key_refs)?;
                for (slot, key) in cached.iter_mut().zip(keys) {
                    if key.is_complete() {
                        *slot = hits.remove(&key.to_urlsafe(&self.project_id));
                    }
                }
            }
        }

        let wanted: Vec<Key> = keys
            .iter()
            .zip(&cached)
            .filter(|(_, hit)| hit.is_none())
            .map(|(key, _)| key.clone())
            .collect();
        let mut fetched: Vec<Option<Entity>> = Vec::new();
        if !wanted.is_empty() {
            let response = self.transport.lookup(LookupRequest {
                keys: wanted
                    .iter()
                    .map(|k| key_to_wire(k, &self.project_id))
                    .collect(),
                transaction,
            })?;
            let mut found = Vec::with_capacity(response.found.len());
            for result in &response.found {
                let mut entity = entity_from_wire(&result.entity)?;
                entity.set_version(result.version);
                found.push(entity);
            }
            fetched = align_lookup(&wanted, found);
            self.populate_cache(fetched.iter().flatten());
        }

        // Merge cache hits and fetched entities back into input order.
        let mut fetched_iter = fetched.into_iter();
        let results = cached
            .into_iter()
            .map(|hit| match hit {
                Some(entity) => Some(entity),
                None => fetched_iter.next().flatten(),
            })
            .collect();
        Ok(results)
    }

    /// Store one entity, writing the assigned key and version back in place.
    pub fn put(&self, entity: &mut Entity) -> Result<()> {
        self.put_multi(std::slice::from_mut(entity))
    }

    /// Store several entities in one commit.
    ///
    /// Index exclusions are normalized first; server-assigned keys and
    /// versions are written back onto the given entities.
    ///
    /// Fails with [`Error::StandaloneWriteInTransaction`] while a
    /// transaction is active on this thread: a write that should be part of
    /// the transaction goes through [`Transaction::put`], and letting it
    /// commit standalone here would make it survive a rollback.
    pub fn put_multi(&self, entities: &mut [Entity]) -> Result<()> {
        if entities.is_empty() {
            return Ok(());
        }
        if context::is_in_transaction() {
            return Err(Error::StandaloneWriteInTransaction);
        }
        let mut mutations = Vec::with_capacity(entities.len());
        for entity in entities.iter_mut() {
            normalize_index_exclusions(entity);
            if let Some(key) = entity.key() {
                context::log_key_access(key);
            }
            mutations.push(Mutation {
                upsert: Some(entity_to_wire(entity, &self.project_id)),
                ..Default::default()
            });
        }
        let response = self.transport.commit(CommitRequest {
            mode: CommitMode::NonTransactional,
            transaction: None,
            mutations,
        })?;
        if response.mutation_results.is_empty() {
            return Err(Error::NoMutationResults);
        }
        if response.mutation_results.len() != entities.len() {
            return Err(Error::Protocol(format!(
                "commit returned {} mutation results for {} mutations",
                response.mutation_results.len(),
                entities.len()
            )));
        }
        for (entity, result) in entities.iter_mut().zip(&response.mutation_results) {
            apply_mutation_result(entity, result)?;
        }
        self.populate_cache(entities.iter());
        Ok(())
    }

    /// Delete one entity. Deleting a missing key is a no-op.
    pub fn delete(&self, key: &Key) -> Result<()> {
        self.delete_multi(std::slice::from_ref(key))
    }

    /// Delete several entities in one commit. An empty list is a no-op
    /// without a round trip.
    ///
    /// Like [`put_multi`](Self::put_multi), fails with
    /// [`Error::StandaloneWriteInTransaction`] while a transaction is
    /// active; transactional deletes go through [`Transaction::delete`].
    pub fn delete_multi(&self, keys: &[Key]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        if context::is_in_transaction() {
            return Err(Error::StandaloneWriteInTransaction);
        }
        for key in keys {
            context::log_key_access(key);
        }
        if let Some(cache) = &self.cache {
            let key_refs: Vec<&Key> = keys.iter().collect();
            cache.delete_multi(&key_refs)?;
        }
        self.transport.commit(CommitRequest {
            mode: CommitMode::NonTransactional,
            transaction: None,
            mutations: keys
                .iter()
                .map(|key| Mutation {
                    delete: Some(key_to_wire(key, &self.project_id)),
                    ..Default::default()
                })
                .collect(),
        })?;
        Ok(())
    }

    /// Reserve `count` numeric ids for new keys of `kind`.
    pub fn allocate_ids(&self, kind: &str, count: usize) -> Result<Vec<Key>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let partial = key_to_wire(&Key::incomplete(kind), &self.project_id);
        let response = self.transport.allocate_ids(AllocateIdsRequest {
            keys: vec![partial; count],
        })?;
        response.keys.iter().map(key_from_wire).collect()
    }

    /// Count the entities of `kind`, optionally constrained by a query
    /// definition's filters, up to `up_to` (unbounded-ish by default).
    ///
    /// When `kind` is `None` the definition's kind applies; with neither
    /// the count runs kindless across the whole partition.
    pub fn count(
        &self,
        kind: Option<&str>,
        up_to: Option<i64>,
        definition: Option<&QueryDefinition>,
    ) -> Result<i64> {
        let mut wire = match definition {
            Some(def) => build_wire_query(def, &self.project_id)?,
            None => Default::default(),
        };
        if let Some(kind) = kind {
            wire.kind = vec![kind.to_owned()];
        }
        if let Some(kind) = wire.kind.first() {
            context::log_kind_access(kind);
        }
        let response = self.transport.run_aggregation(RunAggregationRequest {
            partition_id: WirePartitionId {
                project_id: self.project_id.clone(),
            },
            query: wire,
            up_to: up_to.unwrap_or(DEFAULT_COUNT_UP_TO),
        })?;
        Ok(response.count)
    }

    /// Start building a query over `kind`.
    pub fn query(&self, kind: impl Into<String>) -> Query<'_> {
        Query::new(self, QueryDefinition::new(kind))
    }

    /// Run `f` inside a transaction with default options.
    ///
    /// The closure's buffered writes are committed atomically when it
    /// returns `Ok`; contention is retried per the client's retry policy,
    /// re-sending the same buffered mutations under a fresh handle. When the
    /// closure returns `Err` the transaction rolls back and the error is
    /// passed through.
    pub fn run_in_transaction<T>(
        &self,
        f: impl FnOnce(&mut Transaction) -> Result<T>,
    ) -> Result<T> {
        self.run_in_transaction_with(TransactionOptions::default(), f)
    }

    /// Run `f` inside a transaction with explicit options.
    ///
    /// Beginning while a transaction is already active on this thread fails
    /// with [`Error::NestedTransaction`] unless
    /// [`TransactionOptions::allow_nested`] is set, in which case the inner
    /// transaction is linked to the outer one as its continuation.
    pub fn run_in_transaction_with<T>(
        &self,
        options: TransactionOptions,
        f: impl FnOnce(&mut Transaction) -> Result<T>,
    ) -> Result<T> {
        let mut txn = Transaction::begin(
            Arc::clone(&self.transport),
            self.project_id.clone(),
            options,
        )?;
        match f(&mut txn) {
            Ok(value) => {
                txn.commit(&self.retry)?;
                Ok(value)
            }
            Err(err) => {
                debug!(%err, "transaction closure failed; rolling back");
                if let Err(rollback_err) = txn.rollback() {
                    debug!(%rollback_err, "rollback after closure failure also failed");
                }
                Err(err)
            }
        }
    }

    /// Fetch the entity at `key`, creating it from `defaults` if missing.
    ///
    /// Runs its own transaction; the creation is an insert, so losing a
    /// creation race surfaces as an error instead of an overwrite. Callers
    /// already inside a transaction use
    /// [`Transaction::get_or_insert`] instead.
    pub fn get_or_insert(&self, key: &Key, defaults: PropertyMap) -> Result<Entity> {
        if context::is_in_transaction() {
            return Err(Error::NestedTransaction);
        }
        // Keep the pending slot past the commit so the reconciled key and
        // version show up on the returned entity.
        let slot = self.run_in_transaction(|txn| txn.get_or_insert(key, defaults))?;
        Ok(slot.entity())
    }

    fn populate_cache<'a>(&self, entities: impl Iterator<Item = &'a Entity>) {
        if context::is_in_transaction() {
            return;
        }
        let Some(cache) = &self.cache else {
            return;
        };
        let refs: Vec<&Entity> = entities.collect();
        if refs.is_empty() {
            return;
        }
        if let Err(err) = cache.put_multi(&refs) {
            debug!(%err, "cache population failed");
        }
    }
}
