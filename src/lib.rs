//! Umbrella crate re-exporting the whole access layer.
//!
//! Most users depend on this crate alone: the core data model
//! ([`Key`], [`Value`], [`Entity`], the key codec) and the client surface
//! ([`Datastore`], [`Transaction`], queries, cache, test emulator) are all
//! reachable from here. The member crates remain usable on their own when
//! only the data model is needed.

#![warn(missing_docs)]

pub use nimbus_client::{
    cache, config, context, end_data_access_log, is_in_transaction, query,
    start_data_access_log, testing, transaction, transport, wire, AccessEntry, Cache,
    CacheBackend, Config, Datastore, MemoryCache, PendingEntity, Query, RetryPolicy,
    Transaction, TransactionOptions, Transport, TRANSACTION_MARKER_KIND,
};
pub use nimbus_core::{
    limits, normalize_index_exclusions, DecodeError, Entity, Error, IdOrName, Key,
    PropertyMap, QueryDefinition, Result, RpcStatus, SortOrder, Value,
    KEY_SPECIAL_PROPERTY,
};
