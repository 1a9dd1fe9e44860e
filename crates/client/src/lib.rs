//! Client access layer for the remote entity store.
//!
//! Builds on [`nimbus_core`]'s data model: a [`Datastore`] façade for reads,
//! writes and queries, an explicit [`Transaction`] coordinator with bounded
//! contention retry, a thread-scoped access log, an opt-in cache
//! collaborator, and an in-memory [`testing::Emulator`] implementing the
//! same [`Transport`] the real service sits behind.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod config;
pub mod context;
pub mod datastore;
pub mod query;
pub mod testing;
pub mod transaction;
pub mod transport;
pub mod wire;

pub use cache::{Cache, CacheBackend, MemoryCache};
pub use config::{Config, RetryPolicy};
pub use context::{
    end_data_access_log, is_in_transaction, start_data_access_log, AccessEntry,
};
pub use datastore::Datastore;
pub use query::{FilterHook, OrderHook, Query};
pub use transaction::{
    PendingEntity, Transaction, TransactionOptions, TRANSACTION_MARKER_KIND,
};
pub use transport::Transport;
