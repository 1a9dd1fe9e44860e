//! Transport seam between the access layer and the remote store.
//!
//! Everything above this trait works with typed wire requests and responses;
//! everything below it is connection plumbing. The in-process emulator in
//! [`crate::testing`] implements the same trait, so the whole access layer is
//! exercisable without a network.

use nimbus_core::Result;

use crate::wire::{
    AllocateIdsRequest, AllocateIdsResponse, BeginTransactionRequest, BeginTransactionResponse,
    CommitRequest, CommitResponse, LookupRequest, LookupResponse, RollbackRequest,
    RunAggregationRequest, RunAggregationResponse, RunQueryRequest, RunQueryResponse,
};

/// Remote procedure surface of the store.
///
/// Implementations map transient server failures to
/// [`Error::Rpc`](nimbus_core::Error::Rpc) with the matching
/// [`RpcStatus`](nimbus_core::RpcStatus); the coordinator keys its retry
/// decisions off that status.
pub trait Transport: Send + Sync {
    /// Open a read/write transaction and return its opaque handle.
    fn begin_transaction(&self, req: BeginTransactionRequest) -> Result<BeginTransactionResponse>;

    /// Apply a batch of mutations, transactionally or standalone.
    fn commit(&self, req: CommitRequest) -> Result<CommitResponse>;

    /// Release a transaction without applying its mutations.
    fn rollback(&self, req: RollbackRequest) -> Result<()>;

    /// Fetch entities by key.
    fn lookup(&self, req: LookupRequest) -> Result<LookupResponse>;

    /// Run a query and return one page of results.
    fn run_query(&self, req: RunQueryRequest) -> Result<RunQueryResponse>;

    /// Reserve numeric ids for partial keys.
    fn allocate_ids(&self, req: AllocateIdsRequest) -> Result<AllocateIdsResponse>;

    /// Run a bounded count over the entities a query matches.
    fn run_aggregation(&self, req: RunAggregationRequest) -> Result<RunAggregationResponse>;
}
