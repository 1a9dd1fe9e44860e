//! Fixed limits and protocol constants
//!
//! Values here mirror hard limits of the remote service and the cache
//! collaborator; they are not tunables.

/// Longest string/byte value (in bytes) the store will index. Anything at or
/// above this length must be excluded from indexing before a Put.
pub const MAX_INDEXED_VALUE_BYTES: usize = 500;

/// Default number of entities returned by a query run.
pub const DEFAULT_QUERY_LIMIT: i32 = 30;

/// Default upper bound for count aggregations (2^31 - 1): effectively
/// unbounded while keeping the server-side aggregation finite.
pub const DEFAULT_COUNT_UP_TO: i64 = i32::MAX as i64;

/// Commit attempts per transaction before a collision escalates as terminal.
pub const COMMIT_RETRY_ATTEMPTS: u32 = 3;

/// Seed of the exponential commit backoff: 2 seconds, doubling per attempt.
pub const COMMIT_BACKOFF_SEED_SECS: u64 = 2;

/// Most keys/entities the cache collaborator accepts per underlying call;
/// larger batches are chunked client-side.
pub const CACHE_MAX_BATCH_SIZE: usize = 30;

/// Entries above this serialized size (bytes) are never cached.
pub const CACHE_MAX_ENTRY_BYTES: usize = 1_000_000;
