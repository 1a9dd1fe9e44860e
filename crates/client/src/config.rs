//! Client configuration.
//!
//! A process-wide registry holds the options shared by every `Datastore`
//! built without an explicit config. The registry is read-many/write-rarely:
//! set up once at startup, snapshotted by each client at construction.

use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::cache::CacheBackend;

/// Backoff schedule the transaction coordinator follows on contention.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// How many commit attempts before giving up.
    pub attempts: u32,
    /// First backoff interval; doubles after every failed attempt.
    pub backoff_seed: Duration,
}

impl RetryPolicy {
    /// Backoff to sleep after the given failed attempt (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff_seed * 2u32.saturating_pow(attempt.saturating_sub(1))
    }

    /// A policy with no sleep between attempts, for tests.
    pub fn immediate(attempts: u32) -> Self {
        Self {
            attempts,
            backoff_seed: Duration::ZERO,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: nimbus_core::limits::COMMIT_RETRY_ATTEMPTS,
            backoff_seed: Duration::from_secs(nimbus_core::limits::COMMIT_BACKOFF_SEED_SECS),
        }
    }
}

/// Options a `Datastore` snapshots at construction.
#[derive(Clone, Default)]
pub struct Config {
    /// Cache collaborator for non-transactional reads, if any.
    pub cache: Option<Arc<dyn CacheBackend>>,
    /// Log every query run through `tracing`.
    pub trace_queries: bool,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("cache", &self.cache.is_some())
            .field("trace_queries", &self.trace_queries)
            .finish()
    }
}

static REGISTRY: Lazy<RwLock<Config>> = Lazy::new(|| RwLock::new(Config::default()));

/// Install a cache backend for clients built after this call.
pub fn set_cache_backend(backend: Option<Arc<dyn CacheBackend>>) {
    REGISTRY.write().cache = backend;
}

/// Toggle query tracing for clients built after this call.
pub fn set_trace_queries(enabled: bool) {
    REGISTRY.write().trace_queries = enabled;
}

/// Snapshot the process-wide configuration.
pub fn snapshot() -> Config {
    REGISTRY.read().clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_from_seed() {
        let policy = RetryPolicy {
            attempts: 3,
            backoff_seed: Duration::from_secs(2),
        };
        assert_eq!(policy.backoff_for(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_for(2), Duration::from_secs(4));
        assert_eq!(policy.backoff_for(3), Duration::from_secs(8));
    }

    #[test]
    fn test_immediate_policy_never_sleeps() {
        let policy = RetryPolicy::immediate(5);
        assert_eq!(policy.backoff_for(4), Duration::ZERO);
    }
}
