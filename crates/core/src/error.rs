//! Error taxonomy
//!
//! One `thiserror` hierarchy for the whole access layer. The split that
//! matters operationally is contention-class versus fatal: contention
//! (`Collision`, remote `ABORTED`) is retried inside the transaction
//! coordinator and only escalates once retries are exhausted; everything else
//! propagates unchanged to the caller. Not-found is never an error -- reads of
//! missing keys yield `Ok(None)`.

use crate::codec::DecodeError;
use std::fmt;
use thiserror::Error;

/// Result alias used throughout the access layer.
pub type Result<T> = std::result::Result<T, Error>;

/// Status classification of a failed remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcStatus {
    /// Optimistic-concurrency conflict; the transaction may be retried.
    Aborted,
    /// The call ran past its deadline.
    DeadlineExceeded,
    /// A precondition (such as an insert of an existing entity) failed.
    FailedPrecondition,
    /// Server-side internal failure.
    Internal,
    /// The request was malformed.
    InvalidArgument,
    /// The addressed resource does not exist.
    NotFound,
    /// The caller lacks permission.
    PermissionDenied,
    /// Quota or rate limits exhausted.
    ResourceExhausted,
    /// Missing or invalid credentials.
    Unauthenticated,
    /// The service is temporarily unavailable.
    Unavailable,
    /// Anything the transport could not classify.
    Unknown,
}

impl RpcStatus {
    /// Parse the canonical SCREAMING_SNAKE status name used on the wire.
    pub fn from_status_name(name: &str) -> Self {
        match name {
            "ABORTED" => RpcStatus::Aborted,
            "DEADLINE_EXCEEDED" => RpcStatus::DeadlineExceeded,
            "FAILED_PRECONDITION" => RpcStatus::FailedPrecondition,
            "INTERNAL" => RpcStatus::Internal,
            "INVALID_ARGUMENT" => RpcStatus::InvalidArgument,
            "NOT_FOUND" => RpcStatus::NotFound,
            "PERMISSION_DENIED" => RpcStatus::PermissionDenied,
            "RESOURCE_EXHAUSTED" => RpcStatus::ResourceExhausted,
            "UNAUTHENTICATED" => RpcStatus::Unauthenticated,
            "UNAVAILABLE" => RpcStatus::Unavailable,
            _ => RpcStatus::Unknown,
        }
    }

    /// The canonical wire name of this status.
    pub fn status_name(self) -> &'static str {
        match self {
            RpcStatus::Aborted => "ABORTED",
            RpcStatus::DeadlineExceeded => "DEADLINE_EXCEEDED",
            RpcStatus::FailedPrecondition => "FAILED_PRECONDITION",
            RpcStatus::Internal => "INTERNAL",
            RpcStatus::InvalidArgument => "INVALID_ARGUMENT",
            RpcStatus::NotFound => "NOT_FOUND",
            RpcStatus::PermissionDenied => "PERMISSION_DENIED",
            RpcStatus::ResourceExhausted => "RESOURCE_EXHAUSTED",
            RpcStatus::Unauthenticated => "UNAUTHENTICATED",
            RpcStatus::Unavailable => "UNAVAILABLE",
            RpcStatus::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for RpcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.status_name())
    }
}

/// Error type for the access layer.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed key token. Never retried; indicates a corrupt or foreign
    /// token, not a missing entity.
    #[error("key token decode failed: {0}")]
    Decode(#[from] DecodeError),

    /// A transaction was begun while another one is active on this call
    /// chain and nesting was not explicitly allowed.
    #[error("cannot begin a transaction inside a transaction")]
    NestedTransaction,

    /// A standalone write was issued while a transaction is active on this
    /// call chain. Writes inside a transaction go through its handle so
    /// they join the atomic commit; letting them through here would let
    /// them survive a rollback.
    #[error("standalone write while a transaction is active")]
    StandaloneWriteInTransaction,

    /// Optimistic-concurrency conflict that survived all commit retries.
    #[error("transaction collision: {0}")]
    Collision(String),

    /// A commit nominally succeeded but returned no mutation results. Must
    /// never be silently treated as a no-op commit.
    #[error("commit returned no mutation results")]
    NoMutationResults,

    /// The coordinator and server disagree (mismatched result counts,
    /// unexpected key assignment). Fatal, never retried.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// A remote call failed with a classified status.
    #[error("remote call failed ({status}): {message}")]
    Rpc {
        /// Status classification reported by the transport.
        status: RpcStatus,
        /// Human-readable detail from the remote service.
        message: String,
    },

    /// Wire-level (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Shorthand for a classified remote failure.
    pub fn rpc(status: RpcStatus, message: impl Into<String>) -> Self {
        Error::Rpc {
            status,
            message: message.into(),
        }
    }

    /// Whether this failure is contention-class and thus eligible for the
    /// coordinator's commit retry. Timeouts are retryable only when the
    /// transport classified them as contention.
    pub fn is_contention(&self) -> bool {
        matches!(
            self,
            Error::Collision(_)
                | Error::Rpc {
                    status: RpcStatus::Aborted,
                    ..
                }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_name_roundtrip() {
        for status in [
            RpcStatus::Aborted,
            RpcStatus::DeadlineExceeded,
            RpcStatus::FailedPrecondition,
            RpcStatus::Internal,
            RpcStatus::InvalidArgument,
            RpcStatus::NotFound,
            RpcStatus::PermissionDenied,
            RpcStatus::ResourceExhausted,
            RpcStatus::Unauthenticated,
            RpcStatus::Unavailable,
        ] {
            assert_eq!(RpcStatus::from_status_name(status.status_name()), status);
        }
        assert_eq!(RpcStatus::from_status_name("BOGUS"), RpcStatus::Unknown);
    }

    #[test]
    fn test_contention_classification() {
        assert!(Error::Collision("x".into()).is_contention());
        assert!(Error::rpc(RpcStatus::Aborted, "conflict").is_contention());
        // A timeout is fatal unless classified as contention.
        assert!(!Error::rpc(RpcStatus::DeadlineExceeded, "slow").is_contention());
        assert!(!Error::NestedTransaction.is_contention());
        assert!(!Error::StandaloneWriteInTransaction.is_contention());
        assert!(!Error::NoMutationResults.is_contention());
    }
}
