//! Thread-scoped execution state.
//!
//! Two pieces of state ride along the call chain without being passed
//! explicitly: the data-access log and the stack of active transaction
//! handles. Both are `thread_local!` -- entered by copying the previous
//! value out and restored on exit, so nested scopes compose and nothing
//! leaks across threads.

use std::cell::RefCell;
use std::collections::HashSet;

use nimbus_core::Key;

/// One record in the data-access log.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AccessEntry {
    /// A complete key that was read, written or deleted.
    Key(Key),
    /// A kind touched by a query.
    Kind(String),
}

thread_local! {
    static ACCESS_LOG: RefCell<Option<HashSet<AccessEntry>>> = const { RefCell::new(None) };
    static TXN_STACK: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

/// Start collecting accessed keys and kinds on this thread.
///
/// Returns the log that was active before, if any; pass it back to
/// [`end_data_access_log`] so nested scopes restore correctly.
pub fn start_data_access_log() -> Option<HashSet<AccessEntry>> {
    ACCESS_LOG.with(|log| log.borrow_mut().replace(HashSet::new()))
}

/// Stop collecting and return everything logged since the matching start.
///
/// `outer` is the value the matching [`start_data_access_log`] returned; it
/// becomes the active log again (entries collected here are merged into it).
pub fn end_data_access_log(
    outer: Option<HashSet<AccessEntry>>,
) -> Option<HashSet<AccessEntry>> {
    ACCESS_LOG.with(|log| {
        let collected = log.borrow_mut().take();
        let restored = outer.map(|mut outer_log| {
            if let Some(entries) = &collected {
                outer_log.extend(entries.iter().cloned());
            }
            outer_log
        });
        *log.borrow_mut() = restored;
        collected
    })
}

/// Record an entry if a log is active. No-op otherwise.
pub(crate) fn log_access(entry: AccessEntry) {
    ACCESS_LOG.with(|log| {
        if let Some(entries) = log.borrow_mut().as_mut() {
            entries.insert(entry);
        }
    });
}

/// Record a complete key. Partial keys are skipped; they identify nothing
/// until the server completes them.
pub(crate) fn log_key_access(key: &Key) {
    if key.is_complete() {
        log_access(AccessEntry::Key(key.clone()));
    }
}

/// Record a queried kind.
pub(crate) fn log_kind_access(kind: &str) {
    log_access(AccessEntry::Kind(kind.to_owned()));
}

/// Whether a transaction is active on this thread.
pub fn is_in_transaction() -> bool {
    TXN_STACK.with(|stack| !stack.borrow().is_empty())
}

/// Handle of the innermost active transaction, if any.
pub(crate) fn current_transaction() -> Option<String> {
    TXN_STACK.with(|stack| stack.borrow().last().cloned())
}

/// Push a transaction handle onto the ambient stack.
pub(crate) fn push_transaction(handle: String) {
    TXN_STACK.with(|stack| stack.borrow_mut().push(handle));
}

/// Pop the innermost transaction handle.
pub(crate) fn pop_transaction() {
    TXN_STACK.with(|stack| {
        stack.borrow_mut().pop();
    });
}
