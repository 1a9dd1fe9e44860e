//! Declarative query descriptions
//!
//! A [`QueryDefinition`] captures filters, orders, distinct-on, limit and
//! cursors of one query run against the store. The query engine in the client
//! crate translates it into remote calls; nothing here touches the transport.

use crate::limits::DEFAULT_QUERY_LIMIT;
use crate::value::Value;
use std::collections::BTreeMap;

/// Filter property addressing the entity key itself.
pub const KEY_SPECIAL_PROPERTY: &str = "__key__";

/// Sort direction of one ordering term.
///
/// The `Inverted*` variants request the opposite physical order from the
/// server and reverse the returned page locally. This is how a start cursor
/// can page "backwards" through an index the server cannot scan in reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortOrder {
    /// Sort A -> Z.
    Ascending,
    /// Sort Z -> A.
    Descending,
    /// Fetch Z -> A, then flip the page locally.
    InvertedAscending,
    /// Fetch A -> Z, then flip the page locally.
    InvertedDescending,
}

impl SortOrder {
    /// Whether this order needs the local page reversal.
    pub fn is_inverted(self) -> bool {
        matches!(self, SortOrder::InvertedAscending | SortOrder::InvertedDescending)
    }
}

/// One query that will be run against the store.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryDefinition {
    /// The kind to query. `None` runs a kindless query.
    pub kind: Option<String>,
    /// Constraints, keyed `"<property> <operator>"` with operator one of
    /// `=, <, <=, >, >=, IN`. A `Value::List` under `=` expands to a
    /// conjunction of equality filters (multi-valued containment semantics);
    /// under `IN` it is the candidate set.
    pub filters: BTreeMap<String, Value>,
    /// Ordering terms, applied in sequence.
    pub orders: Vec<(String, SortOrder)>,
    /// If set, deduplicate on these properties (first entity per distinct
    /// value wins, remote-side).
    pub distinct: Option<Vec<String>>,
    /// Maximum number of entities returned per run.
    pub limit: i32,
    /// Resume after this position in the server's native ordering.
    pub start_cursor: Option<String>,
    /// Stop at this position in the server's native ordering.
    pub end_cursor: Option<String>,
    /// Written back after each run: the cursor to resume the query in the
    /// direction it was declared in, or `None` once exhausted.
    pub current_cursor: Option<String>,
}

impl QueryDefinition {
    /// A query over `kind` with no constraints and the default limit.
    pub fn new(kind: impl Into<String>) -> Self {
        QueryDefinition {
            kind: Some(kind.into()),
            ..Default::default()
        }
    }
}

impl Default for QueryDefinition {
    fn default() -> Self {
        QueryDefinition {
            kind: None,
            filters: BTreeMap::new(),
            orders: Vec::new(),
            distinct: None,
            limit: DEFAULT_QUERY_LIMIT,
            start_cursor: None,
            end_cursor: None,
            current_cursor: None,
        }
    }
}
