//! Query builder and execution.
//!
//! Filters are recorded as `"property operator"` specs over a
//! [`QueryDefinition`]; translation to the wire form happens at run time.
//! Inverted sort orders flip the physical direction sent to the server and
//! reverse the returned page locally, while cursors stay physical, so
//! resuming an inverted query pages correctly.

use nimbus_core::{Entity, Error, Result, SortOrder, Value};
use tracing::debug;

use crate::context;
use crate::datastore::Datastore;
use crate::wire::{
    entity_from_wire, Direction, PropertyFilter, PropertyOperator, PropertyOrder,
    PropertyReference, RunAggregationRequest, RunQueryRequest, WirePartitionId, WireQuery,
    WireValue,
};

/// Rewrites a filter spec/value pair before it is recorded; returning `None`
/// drops the filter.
pub type FilterHook = Box<dyn Fn(&str, Value) -> Option<(String, Value)>>;

/// Rewrites the ordering list before it is recorded.
pub type OrderHook = Box<dyn Fn(Vec<(String, SortOrder)>) -> Vec<(String, SortOrder)>>;

/// A query under construction, bound to the client that will run it.
pub struct Query<'a> {
    store: &'a Datastore,
    def: nimbus_core::QueryDefinition,
    filter_hook: Option<FilterHook>,
    order_hook: Option<OrderHook>,
    // Terminal state: once a run observes the end of the result set, later
    // runs stay empty instead of replaying from the start cursor.
    exhausted: bool,
}

impl<'a> Query<'a> {
    pub(crate) fn new(store: &'a Datastore, def: nimbus_core::QueryDefinition) -> Self {
        Self {
            store,
            def,
            filter_hook: None,
            order_hook: None,
            exhausted: false,
        }
    }

    /// The definition built so far.
    pub fn definition(&self) -> &nimbus_core::QueryDefinition {
        &self.def
    }

    /// Install a filter rewrite hook. Applies to filters added afterwards.
    pub fn set_filter_hook(&mut self, hook: FilterHook) {
        self.filter_hook = Some(hook);
    }

    /// Install an ordering rewrite hook. Applies to orderings set afterwards.
    pub fn set_order_hook(&mut self, hook: OrderHook) {
        self.order_hook = Some(hook);
    }

    /// Add a filter from a `"property operator"` spec.
    ///
    /// Recognized operators: `=`, `<`, `<=`, `>`, `>=`, `IN`; a bare
    /// property name means equality. A later filter with the same spec
    /// replaces the earlier one.
    pub fn filter(mut self, spec: &str, value: impl Into<Value>) -> Self {
        let mut spec = spec.to_owned();
        let mut value = value.into();
        if let Some(hook) = &self.filter_hook {
            match hook(&spec, value) {
                Some((rewritten_spec, rewritten_value)) => {
                    spec = rewritten_spec;
                    value = rewritten_value;
                }
                None => return self,
            }
        }
        self.def.filters.insert(spec, value);
        self
    }

    /// Replace the ordering list.
    pub fn order(mut self, orders: &[(&str, SortOrder)]) -> Self {
        let mut orders: Vec<(String, SortOrder)> = orders
            .iter()
            .map(|(prop, dir)| ((*prop).to_owned(), *dir))
            .collect();
        if let Some(hook) = &self.order_hook {
            orders = hook(orders);
        }
        self.def.orders = orders;
        self
    }

    /// Collapse results to one entity per distinct combination of the given
    /// properties.
    pub fn distinct_on(mut self, properties: &[&str]) -> Self {
        self.def.distinct = Some(properties.iter().map(|p| (*p).to_owned()).collect());
        self
    }

    /// Resume from `start` and optionally stop at `end`. Clears any
    /// exhaustion observed by earlier runs.
    pub fn set_cursor(mut self, start: impl Into<String>, end: Option<String>) -> Self {
        self.def.start_cursor = Some(start.into());
        self.def.end_cursor = end;
        self.def.current_cursor = None;
        self.exhausted = false;
        self
    }

    /// Cursor pointing after the last page [`run`](Self::run) returned;
    /// `None` once the result set is exhausted.
    pub fn get_cursor(&self) -> Option<&str> {
        self.def.current_cursor.as_deref()
    }

    /// Run the query and return up to `limit` entities.
    ///
    /// Running again continues from the stored cursor. Once the result set
    /// is exhausted the cursor resets to `None` and every further run comes
    /// back empty until [`set_cursor`](Self::set_cursor) rearms the query.
    pub fn run(&mut self, limit: i32) -> Result<Vec<Entity>> {
        if self.exhausted {
            return Ok(Vec::new());
        }
        self.def.limit = limit;
        if let Some(kind) = &self.def.kind {
            context::log_kind_access(kind);
        }
        if self.store.config().trace_queries {
            debug!(
                kind = self.def.kind.as_deref().unwrap_or("<kindless>"),
                filters = self.def.filters.len(),
                limit,
                "running query"
            );
        }
        let mut wire = build_wire_query(&self.def, self.store.project_id())?;
        wire.limit = Some(limit);
        wire.start_cursor = self
            .def
            .current_cursor
            .clone()
            .or_else(|| self.def.start_cursor.clone());
        let response = self.store.transport().run_query(RunQueryRequest {
            partition_id: WirePartitionId {
                project_id: self.store.project_id().to_owned(),
            },
            query: wire,
        })?;

        let batch = response.batch;
        if batch.entity_results.is_empty() {
            self.exhausted = true;
            self.def.current_cursor = None;
        } else {
            self.def.current_cursor = Some(batch.end_cursor.clone());
        }

        let mut entities = Vec::with_capacity(batch.entity_results.len());
        for result in &batch.entity_results {
            let mut entity = entity_from_wire(&result.entity)?;
            entity.set_version(result.version);
            entities.push(entity);
        }
        // The server saw the flipped direction; undo it for the caller.
        if self.def.orders.iter().any(|(_, dir)| dir.is_inverted()) {
            entities.reverse();
        }
        Ok(entities)
    }

    /// Run with limit 1 and return the first entity, if any.
    pub fn get_entry(&mut self) -> Result<Option<Entity>> {
        Ok(self.run(1)?.into_iter().next())
    }

    /// Count the matching entities server-side, up to `up_to`.
    pub fn count(&self, up_to: i64) -> Result<i64> {
        if let Some(kind) = &self.def.kind {
            context::log_kind_access(kind);
        }
        let response = self
            .store
            .transport()
            .run_aggregation(RunAggregationRequest {
                partition_id: WirePartitionId {
                    project_id: self.store.project_id().to_owned(),
                },
                query: build_wire_query(&self.def, self.store.project_id())?,
                up_to,
            })?;
        Ok(response.count)
    }
}

/// Parse a `"property operator"` filter spec.
fn parse_filter_spec(spec: &str) -> Result<(String, PropertyOperator)> {
    let mut parts = spec.split_whitespace();
    let property = parts
        .next()
        .ok_or_else(|| Error::Protocol("empty filter spec".into()))?;
    let operator = match parts.next() {
        None | Some("=") => PropertyOperator::Equal,
        Some("<") => PropertyOperator::LessThan,
        Some("<=") => PropertyOperator::LessThanOrEqual,
        Some(">") => PropertyOperator::GreaterThan,
        Some(">=") => PropertyOperator::GreaterThanOrEqual,
        Some("IN") => PropertyOperator::In,
        Some(other) => {
            return Err(Error::Protocol(format!(
                "unknown filter operator {other:?} in spec {spec:?}"
            )))
        }
    };
    if parts.next().is_some() {
        return Err(Error::Protocol(format!("malformed filter spec {spec:?}")));
    }
    Ok((property.to_owned(), operator))
}

fn filter_value_to_wire(value: &Value, project_id: &str) -> WireValue {
    crate::wire::value_to_wire(value, project_id, false)
}

/// Translate a definition into its wire form. Cursors and limit stay unset;
/// the caller fills them in.
pub(crate) fn build_wire_query(
    def: &nimbus_core::QueryDefinition,
    project_id: &str,
) -> Result<WireQuery> {
    let mut wire = WireQuery {
        kind: def.kind.iter().cloned().collect(),
        end_cursor: def.end_cursor.clone(),
        ..Default::default()
    };

    for (spec, value) in &def.filters {
        let (property, op) = parse_filter_spec(spec)?;
        let property = PropertyReference { name: property };
        match (op, value) {
            // Equality against a list means containment of every candidate:
            // one equality filter per element.
            (PropertyOperator::Equal, Value::List(items)) => {
                for item in items {
                    wire.filters.push(PropertyFilter {
                        property: property.clone(),
                        op: PropertyOperator::Equal,
                        value: filter_value_to_wire(item, project_id),
                    });
                }
            }
            _ => wire.filters.push(PropertyFilter {
                property,
                op,
                value: filter_value_to_wire(value, project_id),
            }),
        }
    }

    for (property, order) in &def.orders {
        // Inverted orders flip the physical direction; the page is reversed
        // locally after the fetch.
        let direction = match order {
            SortOrder::Ascending | SortOrder::InvertedDescending => Direction::Ascending,
            SortOrder::Descending | SortOrder::InvertedAscending => Direction::Descending,
        };
        wire.order.push(PropertyOrder {
            property: PropertyReference {
                name: property.clone(),
            },
            direction,
        });
    }

    if let Some(distinct) = &def.distinct {
        wire.distinct_on = distinct
            .iter()
            .map(|name| PropertyReference { name: name.clone() })
            .collect();
    }
    Ok(wire)
}
