//! Hierarchical entity keys
//!
//! A [`Key`] identifies one entity in the remote store: a kind name plus either
//! a numeric id or a string name, and an optional parent key forming the
//! ancestor path. Keys are immutable value objects built bottom-up, so a parent
//! chain can never contain a cycle.
//!
//! ## Contract
//!
//! - Exactly one of id/name is set, or neither (a "partial" key whose id will
//!   be assigned by the server on first write).
//! - A digit-only name is normalized to an id at construction time.
//! - Equality is structural over kind, id, name and the full parent chain.

use std::fmt;
use std::sync::Arc;

/// The id-or-name leaf identifier of a complete key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IdOrName {
    /// Server- or caller-assigned numeric id.
    Id(i64),
    /// Caller-assigned string name (never digit-only).
    Name(String),
}

impl fmt::Display for IdOrName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdOrName::Id(id) => write!(f, "{}", id),
            IdOrName::Name(name) => f.write_str(name),
        }
    }
}

/// One datastore key: kind + (id XOR name) + optional parent.
///
/// Parents are shared via `Arc`, so cloning a deep key is cheap and two keys
/// may share an ancestor chain without copying it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Key {
    kind: String,
    id: Option<i64>,
    name: Option<String>,
    parent: Option<Arc<Key>>,
}

impl Key {
    /// Create a partial key: neither id nor name, pending server assignment.
    pub fn incomplete(kind: impl Into<String>) -> Self {
        Key {
            kind: kind.into(),
            id: None,
            name: None,
            parent: None,
        }
    }

    /// Create a key with a numeric id.
    pub fn with_id(kind: impl Into<String>, id: i64) -> Self {
        Key {
            kind: kind.into(),
            id: Some(id),
            name: None,
            parent: None,
        }
    }

    /// Create a key with a string name.
    ///
    /// A digit-only name is normalized to a numeric id so that
    /// `with_name(k, "42") == with_id(k, 42)`. Names too large to fit an `i64`
    /// stay names.
    pub fn with_name(kind: impl Into<String>, name: impl Into<String>) -> Self {
        let name = name.into();
        if !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(id) = name.parse::<i64>() {
                return Key::with_id(kind, id);
            }
        }
        Key {
            kind: kind.into(),
            id: None,
            name: Some(name),
            parent: None,
        }
    }

    /// Attach a parent, consuming `self` and returning the child key.
    ///
    /// Keys are values; this builds a new key whose ancestor path is
    /// `parent`'s path followed by `self`.
    pub fn with_parent(mut self, parent: Key) -> Self {
        self.parent = Some(Arc::new(parent));
        self
    }

    /// The kind (type/category) name of the entity this key addresses.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The numeric id, if this key carries one.
    pub fn id(&self) -> Option<i64> {
        self.id
    }

    /// The string name, if this key carries one.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// This key's id or name, or `None` if the key is partial.
    pub fn id_or_name(&self) -> Option<IdOrName> {
        match (self.id, &self.name) {
            (Some(id), _) => Some(IdOrName::Id(id)),
            (None, Some(name)) => Some(IdOrName::Name(name.clone())),
            (None, None) => None,
        }
    }

    /// The parent key, if any.
    pub fn parent(&self) -> Option<&Key> {
        self.parent.as_deref()
    }

    /// Whether this key is partial (belongs to an entity not yet written).
    ///
    /// Once the entity is written, the coordinator replaces the key with a
    /// complete one carrying the server-assigned id.
    pub fn is_partial(&self) -> bool {
        self.id.is_none() && self.name.is_none()
    }

    /// Whether this key carries an id or name.
    pub fn is_complete(&self) -> bool {
        !self.is_partial()
    }

    /// The ancestor path from root to this key (inclusive).
    pub fn path(&self) -> Vec<&Key> {
        let mut path = Vec::new();
        let mut current = Some(self);
        while let Some(key) = current {
            path.push(key);
            current = key.parent();
        }
        path.reverse();
        path
    }
}
