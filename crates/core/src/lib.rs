//! Core types for the Nimbus datastore access layer
//!
//! This crate defines the foundational types used throughout the system:
//! - Key: hierarchical entity key (kind + id/name + ancestor path)
//! - Key codec: URL-safe token encoding of keys (legacy reference envelope)
//! - Value: closed tagged enum of property value types
//! - Entity / PropertyMap: ordered properties plus key/version/index metadata
//! - QueryDefinition / SortOrder: declarative query descriptions
//! - Error: error taxonomy and contention classification
//! - Limits: fixed protocol constants
//!
//! Nothing in this crate talks to the network; the client crate builds the
//! transaction coordinator, query engine and mutation facade on top of it.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod entity;
pub mod error;
pub mod key;
pub mod limits;
pub mod query_def;
pub mod value;

pub use codec::DecodeError;
pub use entity::{normalize_index_exclusions, Entity, PropertyMap};
pub use error::{Error, Result, RpcStatus};
pub use key::{IdOrName, Key};
pub use query_def::{QueryDefinition, SortOrder, KEY_SPECIAL_PROPERTY};
pub use value::Value;
