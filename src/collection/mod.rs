//! Collections - dual-backend lists and maps
//!
//! A collection holds its data in exactly one of two places: a local
//! in-process structure, or a backend table it writes through to. The
//! discriminant is a closed enum per collection type, never a nullable field.
//! A collection moves `Local -> Remote` at most once (promote); the reverse
//! never happens.
//!
//! Handles are cheap clones sharing one underlying collection. Each
//! collection is internally locked; its lock is released before the
//! persistence coordinator is notified of a mutation, so a flush is always
//! free to re-lock collections while serializing the namespace.
//!
//! Cyclic structures are unsupported: inserting a collection into itself is
//! rejected ([`crate::Error::SelfContainment`]), and indirect cycles must not
//! be built by callers - serialization and promote recurse through nested
//! collections.

mod list;
mod map;
mod named;

pub use list::List;
pub use map::Map;
pub use named::NamedMap;

use crate::codec::{self, EncodedRow};
use crate::store::Shared;
use crate::value::Value;
use crate::{Error, Result};
use std::sync::{Arc, Weak};

/// The three collection shapes, each with its table-name kind character
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    List,
    Map,
    Named,
}

impl CollectionKind {
    /// Character spliced between the table prefix and the identity
    pub fn kind_char(&self) -> char {
        match self {
            CollectionKind::List => 'l',
            CollectionKind::Map => 'd',
            CollectionKind::Named => 's',
        }
    }

    /// Inverse of [`kind_char`](Self::kind_char)
    pub fn from_kind_char(c: char) -> Option<CollectionKind> {
        match c {
            'l' => Some(CollectionKind::List),
            'd' => Some(CollectionKind::Map),
            's' => Some(CollectionKind::Named),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionKind::List => "list",
            CollectionKind::Map => "map",
            CollectionKind::Named => "named map",
        }
    }
}

impl std::fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Upgrade a collection's store handle, or report which operation needed it
pub(crate) fn upgrade(store: &Weak<Shared>, operation: &'static str) -> Result<Arc<Shared>> {
    store.upgrade().ok_or(Error::BackendUnavailable(operation))
}

/// Encode a value for a backend row, first promoting any nested `Local`
/// collection so the row's identity reference points at a real table.
pub(crate) fn ensure_persistable(value: &Value) -> Result<EncodedRow> {
    // A concurrent promote between the probe and the call is fine: the
    // collection ended up remote either way.
    let promoted = match value {
        Value::List(l) if !l.is_remote() => l.promote(),
        Value::Map(m) if !m.is_remote() => m.promote(),
        _ => Ok(()),
    };
    match promoted {
        Ok(()) | Err(Error::AlreadyRemote) => Ok(codec::encode_row(value)),
        Err(e) => Err(e),
    }
}
