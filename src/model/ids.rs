//! Strongly typed entity identifiers

use super::arena::Key;
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub Key);

        impl $name {
            /// Underlying arena key.
            pub fn key(self) -> Key {
                self.0
            }
        }

        impl From<Key> for $name {
            fn from(key: Key) -> Self {
                Self(key)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

entity_id!(
    /// Service group id.
    SgId,
    "sg"
);
entity_id!(
    /// Service unit id.
    SuId,
    "su"
);
entity_id!(
    /// Service instance id.
    SiId,
    "si"
);
entity_id!(
    /// Assignment record (SU-SI pair) id.
    SusiId,
    "susi"
);

/// Any entity id, used by checkpoint records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityId {
    Group(SgId),
    Unit(SuId),
    Instance(SiId),
    Assignment(SusiId),
}

macro_rules! entity_id_from {
    ($($variant:ident($ty:ident)),*) => {
        $(impl From<$ty> for EntityId {
            fn from(id: $ty) -> Self {
                EntityId::$variant(id)
            }
        })*
    };
}

entity_id_from!(Group(SgId), Unit(SuId), Instance(SiId), Assignment(SusiId));

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Group(id) => id.fmt(f),
            EntityId::Unit(id) => id.fmt(f),
            EntityId::Instance(id) => id.fmt(f),
            EntityId::Assignment(id) => id.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_kind() {
        let id = SuId(Key::new(3, 1));
        assert_eq!(id.to_string(), "su#3v1");
        assert_eq!(EntityId::Unit(id).to_string(), "su#3v1");
    }
}
