//! Strongly-typed identifiers for persisted records and schema versions.

use serde::{Deserialize, Serialize};

/// Generates a newtype wrapper around an integer with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident($inner:ty)
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub $inner);

        impl $name {
            /// Return the inner value.
            pub const fn into_inner(self) -> $inner {
                self.0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<$inner> for $name {
            fn from(id: $inner) -> Self {
                Self(id)
            }
        }

        impl From<$name> for $inner {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id! {
    /// Identifier of one persisted entity, unique within its record type.
    RecordId(i64)
}

define_id! {
    /// Identifier of the kind of entity a record holds.
    RecordTypeId(u32)
}

define_id! {
    /// Schema/version checksum stored in the marker table.
    ///
    /// A store only opens when the on-disk checksum equals the one the caller
    /// expects.
    SchemaChecksum(u32)
}

impl SchemaChecksum {
    /// Derive a checksum from a textual schema description (CRC-32).
    pub fn of(description: &str) -> Self {
        Self(crc32fast::hash(description.as_bytes()))
    }
}
