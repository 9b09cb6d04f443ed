//! Core type definitions.

use std::fmt;

/// Logical timestamp of a marker. Only the low 56 bits are stored.
pub type Tick = u64;

/// Datafile identifier, encoded in the file name and the header marker.
pub type Fid = u64;

/// Mask selecting the tick bits of the packed type-and-tick field.
pub const TICK_MASK: u64 = 0x00FF_FFFF_FFFF_FFFF;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
        pub struct $name(pub u64);

        impl $name {
            /// Creates a new identifier.
            #[must_use]
            pub const fn new(id: u64) -> Self {
                Self(id)
            }

            /// Returns the raw identifier value.
            #[must_use]
            pub const fn as_u64(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, ":{}"), self.0)
            }
        }
    };
}

id_type!(
    /// Identifier of a database.
    DatabaseId,
    "db"
);

id_type!(
    /// Identifier of a collection.
    ///
    /// Collection ids are unique across databases, so dropped-collection
    /// bookkeeping does not need the database id.
    CollectionId,
    "col"
);

id_type!(
    /// Identifier of a transaction.
    TransactionId,
    "tid"
);

id_type!(
    /// Identifier of a view.
    ViewId,
    "view"
);
