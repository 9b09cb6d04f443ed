//! Marker type enumeration.

use serde::Serialize;

/// Type of a marker, stored in the top 8 bits of the type-and-tick field.
///
/// The numeric values are part of the on-disk format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum MarkerType {
    /// Datafile header, always the first marker.
    Header = 10,
    /// Footer written when a datafile is sealed.
    Footer = 11,
    /// Placeholder left behind by a repair.
    Blank = 12,
    /// Collection header of a collection datafile.
    ColHeader = 20,
    /// Names the database and collection of the following WAL markers.
    Prologue = 25,
    /// Document insert or update.
    Document = 30,
    /// Document removal.
    Remove = 31,
    /// Collection created.
    CreateCollection = 40,
    /// Collection dropped.
    DropCollection = 41,
    /// Collection renamed.
    RenameCollection = 42,
    /// Collection properties changed.
    ChangeCollection = 43,
    /// Index created.
    CreateIndex = 50,
    /// Index dropped.
    DropIndex = 51,
    /// Database created.
    CreateDatabase = 60,
    /// Database dropped.
    DropDatabase = 61,
    /// Transaction started.
    BeginTransaction = 70,
    /// Transaction committed.
    CommitTransaction = 71,
    /// Transaction aborted.
    AbortTransaction = 72,
    /// View created.
    CreateView = 80,
    /// View dropped.
    DropView = 81,
    /// View properties changed.
    ChangeView = 82,
}

impl MarkerType {
    /// Exclusive lower bound of valid raw type values.
    pub const MIN_SENTINEL: u8 = 9;
    /// Exclusive upper bound of valid raw type values.
    pub const MAX_SENTINEL: u8 = 83;

    /// Decodes a raw type value.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            10 => Self::Header,
            11 => Self::Footer,
            12 => Self::Blank,
            20 => Self::ColHeader,
            25 => Self::Prologue,
            30 => Self::Document,
            31 => Self::Remove,
            40 => Self::CreateCollection,
            41 => Self::DropCollection,
            42 => Self::RenameCollection,
            43 => Self::ChangeCollection,
            50 => Self::CreateIndex,
            51 => Self::DropIndex,
            60 => Self::CreateDatabase,
            61 => Self::DropDatabase,
            70 => Self::BeginTransaction,
            71 => Self::CommitTransaction,
            72 => Self::AbortTransaction,
            80 => Self::CreateView,
            81 => Self::DropView,
            82 => Self::ChangeView,
            _ => return None,
        })
    }

    /// Returns the raw type value.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Human-readable name used in diagnostics.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Header => "datafile header",
            Self::Footer => "footer",
            Self::Blank => "blank marker (used when repairing datafiles)",
            Self::ColHeader => "collection header",
            Self::Prologue => "prologue",
            Self::Document => "document",
            Self::Remove => "remove document",
            Self::CreateCollection => "create collection",
            Self::DropCollection => "drop collection",
            Self::RenameCollection => "rename collection",
            Self::ChangeCollection => "change collection",
            Self::CreateIndex => "create index",
            Self::DropIndex => "drop index",
            Self::CreateDatabase => "create database",
            Self::DropDatabase => "drop database",
            Self::BeginTransaction => "begin transaction",
            Self::CommitTransaction => "commit transaction",
            Self::AbortTransaction => "abort transaction",
            Self::CreateView => "create view",
            Self::DropView => "drop view",
            Self::ChangeView => "change view",
        }
    }

    /// Returns `true` for markers that count towards a datafile's tick range.
    ///
    /// Structural markers (header, footer, collection header, prologue) do not.
    #[must_use]
    pub const fn tracks_tick(self) -> bool {
        !matches!(
            self,
            Self::Header | Self::Footer | Self::ColHeader | Self::Prologue
        )
    }

    /// Returns `true` for document and remove markers.
    #[must_use]
    pub const fn is_data(self) -> bool {
        matches!(self, Self::Document | Self::Remove)
    }
}

/// Returns the diagnostic name for a raw type value.
#[must_use]
pub fn type_name(raw: u8) -> &'static str {
    MarkerType::from_u8(raw).map_or("unused/unknown", MarkerType::name)
}
