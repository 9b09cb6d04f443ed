//! Fixed layouts of the structural markers and per-kind field offsets.

use super::header::{aligned_size, write_u32, write_u64, MarkerMut, MarkerRef, MARKER_HEADER_SIZE};
use super::types::MarkerType;
use crate::types::{CollectionId, DatabaseId, Fid, Tick, TransactionId, ViewId};

/// Format version stored in every datafile header.
pub const DATAFILE_VERSION: u32 = 2;

/// Size of the datafile header marker.
pub const HEADER_MARKER_SIZE: u32 = 32;

/// Size of the footer marker.
pub const FOOTER_MARKER_SIZE: u32 = 16;

/// Size of the collection header marker.
pub const COL_HEADER_MARKER_SIZE: u32 = 24;

/// Size of the prologue marker.
pub const PROLOGUE_MARKER_SIZE: u32 = 32;

/// Size of a begin, commit or abort transaction marker.
pub const TRANSACTION_MARKER_SIZE: u32 = 32;

/// Space every datafile needs besides its data markers.
pub const JOURNAL_OVERHEAD: u32 = HEADER_MARKER_SIZE + FOOTER_MARKER_SIZE;

const FIELD_1: usize = MARKER_HEADER_SIZE;
const FIELD_2: usize = MARKER_HEADER_SIZE + 8;

/// Allocates a zeroed, aligned marker buffer with size, type and tick set.
pub(crate) fn new_marker(marker_type: MarkerType, size: u32, tick: Tick) -> Vec<u8> {
    let mut buf = vec![0u8; aligned_size(u64::from(size)) as usize];
    if let Some(mut m) = MarkerMut::new(&mut buf) {
        m.set_size(size);
        m.set_type_and_tick(marker_type.as_u8(), tick);
    }
    buf
}

fn with_crc(mut buf: Vec<u8>) -> Vec<u8> {
    if let Some(mut m) = MarkerMut::new(&mut buf) {
        m.update_crc();
    }
    buf
}

/// Builds a checksummed datafile header marker. Its tick is the fid.
#[must_use]
pub fn header_marker(maximal_size: u32, fid: Fid) -> Vec<u8> {
    let mut buf = new_marker(MarkerType::Header, HEADER_MARKER_SIZE, fid);
    write_u32(&mut buf, FIELD_1, DATAFILE_VERSION);
    write_u32(&mut buf, FIELD_1 + 4, maximal_size);
    write_u64(&mut buf, FIELD_2, fid);
    with_crc(buf)
}

/// Builds a checksummed footer marker.
#[must_use]
pub fn footer_marker(tick: Tick) -> Vec<u8> {
    with_crc(new_marker(MarkerType::Footer, FOOTER_MARKER_SIZE, tick))
}

/// Builds a checksummed collection header marker.
#[must_use]
pub fn col_header_marker(collection_id: CollectionId, tick: Tick) -> Vec<u8> {
    let mut buf = new_marker(MarkerType::ColHeader, COL_HEADER_MARKER_SIZE, tick);
    write_u64(&mut buf, FIELD_1, collection_id.as_u64());
    with_crc(buf)
}

/// Builds a checksummed prologue marker.
#[must_use]
pub fn prologue_marker(database_id: DatabaseId, collection_id: CollectionId, tick: Tick) -> Vec<u8> {
    let mut buf = new_marker(MarkerType::Prologue, PROLOGUE_MARKER_SIZE, tick);
    write_u64(&mut buf, FIELD_1, database_id.as_u64());
    write_u64(&mut buf, FIELD_2, collection_id.as_u64());
    with_crc(buf)
}

/// Builds a checksummed blank marker spanning `size` bytes.
#[must_use]
pub fn blank_marker(size: u32, tick: Tick) -> Vec<u8> {
    with_crc(new_marker(MarkerType::Blank, size, tick))
}

/// Decoded fields of a datafile header marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatafileHeader {
    /// Format version.
    pub version: u32,
    /// Maximal size recorded at creation.
    pub maximal_size: u32,
    /// Datafile id.
    pub fid: Fid,
}

impl DatafileHeader {
    /// Decodes a header marker. Returns `None` for other marker types.
    #[must_use]
    pub fn parse(marker: &MarkerRef<'_>) -> Option<Self> {
        if marker.marker_type() != Some(MarkerType::Header) {
            return None;
        }
        Some(Self {
            version: marker.read_u32(FIELD_1)?,
            maximal_size: marker.read_u32(FIELD_1 + 4)?,
            fid: marker.read_u64(FIELD_2)?,
        })
    }
}

/// Offset of the database id, if the marker kind carries one.
const fn database_id_offset(t: MarkerType) -> Option<usize> {
    match t {
        MarkerType::Prologue
        | MarkerType::CreateCollection
        | MarkerType::DropCollection
        | MarkerType::RenameCollection
        | MarkerType::ChangeCollection
        | MarkerType::CreateIndex
        | MarkerType::DropIndex
        | MarkerType::CreateView
        | MarkerType::DropView
        | MarkerType::ChangeView
        | MarkerType::CreateDatabase
        | MarkerType::DropDatabase
        | MarkerType::BeginTransaction
        | MarkerType::CommitTransaction
        | MarkerType::AbortTransaction => Some(FIELD_1),
        _ => None,
    }
}

const fn collection_id_offset(t: MarkerType) -> Option<usize> {
    match t {
        MarkerType::ColHeader => Some(FIELD_1),
        MarkerType::Prologue
        | MarkerType::CreateCollection
        | MarkerType::DropCollection
        | MarkerType::RenameCollection
        | MarkerType::ChangeCollection
        | MarkerType::CreateIndex
        | MarkerType::DropIndex => Some(FIELD_2),
        _ => None,
    }
}

const fn view_id_offset(t: MarkerType) -> Option<usize> {
    match t {
        MarkerType::CreateView | MarkerType::DropView | MarkerType::ChangeView => Some(FIELD_2),
        _ => None,
    }
}

const fn transaction_id_offset(t: MarkerType) -> Option<usize> {
    match t {
        MarkerType::Document | MarkerType::Remove => Some(FIELD_1),
        MarkerType::BeginTransaction
        | MarkerType::CommitTransaction
        | MarkerType::AbortTransaction => Some(FIELD_2),
        _ => None,
    }
}

/// Offset of the variable payload, if the marker kind carries one.
pub(crate) const fn payload_offset(t: MarkerType) -> Option<usize> {
    match t {
        MarkerType::Document | MarkerType::Remove => Some(FIELD_2),
        MarkerType::CreateDatabase | MarkerType::DropDatabase => Some(FIELD_2),
        MarkerType::CreateCollection
        | MarkerType::DropCollection
        | MarkerType::RenameCollection
        | MarkerType::ChangeCollection
        | MarkerType::CreateIndex
        | MarkerType::DropIndex
        | MarkerType::CreateView
        | MarkerType::DropView
        | MarkerType::ChangeView => Some(FIELD_2 + 8),
        _ => None,
    }
}

/// Size of the trailing local document id of document and remove markers.
const LOCAL_DOCUMENT_ID_SIZE: usize = 8;

impl<'a> MarkerRef<'a> {
    /// Database id carried by the marker.
    #[must_use]
    pub fn database_id(&self) -> Option<DatabaseId> {
        let offset = database_id_offset(self.marker_type()?)?;
        self.read_u64(offset).map(DatabaseId)
    }

    /// Collection id carried by the marker.
    #[must_use]
    pub fn collection_id(&self) -> Option<CollectionId> {
        let offset = collection_id_offset(self.marker_type()?)?;
        self.read_u64(offset).map(CollectionId)
    }

    /// View id carried by the marker.
    #[must_use]
    pub fn view_id(&self) -> Option<ViewId> {
        let offset = view_id_offset(self.marker_type()?)?;
        self.read_u64(offset).map(ViewId)
    }

    /// Transaction id carried by the marker.
    #[must_use]
    pub fn transaction_id(&self) -> Option<TransactionId> {
        let offset = transaction_id_offset(self.marker_type()?)?;
        self.read_u64(offset).map(TransactionId)
    }

    /// Variable payload of the marker.
    ///
    /// For document and remove markers this is the CBOR document followed by
    /// the local document id; see [`MarkerRef::document`].
    #[must_use]
    pub fn payload(&self) -> Option<&'a [u8]> {
        self.slice_from(payload_offset(self.marker_type()?)?)
    }

    /// CBOR document of a document or remove marker.
    #[must_use]
    pub fn document(&self) -> Option<&'a [u8]> {
        if !self.marker_type()?.is_data() {
            return None;
        }
        let payload = self.payload()?;
        payload.get(..payload.len().checked_sub(LOCAL_DOCUMENT_ID_SIZE)?)
    }

    /// Local document id of a document or remove marker.
    #[must_use]
    pub fn local_document_id(&self) -> Option<u64> {
        if !self.marker_type()?.is_data() {
            return None;
        }
        let size = self.size() as usize;
        let offset = size.checked_sub(LOCAL_DOCUMENT_ID_SIZE)?;
        if offset < FIELD_2 {
            return None;
        }
        self.read_u64(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_marker_layout() {
        let buf = header_marker(4096, 77);
        let m = MarkerRef::new(&buf).unwrap();
        assert_eq!(m.size(), HEADER_MARKER_SIZE);
        assert_eq!(m.tick(), 77);
        assert!(m.check_crc());

        let header = DatafileHeader::parse(&m).unwrap();
        assert_eq!(header.version, DATAFILE_VERSION);
        assert_eq!(header.maximal_size, 4096);
        assert_eq!(header.fid, 77);
    }

    #[test]
    fn footer_is_header_only() {
        let buf = footer_marker(12);
        assert_eq!(buf.len(), 16);
        let m = MarkerRef::new(&buf).unwrap();
        assert_eq!(m.marker_type(), Some(MarkerType::Footer));
        assert!(m.check_crc());
        assert!(m.payload().is_none());
    }

    #[test]
    fn prologue_fields() {
        let buf = prologue_marker(DatabaseId(1), CollectionId(99), 5);
        let m = MarkerRef::new(&buf).unwrap();
        assert_eq!(m.database_id(), Some(DatabaseId(1)));
        assert_eq!(m.collection_id(), Some(CollectionId(99)));
        assert_eq!(m.transaction_id(), None);
    }

    #[test]
    fn blank_marker_keeps_span() {
        let buf = blank_marker(44, 3);
        assert_eq!(buf.len(), 48);
        let m = MarkerRef::new(&buf).unwrap();
        assert_eq!(m.size(), 44);
        assert_eq!(m.marker_type(), Some(MarkerType::Blank));
        assert!(m.check_crc());
    }

    #[test]
    fn parse_rejects_non_header() {
        let buf = footer_marker(1);
        assert!(DatafileHeader::parse(&MarkerRef::new(&buf).unwrap()).is_none());
    }

    #[test]
    fn journal_overhead() {
        assert_eq!(JOURNAL_OVERHEAD, 48);
    }
}
