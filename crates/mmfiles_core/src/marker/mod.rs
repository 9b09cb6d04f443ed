//! Marker binary format.
//!
//! Every record stored in a datafile is a **marker**: a fixed 16-byte
//! header followed by a type-specific body.
//!
//! ```text
//! ┌───────────┬───────────┬──────────────────────────────┬─────────────┐
//! │ size (4)  │ crc (4)   │ type (1) │ tick (7)          │ body ...    │
//! └───────────┴───────────┴──────────────────────────────┴─────────────┘
//!   u32 LE      u32 LE      u64 LE, type in the top 8 bits
//! ```
//!
//! - `size` covers header and body, but not the alignment padding
//! - markers start at 8-byte aligned offsets
//! - `crc` is a CRC32 (IEEE) over `[0, size)` with the crc field read as zero
//! - a `size` of zero marks the end of written data
//!
//! Per-kind body layouts:
//!
//! ```text
//! header        version u32 @16, maximal size u32 @20, fid u64 @24      (32)
//! footer        -                                                         (16)
//! col header    collection id @16                                         (24)
//! prologue      database id @16, collection id @24                        (32)
//! document      transaction id @16, CBOR document @24, local doc id (last 8)
//! remove        same as document
//! collection    database id @16, collection id @24, payload @32
//! index         database id @16, collection id @24, payload @32
//! view          database id @16, view id @24, payload @32
//! database      database id @16, payload @24
//! transaction   database id @16, transaction id @24                      (32)
//! ```

mod document;
mod header;
mod layout;
mod types;
mod wal;

pub use document::{document_key, document_revision, encode_document};
pub use header::{
    aligned_size, is_legacy_marker, marker_crc, MarkerMut, MarkerRef, MARKER_ALIGNMENT,
    MARKER_HEADER_SIZE,
};
pub use layout::{
    blank_marker, col_header_marker, footer_marker, header_marker, prologue_marker,
    DatafileHeader, COL_HEADER_MARKER_SIZE, DATAFILE_VERSION, FOOTER_MARKER_SIZE,
    HEADER_MARKER_SIZE, JOURNAL_OVERHEAD, PROLOGUE_MARKER_SIZE, TRANSACTION_MARKER_SIZE,
};
pub use types::{type_name, MarkerType};
pub use wal::WalMarker;
