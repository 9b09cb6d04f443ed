//! Fixed marker header: field access, packing and checksums.

use super::types::{type_name, MarkerType};
use crate::types::{Tick, TICK_MASK};

/// Size of the fixed marker header.
pub const MARKER_HEADER_SIZE: usize = 16;

/// Alignment of every marker inside a datafile.
pub const MARKER_ALIGNMENT: u64 = 8;

const SIZE_OFFSET: usize = 0;
const CRC_OFFSET: usize = 4;
const TYPE_AND_TICK_OFFSET: usize = 8;

/// Raw type values below this size are treated as filler when invalid.
const FILLER_LIMIT: u32 = 128;

/// Rounds `size` up to the marker alignment.
#[must_use]
pub const fn aligned_size(size: u64) -> u64 {
    (size + MARKER_ALIGNMENT - 1) & !(MARKER_ALIGNMENT - 1)
}

pub(crate) fn read_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    let raw = bytes.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

pub(crate) fn read_u64(bytes: &[u8], offset: usize) -> Option<u64> {
    let raw: [u8; 8] = bytes.get(offset..offset + 8)?.try_into().ok()?;
    Some(u64::from_le_bytes(raw))
}

pub(crate) fn write_u32(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn write_u64(bytes: &mut [u8], offset: usize, value: u64) {
    bytes[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

/// Computes the CRC32 (IEEE) of a marker body with its crc field zeroed.
///
/// `body` must start at the marker and span exactly `size` bytes.
#[must_use]
pub fn marker_crc(body: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&body[..CRC_OFFSET]);
    hasher.update(&[0; 4]);
    hasher.update(&body[CRC_OFFSET + 4..]);
    hasher.finalize()
}

/// Detects a marker written by the 2.8-era format.
///
/// That format stored the type as a `u32` at offset 8, the tick at offset 16
/// and checksummed markers with CRC32-C. A match means the file must be
/// migrated with the export and import tools; it is never read.
#[must_use]
pub fn is_legacy_marker(bytes: &[u8]) -> bool {
    const LEGACY_HEADER_SIZE: usize = 24;

    let (Some(size), Some(stored)) = (read_u32(bytes, SIZE_OFFSET), read_u32(bytes, CRC_OFFSET))
    else {
        return false;
    };
    let size = size as usize;
    if size < LEGACY_HEADER_SIZE || size > bytes.len() {
        return false;
    }
    let mut crc = crc32c::crc32c(&bytes[..CRC_OFFSET]);
    crc = crc32c::crc32c_append(crc, &[0; 4]);
    crc = crc32c::crc32c_append(crc, &bytes[CRC_OFFSET + 4..size]);
    crc == stored
}

/// Read-only view of a marker inside a buffer.
///
/// The view always covers at least the 16 header bytes. Body accessors
/// return `None` instead of reading past the end of the underlying buffer.
#[derive(Debug, Clone, Copy)]
pub struct MarkerRef<'a> {
    bytes: &'a [u8],
}

impl<'a> MarkerRef<'a> {
    /// Creates a view over `bytes`, which must hold at least a full header.
    #[must_use]
    pub fn new(bytes: &'a [u8]) -> Option<Self> {
        (bytes.len() >= MARKER_HEADER_SIZE).then_some(Self { bytes })
    }

    /// Total marker size including the header, excluding padding.
    #[must_use]
    pub fn size(&self) -> u32 {
        read_u32(self.bytes, SIZE_OFFSET).unwrap_or(0)
    }

    /// Size rounded up to the marker alignment.
    #[must_use]
    pub fn aligned_size(&self) -> u64 {
        aligned_size(u64::from(self.size()))
    }

    /// Stored checksum.
    #[must_use]
    pub fn crc(&self) -> u32 {
        read_u32(self.bytes, CRC_OFFSET).unwrap_or(0)
    }

    /// Packed type-and-tick field.
    #[must_use]
    pub fn type_and_tick(&self) -> u64 {
        read_u64(self.bytes, TYPE_AND_TICK_OFFSET).unwrap_or(0)
    }

    /// Raw type value.
    #[must_use]
    pub fn raw_type(&self) -> u8 {
        (self.type_and_tick() >> 56) as u8
    }

    /// Decoded marker type, if known.
    #[must_use]
    pub fn marker_type(&self) -> Option<MarkerType> {
        MarkerType::from_u8(self.raw_type())
    }

    /// Tick of the marker.
    #[must_use]
    pub fn tick(&self) -> Tick {
        self.type_and_tick() & TICK_MASK
    }

    /// Diagnostic name of the marker type.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        type_name(self.raw_type())
    }

    /// Number of bytes available from the marker start to the buffer end.
    #[must_use]
    pub fn available(&self) -> usize {
        self.bytes.len()
    }

    /// Returns `true` if every header field is zero.
    #[must_use]
    pub fn is_zeroed(&self) -> bool {
        self.bytes[..MARKER_HEADER_SIZE].iter().all(|b| *b == 0)
    }

    /// The marker bytes `[0, size)`, if the size is sane and in bounds.
    #[must_use]
    pub fn body(&self) -> Option<&'a [u8]> {
        let size = self.size() as usize;
        if size < MARKER_HEADER_SIZE {
            return None;
        }
        self.bytes.get(..size)
    }

    /// Checks the type range and the size ceiling.
    #[must_use]
    pub fn is_valid(&self, max_marker_size: u32) -> bool {
        let raw = self.raw_type();
        raw > MarkerType::MIN_SENTINEL
            && raw < MarkerType::MAX_SENTINEL
            && self.size() < max_marker_size
    }

    /// Returns `true` for small zero-typed markers left behind as padding.
    #[must_use]
    pub fn is_filler(&self) -> bool {
        self.raw_type() == 0 && self.size() < FILLER_LIMIT
    }

    /// Recomputes the checksum, if the marker body is in bounds.
    #[must_use]
    pub fn calculate_crc(&self) -> Option<u32> {
        self.body().map(marker_crc)
    }

    /// Returns `true` if the marker is in bounds and its checksum matches.
    #[must_use]
    pub fn check_crc(&self) -> bool {
        self.calculate_crc() == Some(self.crc())
    }

    /// Reads a `u32` at `offset` inside the marker body.
    #[must_use]
    pub fn read_u32(&self, offset: usize) -> Option<u32> {
        read_u32(self.body()?, offset)
    }

    /// Reads a `u64` at `offset` inside the marker body.
    #[must_use]
    pub fn read_u64(&self, offset: usize) -> Option<u64> {
        read_u64(self.body()?, offset)
    }

    /// The marker body from `offset` to `size`.
    #[must_use]
    pub fn slice_from(&self, offset: usize) -> Option<&'a [u8]> {
        self.body()?.get(offset..)
    }

    /// Up to `limit` raw bytes from the marker start, for hex dumps.
    #[must_use]
    pub fn raw_prefix(&self, limit: usize) -> &'a [u8] {
        &self.bytes[..limit.min(self.bytes.len())]
    }
}

/// Mutable view of a marker header inside a buffer.
#[derive(Debug)]
pub struct MarkerMut<'a> {
    bytes: &'a mut [u8],
}

impl<'a> MarkerMut<'a> {
    /// Creates a mutable view over `bytes`, which must hold a full header.
    #[must_use]
    pub fn new(bytes: &'a mut [u8]) -> Option<Self> {
        (bytes.len() >= MARKER_HEADER_SIZE).then_some(Self { bytes })
    }

    /// Stores the marker size.
    pub fn set_size(&mut self, size: u32) {
        write_u32(self.bytes, SIZE_OFFSET, size);
    }

    /// Stores the checksum.
    pub fn set_crc(&mut self, crc: u32) {
        write_u32(self.bytes, CRC_OFFSET, crc);
    }

    /// Replaces the tick, keeping the type bits.
    pub fn set_tick(&mut self, tick: Tick) {
        let packed = self.view().type_and_tick();
        write_u64(
            self.bytes,
            TYPE_AND_TICK_OFFSET,
            (packed & !TICK_MASK) | (tick & TICK_MASK),
        );
    }

    /// Replaces the type, keeping the tick bits.
    pub fn set_type(&mut self, marker_type: u8) {
        let packed = self.view().type_and_tick();
        write_u64(
            self.bytes,
            TYPE_AND_TICK_OFFSET,
            (packed & TICK_MASK) | (u64::from(marker_type) << 56),
        );
    }

    /// Stores type and tick in a single write.
    pub fn set_type_and_tick(&mut self, marker_type: u8, tick: Tick) {
        write_u64(
            self.bytes,
            TYPE_AND_TICK_OFFSET,
            (u64::from(marker_type) << 56) | (tick & TICK_MASK),
        );
    }

    /// Recomputes and stores the checksum over `[0, size)`.
    ///
    /// Returns `false` if the stored size does not fit the buffer.
    pub fn update_crc(&mut self) -> bool {
        match self.view().calculate_crc() {
            Some(crc) => {
                self.set_crc(crc);
                true
            }
            None => false,
        }
    }

    /// Returns a read-only view of the same bytes.
    #[must_use]
    pub fn view(&self) -> MarkerRef<'_> {
        MarkerRef { bytes: self.bytes }
    }

    /// The whole underlying buffer.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn marker(size: usize, raw_type: u8, tick: Tick) -> Vec<u8> {
        let mut buf = vec![0u8; aligned_size(size as u64) as usize];
        let mut m = MarkerMut::new(&mut buf).unwrap();
        m.set_size(size as u32);
        m.set_type_and_tick(raw_type, tick);
        buf
    }

    #[test]
    fn header_fields_are_little_endian() {
        let buf = marker(24, MarkerType::Document.as_u8(), 0x0102);
        assert_eq!(&buf[0..4], &24u32.to_le_bytes());
        assert_eq!(buf[8], 0x02);
        assert_eq!(buf[9], 0x01);
        assert_eq!(buf[15], 30);
    }

    #[test]
    fn set_tick_keeps_type() {
        let mut buf = marker(16, MarkerType::Footer.as_u8(), 5);
        let mut m = MarkerMut::new(&mut buf).unwrap();
        m.set_tick(77);
        assert_eq!(m.view().marker_type(), Some(MarkerType::Footer));
        assert_eq!(m.view().tick(), 77);
        m.set_type(MarkerType::Blank.as_u8());
        assert_eq!(m.view().tick(), 77);
        assert_eq!(m.view().marker_type(), Some(MarkerType::Blank));
    }

    #[test]
    fn crc_ignores_crc_field() {
        let mut buf = marker(40, MarkerType::Document.as_u8(), 9);
        buf[20..30].copy_from_slice(b"0123456789");
        let mut m = MarkerMut::new(&mut buf).unwrap();
        assert!(m.update_crc());
        let first = m.view().crc();
        assert!(m.update_crc());
        assert_eq!(m.view().crc(), first);
        assert!(m.view().check_crc());
    }

    #[test]
    fn crc_detects_payload_change() {
        let mut buf = marker(40, MarkerType::Document.as_u8(), 9);
        MarkerMut::new(&mut buf).unwrap().update_crc();
        buf[30] ^= 0xFF;
        assert!(!MarkerRef::new(&buf).unwrap().check_crc());
    }

    #[test]
    fn body_refuses_out_of_bounds_size() {
        let mut buf = marker(16, MarkerType::Blank.as_u8(), 1);
        MarkerMut::new(&mut buf).unwrap().set_size(1000);
        let m = MarkerRef::new(&buf).unwrap();
        assert!(m.body().is_none());
        assert!(!m.check_crc());
        assert!(m.read_u64(8).is_none());
    }

    #[test]
    fn validity_rules() {
        let valid = marker(32, MarkerType::Header.as_u8(), 1);
        assert!(MarkerRef::new(&valid).unwrap().is_valid(1024));
        assert!(!MarkerRef::new(&valid).unwrap().is_valid(32));

        let filler = marker(64, 0, 0);
        let m = MarkerRef::new(&filler).unwrap();
        assert!(!m.is_valid(1024));
        assert!(m.is_filler());

        let unknown = marker(16, MarkerType::MAX_SENTINEL, 1);
        assert!(!MarkerRef::new(&unknown).unwrap().is_valid(1024));
    }

    #[test]
    fn legacy_markers_are_detected() {
        let mut buf = vec![0u8; 40];
        buf[0..4].copy_from_slice(&40u32.to_le_bytes());
        buf[8..12].copy_from_slice(&1000u32.to_le_bytes());
        buf[16..24].copy_from_slice(&5u64.to_le_bytes());
        let mut crc = crc32c::crc32c(&buf[..4]);
        crc = crc32c::crc32c_append(crc, &[0; 4]);
        crc = crc32c::crc32c_append(crc, &buf[8..40]);
        buf[4..8].copy_from_slice(&crc.to_le_bytes());

        assert!(is_legacy_marker(&buf));
        assert!(!MarkerRef::new(&buf).unwrap().check_crc());
    }

    #[test]
    fn current_markers_are_not_legacy() {
        let mut buf = marker(32, MarkerType::Header.as_u8(), 3);
        MarkerMut::new(&mut buf).unwrap().update_crc();
        assert!(!is_legacy_marker(&buf));
        assert!(!is_legacy_marker(&buf[..10]));
    }

    proptest! {
        #[test]
        fn packed_type_and_tick_is_lossless(raw_type in any::<u8>(), tick in 0u64..(1 << 56)) {
            let mut buf = [0u8; 16];
            let mut m = MarkerMut::new(&mut buf).unwrap();
            m.set_type_and_tick(raw_type, tick);
            prop_assert_eq!(m.view().raw_type(), raw_type);
            prop_assert_eq!(m.view().tick(), tick);
        }

        #[test]
        fn alignment_invariant(size in 0u64..=u64::from(u32::MAX)) {
            let aligned = aligned_size(size);
            prop_assert_eq!(aligned % MARKER_ALIGNMENT, 0);
            prop_assert!(aligned >= size);
            prop_assert!(aligned - size < MARKER_ALIGNMENT);
        }

        #[test]
        fn crc_round_trip(payload in proptest::collection::vec(any::<u8>(), 0..256), tick in 1u64..(1 << 56)) {
            let size = MARKER_HEADER_SIZE + payload.len();
            let mut buf = marker(size, MarkerType::Document.as_u8(), tick);
            buf[MARKER_HEADER_SIZE..size].copy_from_slice(&payload);
            let mut m = MarkerMut::new(&mut buf).unwrap();
            prop_assert!(m.update_crc());
            let view = m.view();
            prop_assert_eq!(view.calculate_crc(), Some(view.crc()));
            prop_assert_eq!(view.tick(), tick);
        }
    }
}
