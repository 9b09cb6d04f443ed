//! Mapped region trait definition.

use crate::error::StorageResult;
use std::fmt;
use std::path::Path;

/// Memory protection of a mapped region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    /// Pages may be read but not written.
    ReadOnly,
    /// Pages may be read and written.
    ReadWrite,
}

/// Access-pattern hint passed to the operating system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessPattern {
    /// No special treatment.
    Normal,
    /// Pages will be read front to back, as during a scan or while appending.
    Sequential,
    /// Pages will be read in no particular order, as for a sealed file.
    Random,
    /// Pages will be needed soon.
    WillNeed,
}

/// A fixed-length byte region shared with the operating system.
///
/// Regions are **opaque byte buffers**. The datafile layer decides where
/// markers go; the region only hands out slices and pushes dirty pages to
/// durable storage on request.
///
/// # Invariants
///
/// - `len()` never changes over the lifetime of a region
/// - `as_slice()` always returns exactly `len()` bytes while mapped
/// - `as_mut_slice()` fails with [`crate::StorageError::ReadOnly`] while the
///   protection is [`Protection::ReadOnly`]
/// - Regions must be `Send + Sync` so a datafile can be shared across threads
///
/// # Implementors
///
/// - [`super::AnonymousRegion`] - In-memory only
/// - [`super::FileRegion`] - Backed by a physical file
pub trait MappedRegion: Send + Sync + fmt::Debug {
    /// Returns the mapped length in bytes.
    fn len(&self) -> usize;

    /// Returns `true` if the region has zero length.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the whole mapped region.
    fn as_slice(&self) -> &[u8];

    /// Returns the whole mapped region for writing.
    ///
    /// # Errors
    ///
    /// Returns an error if the region is currently mapped read-only or has
    /// lost its mapping.
    fn as_mut_slice(&mut self) -> StorageResult<&mut [u8]>;

    /// Flushes `len` bytes starting at `offset` to durable storage.
    ///
    /// Anonymous regions have nothing to flush and return immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if the range is out of bounds or the flush fails.
    fn flush_range(&self, offset: usize, len: usize) -> StorageResult<()>;

    /// Changes the protection of the whole region.
    ///
    /// # Errors
    ///
    /// Returns an error if the operating system refuses the change. A failed
    /// change may leave the region unmapped.
    fn protect(&mut self, protection: Protection) -> StorageResult<()>;

    /// Returns the current protection.
    fn protection(&self) -> Protection;

    /// Hints the operating system about the upcoming access pattern.
    ///
    /// # Errors
    ///
    /// Returns an error if the hint is rejected. Callers usually ignore it.
    fn advise(&self, pattern: AccessPattern) -> StorageResult<()>;

    /// Returns the backing file path, or `None` for anonymous regions.
    fn path(&self) -> Option<&Path>;

    /// Renames the backing file.
    ///
    /// # Errors
    ///
    /// Returns an error for anonymous regions or if the rename fails.
    fn rename(&mut self, to: &Path) -> StorageResult<()>;
}

/// Checks that `[offset, offset + len)` lies inside a region of `size` bytes.
pub(crate) fn check_range(offset: usize, len: usize, size: usize) -> StorageResult<()> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(crate::StorageError::OutOfBounds { offset, len, size }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn range_overflow_is_out_of_bounds() {
        assert!(check_range(usize::MAX, 2, 4096).is_err());
    }

    proptest! {
        #[test]
        fn range_check_matches_bounds(offset in 0usize..10_000, len in 0usize..10_000, size in 0usize..10_000) {
            prop_assert_eq!(check_range(offset, len, size).is_ok(), offset + len <= size);
        }
    }
}
