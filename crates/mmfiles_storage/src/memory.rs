//! Anonymous in-memory region.

use crate::error::{StorageError, StorageResult};
use crate::region::{check_range, AccessPattern, MappedRegion, Protection};
use crate::sys::Mapping;
use std::path::Path;

/// A region backed by an anonymous mapping.
///
/// Nothing written here survives the process. Used for temporary datafiles
/// that are never read back after a crash.
///
/// # Example
///
/// ```rust
/// use mmfiles_storage::{AnonymousRegion, MappedRegion};
///
/// let region = AnonymousRegion::new(4096).unwrap();
/// assert_eq!(region.len(), 4096);
/// assert!(region.path().is_none());
/// ```
#[derive(Debug)]
pub struct AnonymousRegion {
    mapping: Mapping,
    len: usize,
}

impl AnonymousRegion {
    /// Allocates a zero-filled anonymous region of `len` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Unsupported`] on platforms without anonymous
    /// mappings, or an I/O error if the allocation fails.
    #[cfg(any(unix, windows))]
    pub fn new(len: usize) -> StorageResult<Self> {
        let mapping = Mapping::map_anon(len)?;
        Ok(Self { mapping, len })
    }

    /// Allocates a zero-filled anonymous region of `len` bytes.
    ///
    /// # Errors
    ///
    /// Always returns [`StorageError::Unsupported`] on this platform.
    #[cfg(not(any(unix, windows)))]
    pub fn new(_len: usize) -> StorageResult<Self> {
        Err(StorageError::Unsupported("anonymous memory mappings"))
    }
}

impl MappedRegion for AnonymousRegion {
    fn len(&self) -> usize {
        self.len
    }

    fn as_slice(&self) -> &[u8] {
        self.mapping.as_slice()
    }

    fn as_mut_slice(&mut self) -> StorageResult<&mut [u8]> {
        self.mapping.as_mut_slice()
    }

    fn flush_range(&self, offset: usize, len: usize) -> StorageResult<()> {
        check_range(offset, len, self.len)
    }

    fn protect(&mut self, protection: Protection) -> StorageResult<()> {
        self.mapping.set_protection(protection)
    }

    fn protection(&self) -> Protection {
        self.mapping.protection()
    }

    fn advise(&self, pattern: AccessPattern) -> StorageResult<()> {
        self.mapping.advise(pattern)?;
        Ok(())
    }

    fn path(&self) -> Option<&Path> {
        None
    }

    fn rename(&mut self, _to: &Path) -> StorageResult<()> {
        Err(StorageError::Unsupported("renaming an anonymous region"))
    }
}
