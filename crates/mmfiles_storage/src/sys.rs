//! Platform mapping primitives.
//!
//! Every `unsafe` call of the crate lives here. File-backed mappings are
//! unsafe because another process could truncate or modify the file while
//! it is mapped; the engine holds the files it maps exclusively and never
//! shrinks them while a mapping exists.

#![allow(unsafe_code)]

use crate::error::{StorageError, StorageResult};
use crate::region::{AccessPattern, Protection};
use memmap2::{Mmap, MmapMut, MmapOptions};
use std::fs::File;
use std::io;

/// Page size assumed when the operating system cannot be asked.
pub const FALLBACK_PAGE_SIZE: usize = 4096;

/// Returns the operating system's page size.
#[cfg(unix)]
#[must_use]
pub fn page_size() -> usize {
    // SAFETY: sysconf only reads a configuration value.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    usize::try_from(size)
        .ok()
        .filter(|s| *s > 0)
        .unwrap_or(FALLBACK_PAGE_SIZE)
}

/// Returns the operating system's page size.
#[cfg(not(unix))]
#[must_use]
pub fn page_size() -> usize {
    FALLBACK_PAGE_SIZE
}

/// The live mapping of a region.
#[derive(Debug)]
pub(crate) enum Mapping {
    Writable(MmapMut),
    ReadOnly(Mmap),
    /// Zero-length files cannot be mapped; also the state after a failed
    /// protection switch.
    Unmapped,
}

impl Mapping {
    /// Maps `len` bytes of `file`.
    pub(crate) fn map_file(file: &File, len: usize, protection: Protection) -> io::Result<Self> {
        if len == 0 {
            return Ok(Self::Unmapped);
        }
        let mut options = MmapOptions::new();
        options.len(len);
        match protection {
            // SAFETY: the file is owned by the region for the lifetime of the
            // mapping and is never truncated below `len` while mapped.
            Protection::ReadWrite => unsafe { options.map_mut(file) }.map(Self::Writable),
            // SAFETY: as above.
            Protection::ReadOnly => unsafe { options.map(file) }.map(Self::ReadOnly),
        }
    }

    /// Creates an anonymous writable mapping.
    pub(crate) fn map_anon(len: usize) -> io::Result<Self> {
        MmapMut::map_anon(len).map(Self::Writable)
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        match self {
            Self::Writable(m) => &m[..],
            Self::ReadOnly(m) => &m[..],
            Self::Unmapped => &[],
        }
    }

    pub(crate) fn as_mut_slice(&mut self) -> StorageResult<&mut [u8]> {
        match self {
            Self::Writable(m) => Ok(&mut m[..]),
            Self::ReadOnly(_) => Err(StorageError::ReadOnly),
            Self::Unmapped => Err(StorageError::Unmapped),
        }
    }

    pub(crate) fn protection(&self) -> Protection {
        match self {
            Self::Writable(_) => Protection::ReadWrite,
            Self::ReadOnly(_) | Self::Unmapped => Protection::ReadOnly,
        }
    }

    pub(crate) fn flush_range(&self, offset: usize, len: usize) -> io::Result<()> {
        match self {
            Self::Writable(m) if len > 0 => m.flush_range(offset, len),
            _ => Ok(()),
        }
    }

    pub(crate) fn set_protection(&mut self, protection: Protection) -> StorageResult<()> {
        if self.protection() == protection {
            return Ok(());
        }
        match std::mem::replace(self, Self::Unmapped) {
            Self::Writable(m) => *self = Self::ReadOnly(m.make_read_only()?),
            // SAFETY: every file region is opened read-write, so the pages may
            // legally become writable again.
            Self::ReadOnly(m) => *self = Self::Writable(unsafe { m.make_mut() }?),
            Self::Unmapped => return Err(StorageError::Unmapped),
        }
        Ok(())
    }

    #[cfg(unix)]
    pub(crate) fn advise(&self, pattern: AccessPattern) -> io::Result<()> {
        use memmap2::Advice;
        let advice = match pattern {
            AccessPattern::Normal => Advice::Normal,
            AccessPattern::Sequential => Advice::Sequential,
            AccessPattern::Random => Advice::Random,
            AccessPattern::WillNeed => Advice::WillNeed,
        };
        match self {
            Self::Writable(m) => m.advise(advice),
            Self::ReadOnly(m) => m.advise(advice),
            Self::Unmapped => Ok(()),
        }
    }

    #[cfg(not(unix))]
    pub(crate) fn advise(&self, _pattern: AccessPattern) -> io::Result<()> {
        Ok(())
    }
}
