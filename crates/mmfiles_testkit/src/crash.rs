//! Crash injection for datafile tests.
//!
//! [`CrashableRegion`] wraps a real mapped region and starts failing
//! flushes with "no space left on device" once its flush budget is spent.
//! The [`CrashSwitch`] stays with the test so the budget can be changed
//! after the region was handed to a datafile.
//!
//! ## Usage
//!
//! ```rust
//! use mmfiles_core::Datafile;
//! use mmfiles_storage::AnonymousRegion;
//! use mmfiles_testkit::{test_context, CrashableRegion};
//!
//! let (region, switch) = CrashableRegion::new(Box::new(AnonymousRegion::new(4096).unwrap()));
//! let ctx = test_context();
//! let datafile = Datafile::with_region(&ctx, Box::new(region), 1, true).unwrap();
//! switch.fail_after(0);
//! assert!(switch.is_armed());
//! # drop(datafile);
//! ```

use mmfiles_storage::{AccessPattern, MappedRegion, Protection, StorageError, StorageResult};
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Raw OS error number for "no space left on device".
const ENOSPC: i32 = 28;

/// Remote control of a [`CrashableRegion`].
#[derive(Debug, Default)]
pub struct CrashSwitch {
    flushes_left: AtomicUsize,
    flushes: AtomicUsize,
    failures: AtomicUsize,
}

impl CrashSwitch {
    fn new() -> Self {
        Self {
            flushes_left: AtomicUsize::new(usize::MAX),
            flushes: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
        }
    }

    /// Lets `flushes` more flushes succeed, then fails every following one.
    pub fn fail_after(&self, flushes: usize) {
        self.flushes_left.store(flushes, Ordering::SeqCst);
    }

    /// Lets every flush succeed again.
    pub fn disarm(&self) {
        self.flushes_left.store(usize::MAX, Ordering::SeqCst);
    }

    /// Returns `true` if flushes will fail at some point.
    pub fn is_armed(&self) -> bool {
        self.flushes_left.load(Ordering::SeqCst) != usize::MAX
    }

    /// Number of successful flushes.
    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    /// Number of failed flushes.
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    fn take_flush(&self) -> bool {
        let granted = self
            .flushes_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                usize::MAX => Some(usize::MAX),
                0 => None,
                n => Some(n - 1),
            })
            .is_ok();
        if granted {
            self.flushes.fetch_add(1, Ordering::SeqCst);
        } else {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }
        granted
    }
}

/// A mapped region whose flushes fail on command.
#[derive(Debug)]
pub struct CrashableRegion {
    inner: Box<dyn MappedRegion>,
    switch: Arc<CrashSwitch>,
}

impl CrashableRegion {
    /// Wraps `inner` and returns the switch controlling it.
    pub fn new(inner: Box<dyn MappedRegion>) -> (Self, Arc<CrashSwitch>) {
        let switch = Arc::new(CrashSwitch::new());
        (
            Self {
                inner,
                switch: Arc::clone(&switch),
            },
            switch,
        )
    }
}

impl MappedRegion for CrashableRegion {
    fn len(&self) -> usize {
        self.inner.len()
    }

    fn as_slice(&self) -> &[u8] {
        self.inner.as_slice()
    }

    fn as_mut_slice(&mut self) -> StorageResult<&mut [u8]> {
        self.inner.as_mut_slice()
    }

    fn flush_range(&self, offset: usize, len: usize) -> StorageResult<()> {
        if !self.switch.take_flush() {
            return Err(StorageError::Io(io::Error::from_raw_os_error(ENOSPC)));
        }
        self.inner.flush_range(offset, len)
    }

    fn protect(&mut self, protection: Protection) -> StorageResult<()> {
        self.inner.protect(protection)
    }

    fn protection(&self) -> Protection {
        self.inner.protection()
    }

    fn advise(&self, pattern: AccessPattern) -> StorageResult<()> {
        self.inner.advise(pattern)
    }

    fn path(&self) -> Option<&Path> {
        self.inner.path()
    }

    fn rename(&mut self, to: &Path) -> StorageResult<()> {
        self.inner.rename(to)
    }
}
