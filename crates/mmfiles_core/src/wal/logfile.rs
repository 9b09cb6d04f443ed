//! WAL logfile: a datafile plus its collection status.

use crate::context::EngineContext;
use crate::datafile::Datafile;
use crate::error::{CoreError, CoreResult};
use crate::marker::{aligned_size, header_marker, HEADER_MARKER_SIZE, JOURNAL_OVERHEAD};
use crate::types::Tick;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{debug, error};

/// Logfile identifier; also the tick the logfile was created with.
pub type LogfileId = u64;

/// Collection lifecycle of a logfile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogfileStatus {
    /// Created, nothing written yet.
    Empty,
    /// Accepting markers.
    Open,
    /// A seal was requested.
    SealRequested,
    /// Footer written.
    Sealed,
    /// The collector was asked to process the logfile.
    CollectionRequested,
    /// All markers were transferred to collection datafiles.
    Collected,
}

impl LogfileStatus {
    /// The only status a regular transition to `self` may start from.
    const fn predecessor(self) -> Option<Self> {
        match self {
            Self::Empty => None,
            Self::Open => Some(Self::Empty),
            Self::SealRequested => Some(Self::Open),
            Self::Sealed => Some(Self::SealRequested),
            Self::CollectionRequested => Some(Self::Sealed),
            Self::Collected => Some(Self::CollectionRequested),
        }
    }

    /// Status name used in logs and reports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Open => "open",
            Self::SealRequested => "seal-requested",
            Self::Sealed => "sealed",
            Self::CollectionRequested => "collection-requested",
            Self::Collected => "collected",
        }
    }
}

impl fmt::Display for LogfileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A WAL logfile shared between writers, the collector and cleanup.
///
/// The datafile is guarded by a read-write lock; `users` and the collect
/// queue size are atomics so removal checks can race with readers taking and
/// releasing references.
#[derive(Debug)]
pub struct WalLogfile {
    id: LogfileId,
    datafile: RwLock<Datafile>,
    status: Mutex<LogfileStatus>,
    users: AtomicI32,
    collect_queue_size: AtomicI64,
}

impl WalLogfile {
    fn new(id: LogfileId, datafile: Datafile, status: LogfileStatus) -> Arc<Self> {
        Arc::new(Self {
            id,
            datafile: RwLock::new(datafile),
            status: Mutex::new(status),
            users: AtomicI32::new(0),
            collect_queue_size: AtomicI64::new(0),
        })
    }

    /// Creates a new, empty logfile of `size` bytes.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`Datafile::create`].
    pub fn create_new(
        ctx: &EngineContext,
        path: &Path,
        id: LogfileId,
        size: u32,
    ) -> CoreResult<Arc<Self>> {
        let datafile = Datafile::create(ctx, Some(path), id, size, false)?;
        debug!(logfile = id, path = %path.display(), size, "created logfile");
        Ok(Self::new(id, datafile, LogfileStatus::Empty))
    }

    /// Opens an existing logfile.
    ///
    /// The status is derived from what is on disk: SEALED if a footer exists,
    /// COLLECTED if the caller knows the logfile was collected, OPEN
    /// otherwise.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`Datafile::open`].
    pub fn open_existing(
        ctx: &EngineContext,
        path: &Path,
        id: LogfileId,
        was_collected: bool,
        ignore_errors: bool,
    ) -> CoreResult<Arc<Self>> {
        let datafile = Datafile::open(ctx, path, ignore_errors)?;
        let status = if was_collected {
            LogfileStatus::Collected
        } else if datafile.is_sealed() {
            LogfileStatus::Sealed
        } else {
            LogfileStatus::Open
        };
        debug!(logfile = id, %status, "opened logfile");
        Ok(Self::new(id, datafile, status))
    }

    /// Writes the datafile header and moves the logfile to OPEN.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IllegalState`] unless the logfile is EMPTY, or
    /// the write error.
    pub fn write_header(&self) -> CoreResult<()> {
        {
            let mut datafile = self.datafile.write();
            if datafile.current_size() != 0 {
                return Err(CoreError::illegal_state(format!(
                    "logfile {} already has data",
                    self.id
                )));
            }
            let force_sync = datafile.context().config().force_sync;
            let header = header_marker(datafile.maximal_size(), self.id);
            let position = datafile.advance_write_position(HEADER_MARKER_SIZE);
            datafile.write_element(position, &header, force_sync)?;
        }
        self.set_status(LogfileStatus::Open)
    }

    /// Logfile id.
    #[must_use]
    pub fn id(&self) -> LogfileId {
        self.id
    }

    /// Path of the logfile.
    #[must_use]
    pub fn filename(&self) -> String {
        self.datafile.read().name()
    }

    /// Shared access to the datafile.
    pub fn datafile(&self) -> RwLockReadGuard<'_, Datafile> {
        self.datafile.read()
    }

    /// Exclusive access to the datafile.
    pub fn datafile_mut(&self) -> RwLockWriteGuard<'_, Datafile> {
        self.datafile.write()
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> LogfileStatus {
        *self.status.lock()
    }

    /// Current status as text.
    #[must_use]
    pub fn status_text(&self) -> &'static str {
        self.status().as_str()
    }

    /// Moves to `status`, which must directly follow the current one.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IllegalState`] for any other transition.
    pub fn set_status(&self, status: LogfileStatus) -> CoreResult<()> {
        let mut current = self.status.lock();
        if status.predecessor() != Some(*current) {
            error!(
                logfile = self.id,
                from = %*current,
                to = %status,
                "invalid logfile status transition"
            );
            return Err(CoreError::illegal_state(format!(
                "logfile {} cannot change status from {} to {}",
                self.id, *current, status
            )));
        }
        debug!(logfile = self.id, from = %*current, to = %status, "logfile status changed");
        *current = status;
        Ok(())
    }

    /// Sets the status without checking the transition. Used when
    /// reconstructing the status from what recovery found on disk.
    pub fn force_status(&self, status: LogfileStatus) {
        *self.status.lock() = status;
    }

    /// Returns `true` once a seal was requested.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.status() >= LogfileStatus::SealRequested
    }

    /// Bytes still available for markers.
    #[must_use]
    pub fn free_size(&self) -> u64 {
        if self.is_sealed() {
            return 0;
        }
        free_bytes(&self.datafile.read())
    }

    /// Bytes in use.
    #[must_use]
    pub fn allocated_size(&self) -> u32 {
        self.datafile.read().current_size()
    }

    /// Returns `true` if a marker of `size` bytes still fits.
    #[must_use]
    pub fn is_writeable(&self, size: u32) -> bool {
        !self.is_sealed() && self.free_size() >= aligned_size(u64::from(size))
    }

    /// Returns `true` if every tick in the logfile is released and the
    /// logfile is sealed but not yet collected.
    #[must_use]
    pub fn can_be_collected(&self, released_tick: Tick) -> bool {
        if released_tick < self.datafile.read().tick_max() {
            return false;
        }
        matches!(
            self.status(),
            LogfileStatus::Sealed | LogfileStatus::CollectionRequested
        )
    }

    /// Returns `true` if the logfile was collected and nobody uses it.
    #[must_use]
    pub fn can_be_removed(&self) -> bool {
        self.status() == LogfileStatus::Collected
            && self.collect_queue_size.load(Ordering::Acquire) == 0
            && self.users.load(Ordering::Acquire) == 0
    }

    /// Reserves `size` aligned bytes and assigns them a fresh tick.
    ///
    /// The room check, the cursor move and the tick happen under one
    /// datafile lock, so ticks grow with offsets. Returns `None` if the
    /// logfile is sealed or the marker no longer fits.
    pub fn reserve(&self, size: u32) -> Option<(u32, Tick)> {
        let aligned = aligned_size(u64::from(size));
        let mut datafile = self.datafile.write();
        if self.is_sealed() || free_bytes(&datafile) < aligned {
            return None;
        }
        let offset = datafile.advance_write_position(size);
        let tick = datafile.context().ticks().next();
        Some((offset, tick))
    }

    /// Writes the footer and moves the logfile from OPEN to SEALED.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IllegalState`] unless the logfile is OPEN, or
    /// the error of [`Datafile::seal`].
    pub fn seal(&self) -> CoreResult<()> {
        self.set_status(LogfileStatus::SealRequested)?;
        self.datafile.write().seal()?;
        self.set_status(LogfileStatus::Sealed)
    }

    /// Registers a reader.
    pub fn use_logfile(&self) {
        self.users.fetch_add(1, Ordering::AcqRel);
    }

    /// Unregisters a reader.
    pub fn release(&self) {
        let previous = self.users.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "logfile released more often than used");
    }

    /// Number of registered readers.
    #[must_use]
    pub fn users(&self) -> i32 {
        self.users.load(Ordering::Acquire)
    }

    /// Counts an operation queued by the collector.
    pub fn increase_collect_queue_size(&self) {
        self.collect_queue_size.fetch_add(1, Ordering::AcqRel);
    }

    /// Counts a finished collector operation.
    pub fn decrease_collect_queue_size(&self) {
        self.collect_queue_size.fetch_sub(1, Ordering::AcqRel);
    }

    /// Number of queued collector operations.
    #[must_use]
    pub fn collect_queue_size(&self) -> i64 {
        self.collect_queue_size.load(Ordering::Acquire)
    }
}

fn free_bytes(datafile: &Datafile) -> u64 {
    u64::from(datafile.maximal_size())
        .saturating_sub(u64::from(datafile.current_size()))
        .saturating_sub(u64::from(JOURNAL_OVERHEAD))
}
