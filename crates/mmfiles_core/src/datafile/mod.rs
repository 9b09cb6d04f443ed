//! Memory-mapped, append-only datafiles.
//!
//! A datafile is one mapped region holding a sequence of markers:
//!
//! ```text
//! offset 0
//! ┌──────────────┬──────────┬──────────┬─────┬──────────┬─────────┬─────────────┐
//! │ header (32)  │ marker 1 │ marker 2 │ ... │ marker n │ footer  │ zero tail   │
//! └──────────────┴──────────┴──────────┴─────┴──────────┴─────────┴─────────────┘
//!                                                         ▲         ▲
//!                                        current_size ────┘         └── maximal_size
//!                                        (before seal)                  (before seal)
//! ```
//!
//! ## Lifecycle
//!
//! - [`Datafile::create`] maps a new file (or anonymous region) in `WRITE`
//! - [`Datafile::reserve_element`] and [`Datafile::write_element`] append
//! - [`Datafile::seal`] writes the footer and switches to `READ`
//! - [`Datafile::open`] maps an existing file and validates it with
//!   [`Datafile::check`]; unsealed files become writable again
//!
//! The append path is not locked internally. Callers serialize writers per
//! datafile (the WAL wraps each datafile in a lock).

mod check;
mod iter;
mod repair;
mod scan;
mod write;

pub use iter::{CursorStop, MarkerCursor};
pub use scan::{DatafileScan, DatafileScanEntry, Judgement, ScanEntryStatus, ScanStatus};

use crate::context::EngineContext;
use crate::diag::fatal_legacy_format;
use crate::error::{CoreError, CoreResult};
use crate::marker::{
    header_marker, is_legacy_marker, DatafileHeader, MarkerRef, MarkerType, DATAFILE_VERSION,
    FOOTER_MARKER_SIZE, HEADER_MARKER_SIZE, JOURNAL_OVERHEAD,
};
use crate::types::{Fid, Tick};
use mmfiles_storage::{AccessPattern, AnonymousRegion, FileRegion, MappedRegion, Protection};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

/// Bytes read from the file start when looking for a legacy header.
const LEGACY_PROBE_SIZE: usize = 128;

/// State of a datafile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatafileState {
    /// Unmapped.
    Closed,
    /// Mapped, markers may be read but not appended.
    Read,
    /// Mapped, markers may be appended.
    Write,
    /// Validation failed while opening.
    OpenError,
    /// A write or flush failed.
    WriteError,
    /// Renaming the file failed.
    RenameError,
}

impl DatafileState {
    /// Returns `true` for the error states.
    #[must_use]
    pub const fn is_error(self) -> bool {
        matches!(self, Self::OpenError | Self::WriteError | Self::RenameError)
    }
}

impl fmt::Display for DatafileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closed => "closed",
            Self::Read => "read",
            Self::Write => "write",
            Self::OpenError => "open error",
            Self::WriteError => "write error",
            Self::RenameError => "rename error",
        })
    }
}

/// Running tick bounds of the markers in a datafile.
///
/// Bounds only ever widen. Structural markers are ignored; `data_*` only
/// follow document and remove markers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickRange {
    /// Smallest tick seen, 0 if none.
    pub tick_min: Tick,
    /// Largest tick seen, 0 if none.
    pub tick_max: Tick,
    /// Smallest document or remove tick seen, 0 if none.
    pub data_min: Tick,
    /// Largest document or remove tick seen, 0 if none.
    pub data_max: Tick,
}

impl TickRange {
    /// Folds one marker into the bounds.
    pub fn observe(&mut self, raw_type: u8, tick: Tick) {
        let Some(marker_type) = MarkerType::from_u8(raw_type) else {
            return;
        };
        if tick == 0 || !marker_type.tracks_tick() {
            return;
        }
        if self.tick_min == 0 {
            self.tick_min = tick;
        }
        self.tick_max = self.tick_max.max(tick);
        if marker_type.is_data() {
            if self.data_min == 0 {
                self.data_min = tick;
            }
            self.data_max = self.data_max.max(tick);
        }
    }

    /// Widens the bounds with another range.
    pub fn merge(&mut self, other: &Self) {
        for (mine, theirs) in [
            (&mut self.tick_min, other.tick_min),
            (&mut self.data_min, other.data_min),
        ] {
            if *mine == 0 {
                *mine = theirs;
            }
        }
        self.tick_max = self.tick_max.max(other.tick_max);
        self.data_max = self.data_max.max(other.data_max);
    }
}

/// A memory-mapped datafile.
///
/// # Example
///
/// ```rust
/// use mmfiles_core::{Datafile, EngineContext, WalMarker, TransactionId};
///
/// let ctx = EngineContext::default();
/// let mut df = Datafile::create(&ctx, None, 1, 64 * 1024, true).unwrap();
///
/// let mut marker = WalMarker::document(TransactionId::new(1), vec![0xA0], 1)
///     .encode(ctx.ticks().next())
///     .unwrap();
/// let position = df.reserve_element(marker.len() as u32, 0).unwrap();
/// df.write_crc_element(position, &mut marker, false).unwrap();
/// df.seal().unwrap();
/// assert!(df.is_sealed());
/// ```
#[derive(Debug)]
pub struct Datafile {
    ctx: EngineContext,
    fid: Fid,
    path: Option<PathBuf>,
    region: Option<Box<dyn MappedRegion>>,
    state: DatafileState,
    init_size: u32,
    maximal_size: u32,
    current_size: u32,
    footer_size: u32,
    full: bool,
    sealed: bool,
    /// Bytes known to be flushed.
    synced: u32,
    /// Bytes written into the mapping.
    written: u32,
    ticks: TickRange,
    corrupt_position: Option<u32>,
}

impl Datafile {
    /// Creates a new datafile of at least `maximal_size` bytes.
    ///
    /// The size is rounded up to the page size. Without a path, an anonymous
    /// region is used. With `with_initial_markers`, a header marker carrying
    /// `{version, maximal_size, fid}` is written at offset 0.
    ///
    /// # Errors
    ///
    /// - [`CoreError::MaximalSizeTooSmall`] if the size cannot hold a header
    ///   and a footer
    /// - [`CoreError::DatafileAlreadyExists`] if the file exists
    /// - [`CoreError::Unsupported`] if anonymous regions are not available
    /// - I/O errors while creating or mapping the file
    pub fn create(
        ctx: &EngineContext,
        path: Option<&Path>,
        fid: Fid,
        maximal_size: u32,
        with_initial_markers: bool,
    ) -> CoreResult<Self> {
        let page_size = ctx.page_size() as u64;
        let rounded = u64::from(maximal_size).div_ceil(page_size) * page_size;
        if rounded < u64::from(JOURNAL_OVERHEAD) {
            error!(maximal_size, "cannot create datafile, maximal size is too small");
            return Err(CoreError::MaximalSizeTooSmall {
                requested: u64::from(maximal_size),
                minimum: u64::from(JOURNAL_OVERHEAD),
            });
        }
        let len = usize::try_from(rounded)
            .ok()
            .filter(|_| u32::try_from(rounded).is_ok())
            .ok_or_else(|| {
                CoreError::illegal_state(format!("datafile size {rounded} exceeds 4 GiB"))
            })?;

        let region: Box<dyn MappedRegion> = match path {
            None => Box::new(AnonymousRegion::new(len)?),
            Some(path) => match FileRegion::create(path, len) {
                Ok(region) => Box::new(region),
                Err(e) => {
                    error!(path = %path.display(), error = %e, "cannot create datafile");
                    return Err(e.into());
                }
            },
        };

        Self::with_region(ctx, region, fid, with_initial_markers)
    }

    /// Creates a collection journal with the configured journal size and a
    /// header marker.
    ///
    /// # Errors
    ///
    /// Same as [`Datafile::create`].
    pub fn create_journal(ctx: &EngineContext, path: &Path, fid: Fid) -> CoreResult<Self> {
        Self::create(ctx, Some(path), fid, ctx.config().journal_size, true)
    }

    /// Creates a datafile in `WRITE` state over an already mapped region.
    ///
    /// On failure to write the header, the region is released and a backing
    /// file is removed again.
    ///
    /// # Errors
    ///
    /// Returns an error if the region is too large or the header cannot be
    /// written.
    pub fn with_region(
        ctx: &EngineContext,
        region: Box<dyn MappedRegion>,
        fid: Fid,
        with_initial_markers: bool,
    ) -> CoreResult<Self> {
        let len = u32::try_from(region.len()).map_err(|_| {
            CoreError::illegal_state(format!("region of {} bytes exceeds 4 GiB", region.len()))
        })?;
        let path = region.path().map(Path::to_path_buf);

        let mut datafile = Self {
            ctx: ctx.clone(),
            fid,
            path,
            region: Some(region),
            state: DatafileState::Write,
            init_size: len,
            maximal_size: len,
            current_size: 0,
            footer_size: FOOTER_MARKER_SIZE,
            full: false,
            sealed: false,
            synced: 0,
            written: 0,
            ticks: TickRange::default(),
            corrupt_position: None,
        };

        if with_initial_markers {
            if let Err(e) = datafile.write_initial_header() {
                error!(datafile = %datafile.name(), error = %e, "cannot write datafile header");
                datafile.discard();
                return Err(e);
            }
        }
        Ok(datafile)
    }

    fn write_initial_header(&mut self) -> CoreResult<()> {
        let header = header_marker(self.maximal_size, self.fid);
        let position = self.reserve_element(HEADER_MARKER_SIZE, 0)?;
        self.write_element(position, &header, false)
    }

    /// Drops the mapping and removes a partially created file.
    fn discard(&mut self) {
        self.region = None;
        self.state = DatafileState::Closed;
        if let Some(path) = &self.path {
            if let Err(e) = fs::remove_file(path) {
                warn!(path = %path.display(), error = %e, "cannot remove partially created datafile");
            }
        }
    }

    /// Opens an existing datafile and validates it.
    ///
    /// The file is mapped read-only, checked marker by marker, and made
    /// writable again if no footer was found. With `ignore_failures`, a
    /// corrupt tail is cut off logically (see [`Datafile::fix`]).
    ///
    /// If the header turns out to be in the 2.8 format, the process exits.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CorruptedDatafile`] if the header or any marker
    /// is invalid and `ignore_failures` is false, or an I/O error.
    pub fn open(ctx: &EngineContext, path: &Path, ignore_failures: bool) -> CoreResult<Self> {
        let mut datafile = Self::open_helper(ctx, path, ignore_failures)?;

        if !datafile.check(ignore_failures) {
            error!(datafile = %path.display(), "datafile is corrupt");
            let position = datafile.corrupt_position.unwrap_or(0);
            return Err(CoreError::corrupted(
                path,
                u64::from(position),
                "marker validation failed",
            ));
        }

        if !datafile.sealed {
            datafile.state = DatafileState::Write;
            datafile.region_mut()?.protect(Protection::ReadWrite)?;
        }

        let region = datafile.region()?;
        for pattern in [AccessPattern::Sequential, AccessPattern::WillNeed] {
            if let Err(e) = region.advise(pattern) {
                debug!(error = %e, "access pattern hint rejected");
            }
        }
        Ok(datafile)
    }

    /// Maps an existing file read-only and verifies its header.
    pub(crate) fn open_helper(
        ctx: &EngineContext,
        path: &Path,
        ignore_failures: bool,
    ) -> CoreResult<Self> {
        let fid = fid_from_path(path).unwrap_or(0);

        let file_len = fs::metadata(path)
            .map_err(|e| {
                error!(path = %path.display(), error = %e, "cannot open datafile");
                CoreError::from_io(e)
            })?
            .len();
        if file_len < u64::from(JOURNAL_OVERHEAD) {
            error!(path = %path.display(), size = file_len, "datafile is corrupt, size is too small");
            return Err(CoreError::corrupted(
                path,
                0,
                format!("size is only {file_len}"),
            ));
        }
        let len = u32::try_from(file_len).map_err(|_| {
            CoreError::corrupted(path, 0, format!("size {file_len} exceeds 4 GiB"))
        })?;

        let region = FileRegion::open(path, Protection::ReadOnly)?;
        let data = region.as_slice();

        let header_view = MarkerRef::new(&data[..HEADER_MARKER_SIZE as usize])
            .ok_or_else(|| CoreError::corrupted(path, 0, "missing header"))?;
        let crc_ok = header_view.check_crc();
        if !crc_ok {
            if is_legacy_marker(&data[..data.len().min(LEGACY_PROBE_SIZE)]) {
                fatal_legacy_format(path);
            }
            error!(path = %path.display(), "corrupted datafile header");
            if !ignore_failures {
                return Err(CoreError::corrupted(path, 0, "corrupted datafile header"));
            }
        }

        if crc_ok {
            match DatafileHeader::parse(&header_view) {
                Some(header) if header.version == DATAFILE_VERSION => {
                    if file_len > u64::from(header.maximal_size) {
                        debug!(
                            path = %path.display(),
                            size = file_len,
                            maximal_size = header.maximal_size,
                            "datafile is larger than its recorded maximal size"
                        );
                    }
                }
                other => {
                    let version = other.map_or(0, |h| h.version);
                    error!(path = %path.display(), version, "unknown datafile version");
                    if !ignore_failures {
                        return Err(CoreError::corrupted(
                            path,
                            0,
                            format!("unknown datafile version {version}"),
                        ));
                    }
                }
            }
        }

        Ok(Self {
            ctx: ctx.clone(),
            fid,
            path: Some(path.to_path_buf()),
            region: Some(Box::new(region)),
            state: DatafileState::Read,
            init_size: len,
            maximal_size: len,
            current_size: 0,
            footer_size: FOOTER_MARKER_SIZE,
            full: false,
            sealed: false,
            synced: 0,
            written: 0,
            ticks: TickRange::default(),
            corrupt_position: None,
        })
    }

    /// Unmaps the datafile.
    ///
    /// Closing an already closed datafile only logs a warning.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IllegalState`] in an error state.
    pub fn close(&mut self) -> CoreResult<()> {
        match self.state {
            DatafileState::Read | DatafileState::Write => {
                self.region = None;
                self.state = DatafileState::Closed;
                Ok(())
            }
            DatafileState::Closed => {
                warn!(datafile = %self.name(), "closing an already closed datafile");
                Ok(())
            }
            state => Err(CoreError::illegal_state(format!(
                "cannot close datafile in state {state}"
            ))),
        }
    }

    /// Renames the backing file.
    ///
    /// # Errors
    ///
    /// - [`CoreError::DatafileAlreadyExists`] if the target exists
    /// - [`CoreError::Unsupported`] for anonymous datafiles
    /// - a system error if the rename fails; the datafile then switches to
    ///   `RENAME_ERROR`
    pub fn rename(&mut self, new_path: &Path) -> CoreResult<()> {
        if self.path.is_none() {
            return Err(CoreError::Unsupported {
                operation: "renaming an anonymous datafile".to_string(),
            });
        }
        if new_path.exists() {
            error!(target = %new_path.display(), "cannot overwrite datafile");
            return Err(CoreError::DatafileAlreadyExists {
                path: new_path.to_path_buf(),
            });
        }
        if let Err(e) = self.region_mut()?.rename(new_path) {
            self.state = DatafileState::RenameError;
            error!(datafile = %self.name(), target = %new_path.display(), error = %e, "cannot rename datafile");
            return Err(e.into());
        }
        self.path = Some(new_path.to_path_buf());
        Ok(())
    }

    pub(crate) fn region(&self) -> CoreResult<&dyn MappedRegion> {
        self.region
            .as_deref()
            .ok_or_else(|| CoreError::illegal_state("datafile is not mapped"))
    }

    pub(crate) fn region_mut(&mut self) -> CoreResult<&mut (dyn MappedRegion + 'static)> {
        self.region
            .as_deref_mut()
            .ok_or_else(|| CoreError::illegal_state("datafile is not mapped"))
    }

    /// All mapped bytes, empty when closed.
    pub(crate) fn bytes(&self) -> &[u8] {
        self.region.as_deref().map_or(&[], |r| r.as_slice())
    }

    pub(crate) fn observe_tick(&mut self, raw_type: u8, tick: Tick) {
        self.ticks.observe(raw_type, tick);
    }

    pub(crate) fn context(&self) -> &EngineContext {
        &self.ctx
    }

    /// Datafile id.
    #[must_use]
    pub fn fid(&self) -> Fid {
        self.fid
    }

    /// Backing file path, `None` for anonymous datafiles.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Name used in log messages.
    #[must_use]
    pub fn name(&self) -> String {
        self.path
            .as_ref()
            .map_or_else(|| format!("anonymous-{}", self.fid), |p| p.display().to_string())
    }

    /// Returns `true` if the datafile is backed by a file.
    #[must_use]
    pub fn is_physical(&self) -> bool {
        self.path.is_some()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> DatafileState {
        self.state
    }

    /// Returns `true` once a footer has been written or found.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Returns `true` once a reservation failed for lack of space.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.full
    }

    /// Length of the original mapping.
    #[must_use]
    pub fn init_size(&self) -> u32 {
        self.init_size
    }

    /// Logical capacity; shrinks to `current_size` on seal or fix.
    #[must_use]
    pub fn maximal_size(&self) -> u32 {
        self.maximal_size
    }

    /// Bytes of marker data written or found so far.
    #[must_use]
    pub fn current_size(&self) -> u32 {
        self.current_size
    }

    /// Space kept free for the footer; zero once sealing has started.
    #[must_use]
    pub fn footer_size(&self) -> u32 {
        self.footer_size
    }

    /// Tick bounds of the markers seen so far.
    #[must_use]
    pub fn tick_range(&self) -> TickRange {
        self.ticks
    }

    /// Smallest marker tick.
    #[must_use]
    pub fn tick_min(&self) -> Tick {
        self.ticks.tick_min
    }

    /// Largest marker tick.
    #[must_use]
    pub fn tick_max(&self) -> Tick {
        self.ticks.tick_max
    }

    /// Smallest document or remove tick.
    #[must_use]
    pub fn data_min(&self) -> Tick {
        self.ticks.data_min
    }

    /// Largest document or remove tick.
    #[must_use]
    pub fn data_max(&self) -> Tick {
        self.ticks.data_max
    }

    /// Offset of the marker that failed validation, if any.
    #[must_use]
    pub fn corrupt_position(&self) -> Option<u32> {
        self.corrupt_position
    }

    /// Bytes known to be flushed to durable storage.
    #[must_use]
    pub fn synced_size(&self) -> u32 {
        self.synced
    }

    /// The written marker data `[0, current_size)`.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        let bytes = self.bytes();
        &bytes[..(self.current_size as usize).min(bytes.len())]
    }
}

impl Drop for Datafile {
    fn drop(&mut self) {
        if matches!(self.state, DatafileState::Read | DatafileState::Write) {
            let _ = self.close();
        }
    }
}

/// Extracts the numeric id from a `<prefix>-<fid>.<ext>` file name.
#[must_use]
pub fn fid_from_path(path: &Path) -> Option<Fid> {
    let name = path.file_name()?.to_str()?;
    let start = name.rfind('-')? + 1;
    let end = name.rfind('.').filter(|end| *end >= start).unwrap_or(name.len());
    name[start..end].parse().ok()
}
