//! Destructive offline repair: blanking single markers and physically
//! truncating a corrupt tail.

use super::check::{marker_ok_at, tail_is_zero, walk_markers};
use super::{Datafile, DatafileState};
use crate::context::EngineContext;
use crate::error::{CoreError, CoreResult};
use crate::marker::{blank_marker, MarkerRef, MarkerType, FOOTER_MARKER_SIZE, HEADER_MARKER_SIZE, MARKER_HEADER_SIZE};
use mmfiles_storage::{FileRegion, MappedRegion, Protection};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Next step of the repair walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RepairAction {
    /// Marker is fine, continue at the offset.
    Skip(usize),
    /// Replace the marker with a blank one of the same size and tick.
    Blank { offset: usize, size: u32, tick: u64, next: usize },
    /// Cut the file at the offset.
    Truncate(usize),
    /// Nothing left to repair.
    Done,
    /// The structure is too broken to continue.
    GiveUp(usize),
}

fn plan(data: &[u8], offset: usize, end: usize, max_marker_size: u32) -> RepairAction {
    if offset >= end {
        return RepairAction::Done;
    }
    let Some(marker) = MarkerRef::new(&data[offset..end]) else {
        return RepairAction::GiveUp(offset);
    };
    let size = marker.size();
    if size == 0 {
        return RepairAction::Done;
    }
    if (size as usize) < MARKER_HEADER_SIZE || offset + size as usize > end {
        return RepairAction::GiveUp(offset);
    }
    let next = (offset as u64 + marker.aligned_size()).min(end as u64) as usize;
    if !marker.is_valid(max_marker_size) {
        return if marker.is_filler() {
            RepairAction::Skip(next)
        } else {
            RepairAction::GiveUp(offset)
        };
    }
    if marker.check_crc() {
        return if marker.marker_type() == Some(MarkerType::Footer) {
            RepairAction::Done
        } else {
            RepairAction::Skip(next)
        };
    }
    if tail_is_zero(data, next, end) || !marker_ok_at(data, next, end, max_marker_size) {
        RepairAction::Truncate(offset)
    } else {
        RepairAction::Blank {
            offset,
            size,
            tick: marker.tick(),
            next,
        }
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

fn discard_new_file(region: FileRegion, path: &Path) {
    drop(region);
    if let Err(e) = fs::remove_file(path) {
        warn!(path = %path.display(), error = %e, "cannot remove unfinished datafile");
    }
}

impl Datafile {
    /// Repairs a datafile in place.
    ///
    /// Markers with a bad checksum are overwritten with a blank marker when
    /// the following marker is intact. Otherwise, or when only zeros follow,
    /// the file is truncated in front of the bad marker and sealed.
    ///
    /// Returns `false` if the file structure is too broken to repair.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened, written or truncated.
    pub fn try_repair(ctx: &EngineContext, path: &Path) -> CoreResult<bool> {
        let mut datafile = Self::open_helper(ctx, path, true)?;
        datafile.region_mut()?.protect(Protection::ReadWrite)?;
        datafile.state = DatafileState::Write;

        let end = datafile.maximal_size as usize;
        let max_marker_size = ctx.config().max_marker_size;
        let mut offset = 0usize;

        loop {
            match plan(datafile.bytes(), offset, end, max_marker_size) {
                RepairAction::Skip(next) => offset = next,
                RepairAction::Blank {
                    offset: at,
                    size,
                    tick,
                    next,
                } => {
                    let blank = blank_marker(size, tick);
                    let len = size as usize;
                    datafile.region_mut()?.as_mut_slice()?[at..at + len]
                        .copy_from_slice(&blank[..len]);
                    datafile.region()?.flush_range(at, len)?;
                    info!(
                        datafile = %datafile.name(),
                        position = at,
                        size,
                        "replaced marker with a blank marker"
                    );
                    offset = next;
                }
                RepairAction::Truncate(at) => {
                    info!(datafile = %datafile.name(), position = at, "truncating datafile");
                    datafile.truncate_and_seal(at as u32)?;
                    return Ok(true);
                }
                RepairAction::Done => {
                    info!(datafile = %datafile.name(), "datafile needs no further repair");
                    return Ok(true);
                }
                RepairAction::GiveUp(at) => {
                    warn!(
                        datafile = %datafile.name(),
                        position = at,
                        "cannot repair datafile, marker structure is broken"
                    );
                    return Ok(false);
                }
            }
        }
    }

    /// Physically truncates the file at `position` and seals it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IllegalState`] for a position outside the file
    /// or inside the header, and any error of [`Datafile::truncate_and_seal`].
    pub fn truncate(ctx: &EngineContext, path: &Path, position: u32) -> CoreResult<()> {
        let mut datafile = Self::open_helper(ctx, path, true)?;
        if position < HEADER_MARKER_SIZE || position > datafile.maximal_size {
            return Err(CoreError::illegal_state(format!(
                "cannot truncate {} at {position}, valid positions are {HEADER_MARKER_SIZE}..={}",
                path.display(),
                datafile.maximal_size
            )));
        }
        datafile.truncate_and_seal(position)
    }

    /// Copies `[0, position)` into a new, page-rounded file that replaces the
    /// current one, then seals it.
    ///
    /// The old file is kept next to it with a `.corrupted` suffix.
    ///
    /// # Errors
    ///
    /// Returns an error for anonymous datafiles, or if the new file cannot be
    /// created, renamed or sealed.
    pub fn truncate_and_seal(&mut self, position: u32) -> CoreResult<()> {
        let path = self.path.clone().ok_or_else(|| CoreError::Unsupported {
            operation: "truncating an anonymous datafile".to_string(),
        })?;
        let pos = position as usize;
        let data = self.bytes();
        if pos > data.len() {
            return Err(CoreError::illegal_state(format!(
                "truncate position {position} beyond mapped size {}",
                data.len()
            )));
        }

        let page_size = self.ctx.page_size() as u64;
        let new_size = (u64::from(position) + u64::from(FOOTER_MARKER_SIZE)).div_ceil(page_size) * page_size;
        let new_size = u32::try_from(new_size)
            .map_err(|_| CoreError::illegal_state("truncated size exceeds 4 GiB"))?;

        let walk = walk_markers(data, pos, self.ctx.config().max_marker_size, true);

        let temp = with_suffix(&path, ".new");
        if temp.exists() {
            warn!(path = %temp.display(), "removing leftover file");
            fs::remove_file(&temp)?;
        }
        let mut region = FileRegion::create(&temp, new_size as usize)?;
        region.as_mut_slice()?[..pos].copy_from_slice(&data[..pos]);
        region.flush_range(0, pos)?;

        // the old mapping stays in place until both renames went through
        let corrupted = with_suffix(&path, ".corrupted");
        if let Err(e) = fs::rename(&path, &corrupted) {
            self.state = DatafileState::RenameError;
            error!(
                datafile = %path.display(),
                target = %corrupted.display(),
                error = %e,
                "cannot move corrupted datafile aside"
            );
            discard_new_file(region, &temp);
            return Err(e.into());
        }
        if let Err(e) = region.rename(&path) {
            self.state = DatafileState::RenameError;
            error!(
                datafile = %temp.display(),
                target = %path.display(),
                error = %e,
                "cannot move truncated datafile into place"
            );
            if let Err(e) = fs::rename(&corrupted, &path) {
                error!(datafile = %corrupted.display(), error = %e, "cannot restore corrupted datafile");
            }
            discard_new_file(region, &temp);
            return Err(e.into());
        }
        self.region = Some(Box::new(region));
        info!(
            datafile = %path.display(),
            backup = %corrupted.display(),
            size = new_size,
            "truncated datafile at position {position}"
        );

        self.ticks.merge(&walk.ticks);
        self.init_size = new_size;
        self.maximal_size = new_size;
        self.current_size = position;
        self.written = position;
        self.synced = position;
        self.footer_size = FOOTER_MARKER_SIZE;
        self.full = false;
        self.sealed = false;
        self.state = DatafileState::Write;
        self.seal()
    }
}
