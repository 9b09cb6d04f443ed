//! Marker-by-marker validation of a mapped datafile.

use super::{Datafile, DatafileState, TickRange};
use crate::diag::hex_dump;
use crate::marker::{MarkerRef, MarkerType, MARKER_HEADER_SIZE};
use crate::types::Tick;
use std::fmt;
use tracing::{error, warn};

/// Bytes of a broken marker shown in the hex dump.
const DUMP_SIZE: usize = 64;

/// What is wrong with the marker at a corrupt position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Corruption {
    /// The stored size is smaller than a marker header.
    TooSmall { size: u32 },
    /// The marker runs past the end of the checked range.
    PastEnd { size: u32, end: u32 },
    /// Unknown type or size above the marker ceiling.
    Invalid { raw_type: u8, size: u32 },
    /// Checksum mismatch.
    Crc {
        expected: u32,
        actual: u32,
        /// Only zero bytes follow the marker.
        zero_tail: bool,
        /// The following marker is intact.
        next_ok: bool,
    },
}

impl fmt::Display for Corruption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooSmall { size } => write!(f, "marker size {size} is too small"),
            Self::PastEnd { size, end } => {
                write!(f, "marker size {size} runs past the end of data at {end}")
            }
            Self::Invalid { raw_type, size } => {
                write!(f, "invalid marker with type {raw_type} and size {size}")
            }
            Self::Crc {
                expected, actual, ..
            } => write!(f, "crc mismatch, expected {expected:#010x}, found {actual:#010x}"),
        }
    }
}

/// Result of walking the markers of a datafile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WalkOutcome {
    /// Data ends at `end`, either at a size-0 marker or at the range end.
    Clean { end: u32 },
    /// A footer was found; `end` includes it.
    Sealed { end: u32 },
    /// The marker at `position` is broken. `fix` is set when the caller asked
    /// to ignore failures or the corruption is a torn final write.
    Corrupt {
        position: u32,
        corruption: Corruption,
        fix: bool,
    },
}

/// Outcome plus everything learned from the intact markers.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Walk {
    pub(crate) outcome: WalkOutcome,
    pub(crate) ticks: TickRange,
    pub(crate) max_tick: Tick,
    /// Offset of the last intact marker.
    pub(crate) last_good: Option<u32>,
}

/// Returns `true` if `data[from..end]` holds only zero bytes.
///
/// An empty range counts as zero.
pub(crate) fn tail_is_zero(data: &[u8], from: usize, end: usize) -> bool {
    let end = end.min(data.len());
    from >= end || data[from..end].iter().all(|b| *b == 0)
}

/// Returns `true` if a structurally sound marker with a valid checksum starts
/// at `offset` and ends before `end`.
pub(crate) fn marker_ok_at(data: &[u8], offset: usize, end: usize, max_marker_size: u32) -> bool {
    let end = end.min(data.len());
    if offset >= end {
        return false;
    }
    let Some(marker) = MarkerRef::new(&data[offset..end]) else {
        return false;
    };
    let size = marker.size() as usize;
    size >= MARKER_HEADER_SIZE
        && offset + size <= end
        && marker.is_valid(max_marker_size)
        && marker.check_crc()
}

/// Walks the markers in `data[..end]` without modifying anything.
pub(crate) fn walk_markers(data: &[u8], end: usize, max_marker_size: u32, ignore_failures: bool) -> Walk {
    let end = end.min(data.len());
    let mut walk = Walk {
        outcome: WalkOutcome::Clean { end: 0 },
        ticks: TickRange::default(),
        max_tick: 0,
        last_good: None,
    };
    let corrupt = |position: usize, corruption: Corruption, fix: bool| WalkOutcome::Corrupt {
        position: position as u32,
        corruption,
        fix,
    };

    let mut offset = 0usize;
    while offset < end {
        let marker = match MarkerRef::new(&data[offset..]) {
            Some(marker) => marker,
            None => {
                walk.outcome = corrupt(
                    offset,
                    Corruption::PastEnd {
                        size: MARKER_HEADER_SIZE as u32,
                        end: end as u32,
                    },
                    ignore_failures,
                );
                return walk;
            }
        };
        let size = marker.size();

        if size == 0 {
            walk.outcome = WalkOutcome::Clean { end: offset as u32 };
            return walk;
        }
        if (size as usize) < MARKER_HEADER_SIZE {
            walk.outcome = corrupt(offset, Corruption::TooSmall { size }, ignore_failures);
            return walk;
        }
        if offset + size as usize > end {
            walk.outcome = corrupt(
                offset,
                Corruption::PastEnd {
                    size,
                    end: end as u32,
                },
                ignore_failures,
            );
            return walk;
        }

        let next = (offset as u64 + marker.aligned_size()).min(end as u64) as usize;

        if !marker.is_valid(max_marker_size) {
            if marker.is_filler() {
                offset = next;
                continue;
            }
            walk.outcome = corrupt(
                offset,
                Corruption::Invalid {
                    raw_type: marker.raw_type(),
                    size,
                },
                ignore_failures,
            );
            return walk;
        }

        if marker.raw_type() != 0 && !marker.check_crc() {
            let zero_tail = tail_is_zero(data, next, end);
            let next_ok = !zero_tail && marker_ok_at(data, next, end, max_marker_size);
            walk.outcome = corrupt(
                offset,
                Corruption::Crc {
                    expected: marker.calculate_crc().unwrap_or(0),
                    actual: marker.crc(),
                    zero_tail,
                    next_ok,
                },
                ignore_failures || zero_tail,
            );
            return walk;
        }

        walk.ticks.observe(marker.raw_type(), marker.tick());
        walk.max_tick = walk.max_tick.max(marker.tick());
        walk.last_good = Some(offset as u32);
        offset = next;

        if marker.marker_type() == Some(MarkerType::Footer) {
            walk.outcome = WalkOutcome::Sealed { end: offset as u32 };
            return walk;
        }
    }

    walk.outcome = WalkOutcome::Clean {
        end: offset.min(end) as u32,
    };
    walk
}

impl Datafile {
    /// Validates every marker from the start of the file.
    ///
    /// The checked range is `[0, current_size)`, or the whole mapping for a
    /// datafile whose extent is not known yet. On success, `current_size`
    /// points behind the last marker and a found footer seals the datafile.
    ///
    /// A checksum failure followed only by zero bytes is taken as a torn
    /// final write and cut off even without `ignore_failures`. Any other
    /// corruption is cut off with [`Datafile::fix`] only if `ignore_failures`
    /// is set; otherwise the datafile switches to `OPEN_ERROR` and `false` is
    /// returned.
    pub fn check(&mut self, ignore_failures: bool) -> bool {
        let end = match self.current_size {
            0 => self.maximal_size,
            size => size,
        };
        let walk = walk_markers(
            self.bytes(),
            end as usize,
            self.ctx.config().max_marker_size,
            ignore_failures,
        );

        self.ticks.merge(&walk.ticks);
        self.ctx.ticks().observe(walk.max_tick);

        match walk.outcome {
            WalkOutcome::Clean { end } => {
                self.mark_on_disk(end);
                true
            }
            WalkOutcome::Sealed { end } => {
                self.mark_on_disk(end);
                self.sealed = true;
                true
            }
            WalkOutcome::Corrupt {
                position,
                corruption,
                fix,
            } => {
                self.report_corruption(position, corruption, walk.last_good, fix);
                if fix {
                    self.fix(position)
                } else {
                    self.state = DatafileState::OpenError;
                    self.corrupt_position = Some(position);
                    false
                }
            }
        }
    }

    /// Cuts the logical data off at `current_size`.
    ///
    /// Everything behind the position is treated as never written. The
    /// datafile becomes sealed and read-only; the file itself is unchanged.
    pub fn fix(&mut self, current_size: u32) -> bool {
        warn!(
            datafile = %self.name(),
            position = current_size,
            "datafile is corrupted, setting size to {current_size}, the following data will be lost"
        );
        self.mark_on_disk(current_size);
        self.maximal_size = current_size;
        self.full = true;
        self.sealed = true;
        self.state = DatafileState::Read;
        true
    }

    fn mark_on_disk(&mut self, size: u32) {
        self.current_size = size;
        self.written = size;
        self.synced = size;
    }

    fn report_corruption(&self, position: u32, corruption: Corruption, last_good: Option<u32>, fix: bool) {
        let data = self.bytes();
        let marker = MarkerRef::new(&data[(position as usize).min(data.len())..]);
        let type_name = marker.map_or("unknown", |m| m.type_name());
        let dump = marker.map(|m| hex_dump(m.raw_prefix(DUMP_SIZE), position as usize));
        let flag = if self.is_logfile() {
            "--wal.ignore-logfile-errors"
        } else {
            "--database.ignore-datafile-errors"
        };

        match corruption {
            Corruption::Crc {
                zero_tail: true, ..
            } => {
                warn!(
                    datafile = %self.name(),
                    position,
                    marker = type_name,
                    "{corruption}, only zero bytes follow, assuming a torn final write"
                );
            }
            Corruption::Crc { next_ok: true, .. } => {
                error!(
                    datafile = %self.name(),
                    position,
                    last_good = ?last_good,
                    marker = type_name,
                    "{corruption}. The following marker is intact, so only this single marker \
                     seems affected. It can be skipped by overwriting it with a blank marker, \
                     see the repair tool"
                );
            }
            Corruption::Crc { .. } => {
                error!(
                    datafile = %self.name(),
                    position,
                    last_good = ?last_good,
                    marker = type_name,
                    "{corruption}. The following data cannot be analyzed"
                );
            }
            _ => {
                error!(
                    datafile = %self.name(),
                    position,
                    last_good = ?last_good,
                    marker = type_name,
                    "{corruption}"
                );
            }
        }
        if let Some(dump) = dump {
            error!(datafile = %self.name(), "raw marker data:\n{dump}");
        }
        if !fix {
            error!(
                datafile = %self.name(),
                "to skip the corrupted data and truncate the file at position {position}, \
                 restart with the option {flag} true"
            );
        }
    }

    fn is_logfile(&self) -> bool {
        self.path
            .as_deref()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("logfile-"))
    }
}
