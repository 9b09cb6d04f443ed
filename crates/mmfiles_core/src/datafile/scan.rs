//! Read-only inspection: marker reports and quick file classification.

use super::Datafile;
use crate::context::EngineContext;
use crate::error::{CoreError, CoreResult};
use crate::marker::{document_key, MarkerRef, MarkerType, MARKER_HEADER_SIZE};
use crate::types::Tick;
use serde::Serialize;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// Bytes inspected by [`Datafile::judge`].
const JUDGE_PROBE_SIZE: usize = 256 * 8;

/// Overall result of a scan, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    /// All markers are intact.
    Clean,
    /// The scan ended at an empty or zero-sized marker.
    StoppedAtEmpty,
    /// A marker failed the type or size check.
    InvalidMarker,
    /// A marker failed its checksum or ran out of bounds.
    CrcFailure,
    /// The file could not be opened.
    OpenFailed,
}

impl ScanStatus {
    /// Numeric code used in reports.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Clean => 1,
            Self::StoppedAtEmpty => 2,
            Self::InvalidMarker => 3,
            Self::CrcFailure => 4,
            Self::OpenFailed => 5,
        }
    }
}

/// Result for one scanned marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanEntryStatus {
    /// Intact.
    Ok,
    /// All header bytes are zero.
    Empty,
    /// Size is zero but other header bytes are set.
    ZeroSize,
    /// Too small, or unknown type, or too large.
    Invalid,
    /// Checksum mismatch or out of bounds.
    CrcFailed,
}

impl ScanEntryStatus {
    /// Numeric code used in reports.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Ok => 1,
            Self::Empty => 2,
            Self::ZeroSize => 3,
            Self::Invalid => 4,
            Self::CrcFailed => 5,
        }
    }
}

/// One marker in a [`DatafileScan`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatafileScanEntry {
    /// Offset of the marker.
    pub position: u32,
    /// Stored size.
    pub size: u32,
    /// Size including alignment padding.
    pub real_size: u64,
    /// Marker tick.
    pub tick: Tick,
    /// Raw type value.
    pub type_id: u8,
    /// Type name.
    pub type_name: &'static str,
    /// Result of the checks.
    pub status: ScanEntryStatus,
    /// Explanation for a failed check.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<String>,
    /// Primary key of document and remove markers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

/// Marker-by-marker report of a datafile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatafileScan {
    /// Current size when the scan started.
    pub current_size: u32,
    /// Maximal size of the datafile.
    pub maximal_size: u32,
    /// Offset where the scan stopped.
    pub end_position: u32,
    /// Number of markers visited.
    pub number_markers: usize,
    /// Worst finding.
    pub status: ScanStatus,
    /// Whether a footer was found.
    pub is_sealed: bool,
    /// Visited markers in file order.
    pub entries: Vec<DatafileScanEntry>,
}

impl DatafileScan {
    fn empty(status: ScanStatus) -> Self {
        Self {
            current_size: 0,
            maximal_size: 0,
            end_position: 0,
            number_markers: 0,
            status,
            is_sealed: false,
            entries: Vec::new(),
        }
    }
}

/// Quick classification of a file by [`Datafile::judge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Judgement {
    /// The file has data.
    Ok,
    /// The file is empty or starts with zeros only.
    Empty,
    /// The file is too short or cannot be read.
    Unreadable,
}

impl Judgement {
    /// Converts the verdict into the matching error.
    ///
    /// # Errors
    ///
    /// [`CoreError::DatafileEmpty`] or [`CoreError::DatafileUnreadable`].
    pub fn into_result(self, path: &Path) -> CoreResult<()> {
        match self {
            Self::Ok => Ok(()),
            Self::Empty => Err(CoreError::DatafileEmpty {
                path: path.to_path_buf(),
            }),
            Self::Unreadable => Err(CoreError::DatafileUnreadable {
                path: path.to_path_buf(),
                message: format!("file is shorter than {JUDGE_PROBE_SIZE} bytes or cannot be read"),
            }),
        }
    }
}

impl Datafile {
    /// Scans a datafile without validating or changing it.
    ///
    /// A file that cannot even be mapped yields a report with status
    /// [`ScanStatus::OpenFailed`].
    #[must_use]
    pub fn scan(ctx: &EngineContext, path: &Path) -> DatafileScan {
        match Self::open_helper(ctx, path, true) {
            Ok(datafile) => datafile.scan_helper(),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "cannot open datafile for scanning");
                DatafileScan::empty(ScanStatus::OpenFailed)
            }
        }
    }

    /// Walks the markers and reports each one, stopping at the first anomaly
    /// or at the footer.
    #[must_use]
    pub fn scan_helper(&self) -> DatafileScan {
        let data = self.bytes();
        let end = match self.current_size {
            0 => self.maximal_size,
            size => size,
        } as usize;
        let end = end.min(data.len());
        let max_marker_size = self.ctx.config().max_marker_size;

        let mut scan = DatafileScan {
            current_size: self.current_size,
            maximal_size: self.maximal_size,
            ..DatafileScan::empty(ScanStatus::Clean)
        };

        let mut offset = 0usize;
        while offset < end {
            let Some(marker) = MarkerRef::new(&data[offset..end]) else {
                scan.status = scan.status.max(ScanStatus::CrcFailure);
                break;
            };
            let mut entry = DatafileScanEntry {
                position: offset as u32,
                size: marker.size(),
                real_size: marker.aligned_size(),
                tick: marker.tick(),
                type_id: marker.raw_type(),
                type_name: marker.type_name(),
                status: ScanEntryStatus::Ok,
                diagnosis: None,
                key: None,
            };
            let size = marker.size() as usize;

            let verdict = if marker.is_zeroed() {
                Some((ScanEntryStatus::Empty, ScanStatus::StoppedAtEmpty, None))
            } else if size == 0 {
                Some((ScanEntryStatus::ZeroSize, ScanStatus::StoppedAtEmpty, None))
            } else if size < MARKER_HEADER_SIZE || !marker.is_valid(max_marker_size) {
                Some((
                    ScanEntryStatus::Invalid,
                    ScanStatus::InvalidMarker,
                    Some("marker is too small or has an invalid type".to_string()),
                ))
            } else if offset + size > end {
                Some((
                    ScanEntryStatus::CrcFailed,
                    ScanStatus::CrcFailure,
                    Some(format!("marker reaches beyond the end of data at {end}")),
                ))
            } else if !marker.check_crc() {
                Some((
                    ScanEntryStatus::CrcFailed,
                    ScanStatus::CrcFailure,
                    Some(format!(
                        "crc mismatch, expected {:#010x}, found {:#010x}",
                        marker.calculate_crc().unwrap_or(0),
                        marker.crc()
                    )),
                ))
            } else {
                None
            };

            if let Some((entry_status, status, diagnosis)) = verdict {
                entry.status = entry_status;
                entry.diagnosis = diagnosis;
                scan.entries.push(entry);
                scan.status = scan.status.max(status);
                break;
            }

            if matches!(
                marker.marker_type(),
                Some(MarkerType::Document | MarkerType::Remove)
            ) {
                entry.key = marker.document().and_then(document_key);
            }
            scan.entries.push(entry);
            offset += usize::try_from(marker.aligned_size()).unwrap_or(usize::MAX - offset);

            if marker.marker_type() == Some(MarkerType::Footer) {
                scan.is_sealed = true;
                break;
            }
        }

        scan.end_position = offset.min(end) as u32;
        scan.number_markers = scan.entries.len();
        scan
    }

    /// Classifies a file without mapping it.
    ///
    /// Empty files and files starting with [`JUDGE_PROBE_SIZE`] zero bytes
    /// are [`Judgement::Empty`]; shorter or unreadable files are
    /// [`Judgement::Unreadable`].
    #[must_use]
    pub fn judge(path: &Path) -> Judgement {
        let Ok(mut file) = File::open(path) else {
            return Judgement::Unreadable;
        };
        let len = file.metadata().map_or(0, |m| m.len());
        if len == 0 {
            return Judgement::Empty;
        }
        if len < JUDGE_PROBE_SIZE as u64 {
            return Judgement::Unreadable;
        }
        let mut probe = vec![0u8; JUDGE_PROBE_SIZE];
        if file.read_exact(&mut probe).is_err() {
            return Judgement::Unreadable;
        }
        if probe.iter().all(|b| *b == 0) {
            Judgement::Empty
        } else {
            Judgement::Ok
        }
    }
}
