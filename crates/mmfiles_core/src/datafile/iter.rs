//! Forward iteration over the markers of a datafile.

use super::{Datafile, DatafileState, TickRange};
use crate::marker::{MarkerRef, MARKER_HEADER_SIZE};
use std::ops::ControlFlow;
use tracing::{debug, warn};

/// Why a [`MarkerCursor`] stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorStop {
    /// Every byte of the range was consumed.
    End,
    /// A marker with size 0 ends the written data.
    Sentinel {
        /// Offset of the zero-sized marker.
        offset: u32,
    },
    /// The marker at `offset` is too small or runs past the range.
    Broken {
        /// Offset of the unreadable marker.
        offset: u32,
    },
}

/// Bounds-checked cursor over a run of markers.
///
/// Yields `(offset, marker)` pairs. Every yielded marker has a size of at
/// least the header and lies completely inside the range. The cursor does
/// not verify checksums or types.
#[derive(Debug, Clone)]
pub struct MarkerCursor<'a> {
    data: &'a [u8],
    offset: usize,
    stop: Option<CursorStop>,
}

impl<'a> MarkerCursor<'a> {
    /// Creates a cursor over `data`, starting at offset 0.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self::starting_at(data, 0)
    }

    /// Creates a cursor over `data`, starting at `offset`.
    #[must_use]
    pub fn starting_at(data: &'a [u8], offset: usize) -> Self {
        Self {
            data,
            offset,
            stop: None,
        }
    }

    /// Returns why the cursor stopped, or `None` while it is still running.
    #[must_use]
    pub fn stop(&self) -> Option<CursorStop> {
        self.stop
    }

    /// Offset of the next marker.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    fn halt(&mut self, stop: CursorStop) -> Option<(u32, MarkerRef<'a>)> {
        self.stop = Some(stop);
        None
    }
}

impl<'a> Iterator for MarkerCursor<'a> {
    type Item = (u32, MarkerRef<'a>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.stop.is_some() {
            return None;
        }
        let offset = self.offset;
        let position = offset as u32;
        if offset >= self.data.len() {
            return self.halt(CursorStop::End);
        }
        let Some(marker) = MarkerRef::new(&self.data[offset..]) else {
            return self.halt(CursorStop::Broken { offset: position });
        };

        let size = marker.size() as usize;
        if size == 0 {
            return self.halt(CursorStop::Sentinel { offset: position });
        }
        if size < MARKER_HEADER_SIZE || size > marker.available() {
            return self.halt(CursorStop::Broken { offset: position });
        }

        let step = usize::try_from(marker.aligned_size()).unwrap_or(usize::MAX);
        self.offset = offset.saturating_add(step).min(self.data.len());
        Some((position, marker))
    }
}

impl Datafile {
    /// Cursor over the written markers `[0, current_size)`.
    #[must_use]
    pub fn markers(&self) -> MarkerCursor<'_> {
        MarkerCursor::new(self.data())
    }

    /// Walks the written markers in order, handing each to `callback`.
    ///
    /// The walk ends at the size-0 sentinel or at `current_size`. Tick bounds
    /// and the engine clock are raised to cover every visited marker.
    ///
    /// Returns `false` if the datafile is not readable, a marker is
    /// structurally broken, or the callback stopped the walk.
    pub fn iterate<F>(&mut self, mut callback: F) -> bool
    where
        F: FnMut(u32, &MarkerRef<'_>) -> ControlFlow<()>,
    {
        if !matches!(self.state, DatafileState::Read | DatafileState::Write) {
            warn!(datafile = %self.name(), state = %self.state, "cannot iterate datafile");
            return false;
        }

        let mut ticks = TickRange::default();
        let mut max_tick = 0;
        let mut completed = true;

        let mut cursor = self.markers();
        for (offset, marker) in cursor.by_ref() {
            ticks.observe(marker.raw_type(), marker.tick());
            max_tick = max_tick.max(marker.tick());
            if callback(offset, &marker).is_break() {
                completed = false;
                break;
            }
        }
        if let Some(CursorStop::Broken { offset }) = cursor.stop() {
            debug!(datafile = %self.name(), offset, "iteration stopped at broken marker");
            completed = false;
        }

        self.ticks.merge(&ticks);
        self.ctx.ticks().observe(max_tick);
        completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::context::EngineContext;
    use crate::marker::{MarkerType, WalMarker, HEADER_MARKER_SIZE};
    use crate::types::TransactionId;

    fn datafile_with(ticks: &[u64]) -> Datafile {
        let ctx = EngineContext::with_page_size(StorageConfig::default(), 4096);
        let mut df = Datafile::create(&ctx, None, 1, 4096, true).unwrap();
        for tick in ticks {
            let marker = WalMarker::document(TransactionId::new(1), vec![0xA0], *tick)
                .encode(*tick)
                .unwrap();
            let position = df.reserve_element(marker.len() as u32, 0).unwrap();
            df.write_element(position, &marker, false).unwrap();
        }
        df
    }

    #[test]
    fn cursor_visits_markers_in_order() {
        let df = datafile_with(&[3, 4, 5]);
        let seen: Vec<(u32, u64)> = df.markers().map(|(o, m)| (o, m.tick())).collect();
        assert_eq!(seen.len(), 4);
        assert_eq!(seen[0], (0, 1));
        assert_eq!(seen[1].0, HEADER_MARKER_SIZE);
        assert_eq!(seen[3].1, 5);
    }

    #[test]
    fn cursor_stops_at_sentinel() {
        let data = vec![0u8; 64];
        let mut cursor = MarkerCursor::new(&data);
        assert!(cursor.next().is_none());
        assert_eq!(cursor.stop(), Some(CursorStop::Sentinel { offset: 0 }));
    }

    #[test]
    fn cursor_rejects_overlong_marker() {
        let mut data = vec![0u8; 32];
        data[0] = 200;
        let mut cursor = MarkerCursor::new(&data);
        assert!(cursor.next().is_none());
        assert_eq!(cursor.stop(), Some(CursorStop::Broken { offset: 0 }));
    }

    #[test]
    fn iterate_reaches_end() {
        let mut df = datafile_with(&[7, 8]);
        let mut types = Vec::new();
        assert!(df.iterate(|_, m| {
            types.push(m.marker_type());
            ControlFlow::Continue(())
        }));
        assert_eq!(
            types,
            vec![
                Some(MarkerType::Header),
                Some(MarkerType::Document),
                Some(MarkerType::Document)
            ]
        );
    }

    #[test]
    fn iterate_can_stop_early() {
        let mut df = datafile_with(&[7, 8, 9]);
        let mut count = 0;
        let completed = df.iterate(|_, _| {
            count += 1;
            if count == 2 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });
        assert!(!completed);
        assert_eq!(count, 2);
    }

    #[test]
    fn iterate_bumps_clock() {
        let mut df = datafile_with(&[70]);
        assert!(df.iterate(|_, _| ControlFlow::Continue(())));
        assert!(df.ctx.ticks().current() >= 70);
    }

    #[test]
    fn iterate_requires_mapping() {
        let mut df = datafile_with(&[1]);
        df.close().unwrap();
        assert!(!df.iterate(|_, _| ControlFlow::Continue(())));
    }
}
