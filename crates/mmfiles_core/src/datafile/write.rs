//! Append path: reservation, marker writes, sync and sealing.

use super::{Datafile, DatafileState};
use crate::error::{CoreError, CoreResult};
use crate::marker::{aligned_size, footer_marker, MarkerMut, MarkerRef, FOOTER_MARKER_SIZE, JOURNAL_OVERHEAD};
use mmfiles_storage::{AccessPattern, Protection};
use tracing::{debug, error, trace, warn};

impl Datafile {
    fn ensure_writable(&self) -> CoreResult<()> {
        match self.state {
            DatafileState::Write => Ok(()),
            DatafileState::Read => {
                warn!(datafile = %self.name(), "cannot write marker, datafile is read-only");
                Err(CoreError::ReadOnly)
            }
            state => {
                error!(datafile = %self.name(), %state, "cannot write marker in this state");
                Err(CoreError::illegal_state(format!(
                    "cannot write to datafile in state {state}"
                )))
            }
        }
    }

    /// Reserves `size` bytes (rounded up to the marker alignment) at the end
    /// of the written data and returns their offset.
    ///
    /// A datafile always keeps room for its footer. `maximal_journal_size` is
    /// the size the next datafile could be created with; a marker that does
    /// not fit into that either is rejected outright.
    ///
    /// # Errors
    ///
    /// - [`CoreError::ReadOnly`] in `READ` state
    /// - [`CoreError::IllegalState`] in any other non-`WRITE` state
    /// - [`CoreError::DocumentTooLarge`] if no datafile could hold the marker
    /// - [`CoreError::DatafileFull`] if this datafile cannot; it is then
    ///   flagged full
    pub fn reserve_element(&mut self, size: u32, maximal_journal_size: u32) -> CoreResult<u32> {
        let size = u32::try_from(aligned_size(u64::from(size))).unwrap_or(u32::MAX);
        self.ensure_writable()?;

        if u64::from(size) + u64::from(JOURNAL_OVERHEAD) > u64::from(self.maximal_size) {
            if maximal_journal_size <= self.maximal_size {
                error!(
                    datafile = %self.name(),
                    size,
                    maximal_size = self.maximal_size,
                    "cannot write marker, it exceeds the maximal datafile size"
                );
                return Err(CoreError::DocumentTooLarge {
                    size,
                    maximal_size: self.maximal_size,
                });
            }
            // a larger datafile would still fit it
        }

        let required = u64::from(self.current_size) + u64::from(size) + u64::from(self.footer_size);
        if required > u64::from(self.maximal_size) {
            self.full = true;
            trace!(datafile = %self.name(), size, "datafile is full");
            return Err(CoreError::DatafileFull);
        }

        let position = self.current_size;
        self.current_size += size;
        Ok(position)
    }

    /// Reserves `size` bytes, judging oversized markers against the
    /// configured journal size.
    ///
    /// A marker that fits a fresh journal gives [`CoreError::DatafileFull`]
    /// so the caller rotates; anything larger is
    /// [`CoreError::DocumentTooLarge`].
    ///
    /// # Errors
    ///
    /// Same as [`Datafile::reserve_element`].
    pub fn reserve_journal_element(&mut self, size: u32) -> CoreResult<u32> {
        let journal_size = self.ctx.config().journal_size;
        self.reserve_element(size, journal_size)
    }

    /// Copies a finished marker to `position` and records its tick.
    ///
    /// With `force_sync`, the written range is flushed before returning.
    ///
    /// # Errors
    ///
    /// Returns an error if the marker has no tick or size, the state does not
    /// allow writes, the position is out of bounds, or the flush fails. A
    /// failed flush moves the datafile to `WRITE_ERROR`.
    pub fn write_element(&mut self, position: u32, marker: &[u8], force_sync: bool) -> CoreResult<()> {
        let view = MarkerRef::new(marker)
            .ok_or_else(|| CoreError::illegal_state("marker is shorter than its header"))?;
        if view.tick() == 0 {
            error!(datafile = %self.name(), "logic error, invalid marker with tick 0");
            return Err(CoreError::illegal_state("marker tick must be positive"));
        }
        if view.size() == 0 {
            error!(datafile = %self.name(), "logic error, invalid marker with size 0");
            return Err(CoreError::illegal_state("marker size must be positive"));
        }
        self.ensure_writable()?;

        let start = position as usize;
        let end = start + marker.len();
        if end > self.maximal_size as usize || end > self.bytes().len() {
            error!(datafile = %self.name(), position, len = marker.len(), "logic error, writing out of bounds");
            return Err(CoreError::illegal_state(format!(
                "marker at {position} with {} bytes exceeds datafile size {}",
                marker.len(),
                self.maximal_size
            )));
        }

        self.region_mut()?.as_mut_slice()?[start..end].copy_from_slice(marker);
        self.ticks.observe(view.raw_type(), view.tick());
        self.written = self.written.max(end as u32);

        if force_sync {
            if let Err(e) = self.region()?.flush_range(start, marker.len()) {
                self.state = DatafileState::WriteError;
                error!(datafile = %self.name(), error = %e, "msync failed");
                return Err(e.into());
            }
            trace!(datafile = %self.name(), position, "msync succeeded");
        }
        Ok(())
    }

    /// Computes the checksum of a physical datafile's marker, then writes it.
    ///
    /// Anonymous datafiles are never read back from disk, so their markers
    /// keep whatever checksum they carry.
    ///
    /// # Errors
    ///
    /// See [`Datafile::write_element`].
    pub fn write_crc_element(
        &mut self,
        position: u32,
        marker: &mut [u8],
        force_sync: bool,
    ) -> CoreResult<()> {
        if self.is_physical() {
            let mut header = MarkerMut::new(marker)
                .ok_or_else(|| CoreError::illegal_state("marker is shorter than its header"))?;
            if !header.update_crc() {
                return Err(CoreError::illegal_state("marker size exceeds its buffer"));
            }
        }
        self.write_element(position, marker, force_sync)
    }

    /// Moves the write position forward by `size` aligned bytes, for callers
    /// that fill the reserved range in place.
    ///
    /// Returns the offset of the reserved range.
    pub(crate) fn advance_write_position(&mut self, size: u32) -> u32 {
        let position = self.current_size;
        let size = u32::try_from(aligned_size(u64::from(size))).unwrap_or(u32::MAX);
        self.current_size = self.current_size.saturating_add(size);
        position
    }

    /// Mutable access to `[offset, offset + len)` of a writable datafile.
    pub(crate) fn marker_region_mut(&mut self, offset: u32, len: u32) -> CoreResult<&mut [u8]> {
        self.ensure_writable()?;
        let start = offset as usize;
        let end = start + len as usize;
        if end > self.maximal_size as usize {
            return Err(CoreError::illegal_state(format!(
                "range {start}..{end} exceeds datafile size {}",
                self.maximal_size
            )));
        }
        self.written = self.written.max(end as u32);
        let bytes = self.region_mut()?.as_mut_slice()?;
        bytes
            .get_mut(start..end)
            .ok_or_else(|| CoreError::illegal_state("range exceeds mapping"))
    }

    /// Flushes everything written since the last sync.
    ///
    /// # Errors
    ///
    /// Returns the flush error; the datafile then switches to `WRITE_ERROR`.
    pub fn sync(&mut self) -> CoreResult<()> {
        if self.written <= self.synced {
            return Ok(());
        }
        let (start, len) = (self.synced as usize, (self.written - self.synced) as usize);
        if let Err(e) = self.region()?.flush_range(start, len) {
            self.state = DatafileState::WriteError;
            error!(datafile = %self.name(), error = %e, "msync failed");
            return Err(e.into());
        }
        self.synced = self.written;
        Ok(())
    }

    /// Writes the footer, flushes the file and switches to `READ`.
    ///
    /// The footer carries the largest tick written so far, or a fresh tick
    /// for a datafile without data markers. After sealing, the maximal size
    /// equals the current size and the mapping is read-only.
    ///
    /// # Errors
    ///
    /// - [`CoreError::DatafileSealed`] if a footer exists
    /// - [`CoreError::ReadOnly`] in `READ` state
    /// - [`CoreError::IllegalState`] in any other non-`WRITE` state
    /// - the write or flush error; the datafile is then in `WRITE_ERROR`
    pub fn seal(&mut self) -> CoreResult<()> {
        if self.sealed {
            return Err(CoreError::DatafileSealed);
        }
        match self.state {
            DatafileState::Write => {}
            DatafileState::Read => return Err(CoreError::ReadOnly),
            state => {
                return Err(CoreError::illegal_state(format!(
                    "cannot seal datafile in state {state}"
                )))
            }
        }

        let tick = match self.ticks.tick_max {
            0 => self.ctx.ticks().next(),
            tick => tick,
        };

        // the space kept for the footer is handed out now
        self.footer_size = 0;
        if let Err(e) = self.write_footer(tick) {
            self.state = DatafileState::WriteError;
            error!(datafile = %self.name(), error = %e, "cannot seal datafile");
            return Err(e);
        }
        self.synced = self.written;

        self.sealed = true;
        self.state = DatafileState::Read;
        self.maximal_size = self.current_size;

        let name = self.name();
        let region = self.region_mut()?;
        if let Err(e) = region.protect(Protection::ReadOnly) {
            warn!(datafile = %name, error = %e, "cannot make sealed datafile read-only");
        }
        if let Err(e) = region.advise(AccessPattern::Random) {
            debug!(error = %e, "access pattern hint rejected");
        }
        debug!(datafile = %name, size = self.current_size, "sealed datafile");
        Ok(())
    }

    fn write_footer(&mut self, tick: u64) -> CoreResult<()> {
        let mut footer = footer_marker(tick);
        let position = self.reserve_element(FOOTER_MARKER_SIZE, 0)?;
        self.write_crc_element(position, &mut footer, false)?;

        let start = self.synced as usize;
        let len = (self.current_size as usize).saturating_sub(start);
        self.region()?.flush_range(start, len)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::StorageConfig;
    use crate::context::EngineContext;
    use crate::datafile::{Datafile, DatafileState};
    use crate::error::CoreError;
    use crate::marker::{MarkerRef, MarkerType, WalMarker, HEADER_MARKER_SIZE};
    use crate::types::TransactionId;
    use tempfile::tempdir;

    fn ctx() -> EngineContext {
        EngineContext::with_page_size(StorageConfig::default(), 4096)
    }

    fn document(tick: u64, payload: usize) -> Vec<u8> {
        WalMarker::document(TransactionId::new(1), vec![0x40; payload], tick)
            .encode(tick)
            .unwrap()
    }

    fn append(df: &mut Datafile, marker: &mut [u8]) -> u32 {
        let position = df.reserve_element(marker.len() as u32, 0).unwrap();
        df.write_crc_element(position, marker, false).unwrap();
        position
    }

    #[test]
    fn reserve_aligns_and_advances() {
        let mut df = Datafile::create(&ctx(), None, 1, 4096, true).unwrap();
        assert_eq!(df.reserve_element(33, 0).unwrap(), HEADER_MARKER_SIZE);
        assert_eq!(df.current_size(), HEADER_MARKER_SIZE + 40);
    }

    #[test]
    fn reserve_keeps_room_for_footer() {
        let mut df = Datafile::create(&ctx(), None, 1, 4096, true).unwrap();
        assert_eq!(df.reserve_element(8, 0).unwrap(), HEADER_MARKER_SIZE);
        let room = 4096 - HEADER_MARKER_SIZE - 8 - 16;
        assert!(matches!(df.reserve_element(room + 8, 0), Err(CoreError::DatafileFull)));
        assert!(df.is_full());
        assert_eq!(df.reserve_element(room, 0).unwrap(), HEADER_MARKER_SIZE + 8);
        assert_eq!(df.current_size(), 4096 - 16);
    }

    #[test]
    fn reserve_rejects_oversized_markers() {
        let mut df = Datafile::create(&ctx(), None, 1, 4096, true).unwrap();
        assert!(matches!(
            df.reserve_element(4096, 4096),
            Err(CoreError::DocumentTooLarge { .. })
        ));
        assert!(!df.is_full());

        // a bigger journal could take it, so this one is merely full
        assert!(matches!(df.reserve_element(4096, 1 << 20), Err(CoreError::DatafileFull)));
    }

    #[test]
    fn journal_reservations_follow_configured_size() {
        let small = EngineContext::with_page_size(StorageConfig::default().journal_size(4096), 4096);
        let mut df = Datafile::create(&small, None, 1, 4096, true).unwrap();
        assert!(matches!(
            df.reserve_journal_element(4096),
            Err(CoreError::DocumentTooLarge { .. })
        ));

        let mut df = Datafile::create(&ctx(), None, 1, 4096, true).unwrap();
        assert!(matches!(df.reserve_journal_element(4096), Err(CoreError::DatafileFull)));
        assert!(df.is_full());
        assert_eq!(df.reserve_journal_element(24).unwrap(), HEADER_MARKER_SIZE);
    }

    #[test]
    fn journal_uses_configured_size() {
        let dir = tempdir().unwrap();
        let config = StorageConfig::default().journal_size(64 * 1024);
        let ctx = EngineContext::with_page_size(config, 4096);
        let df = Datafile::create_journal(&ctx, &dir.path().join("journal-7.db"), 7).unwrap();
        assert_eq!(df.maximal_size(), 64 * 1024);
        assert_eq!(df.fid(), 7);
        assert_eq!(df.current_size(), HEADER_MARKER_SIZE);
    }

    #[test]
    fn write_tracks_ticks() {
        let mut df = Datafile::create(&ctx(), None, 1, 4096, true).unwrap();
        append(&mut df, &mut document(5, 3));
        append(&mut df, &mut document(9, 3));

        assert_eq!(df.tick_min(), 5);
        assert_eq!(df.tick_max(), 9);
        assert_eq!(df.data_min(), 5);
        assert_eq!(df.data_max(), 9);
    }

    #[test]
    fn write_rejects_zero_tick() {
        let mut df = Datafile::create(&ctx(), None, 1, 4096, true).unwrap();
        let marker = document(0, 1);
        let position = df.reserve_element(marker.len() as u32, 0).unwrap();
        assert!(matches!(
            df.write_element(position, &marker, false),
            Err(CoreError::IllegalState { .. })
        ));
    }

    #[test]
    fn write_rejects_out_of_bounds() {
        let mut df = Datafile::create(&ctx(), None, 1, 4096, true).unwrap();
        let marker = document(3, 1);
        assert!(matches!(
            df.write_element(4090, &marker, false),
            Err(CoreError::IllegalState { .. })
        ));
    }

    #[test]
    fn physical_markers_get_checksums() {
        let dir = tempdir().unwrap();
        let mut df = Datafile::create(&ctx(), Some(&dir.path().join("datafile-1.db")), 1, 4096, true).unwrap();
        let mut marker = document(4, 10);
        marker[4..8].copy_from_slice(&[0xFF; 4]);
        let position = append(&mut df, &mut marker);

        let view = MarkerRef::new(&df.data()[position as usize..]).unwrap();
        assert!(view.check_crc());
        df.sync().unwrap();
        assert_eq!(df.synced_size(), df.current_size());
    }

    #[test]
    fn seal_writes_footer_and_shrinks() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("datafile-2.db");
        let mut df = Datafile::create(&ctx(), Some(&path), 2, 8192, true).unwrap();
        append(&mut df, &mut document(7, 20));
        let before = df.current_size();

        df.seal().unwrap();

        assert!(df.is_sealed());
        assert_eq!(df.state(), DatafileState::Read);
        assert_eq!(df.current_size(), before + 16);
        assert_eq!(df.maximal_size(), df.current_size());
        assert_eq!(df.footer_size(), 0);
        let footer = MarkerRef::new(&df.data()[before as usize..]).unwrap();
        assert_eq!(footer.marker_type(), Some(MarkerType::Footer));
        assert_eq!(footer.tick(), 7);
        assert!(footer.check_crc());
    }

    #[test]
    fn seal_empty_datafile_uses_fresh_tick() {
        let context = ctx();
        context.ticks().observe(41);
        let mut df = Datafile::create(&context, None, 1, 4096, true).unwrap();
        df.seal().unwrap();

        let footer = MarkerRef::new(&df.data()[HEADER_MARKER_SIZE as usize..]).unwrap();
        assert_eq!(footer.tick(), 42);
        assert_eq!(df.tick_max(), 0);
    }

    #[test]
    fn sealed_datafile_refuses_writes() {
        let mut df = Datafile::create(&ctx(), None, 1, 4096, true).unwrap();
        df.seal().unwrap();
        assert!(matches!(df.seal(), Err(CoreError::DatafileSealed)));
        assert!(matches!(df.reserve_element(16, 0), Err(CoreError::ReadOnly)));
    }

    #[test]
    fn closed_datafile_refuses_writes() {
        let mut df = Datafile::create(&ctx(), None, 1, 4096, true).unwrap();
        df.close().unwrap();
        assert!(matches!(df.reserve_element(16, 0), Err(CoreError::IllegalState { .. })));
        assert!(matches!(df.seal(), Err(CoreError::IllegalState { .. })));
    }
}
