//! Short-lived reservations inside the current logfile.

use super::logfile::WalLogfile;
use crate::error::{CoreError, CoreResult};
use crate::marker::{aligned_size, MarkerMut, MarkerRef, WalMarker};
use crate::types::Tick;
use std::sync::Arc;
use tracing::trace;

/// State of a [`WalSlot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    /// Not assigned.
    Unused,
    /// Reserved by a writer.
    Used,
    /// Filled and handed back.
    Returned,
    /// Filled and handed back; the writer waits for the sync.
    ReturnedWfs,
}

/// A reserved range of a logfile that one writer fills with one marker.
#[derive(Debug)]
pub struct WalSlot {
    status: SlotStatus,
    tick: Tick,
    logfile: Option<Arc<WalLogfile>>,
    offset: u32,
    size: u32,
}

impl Default for WalSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl WalSlot {
    /// Creates an unused slot.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            status: SlotStatus::Unused,
            tick: 0,
            logfile: None,
            offset: 0,
            size: 0,
        }
    }

    /// Reserves room for `marker` in `logfile` and assigns a fresh tick.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DatafileFull`] if the logfile has no room left.
    pub fn reserve(logfile: &Arc<WalLogfile>, marker: &WalMarker) -> CoreResult<Self> {
        let size = marker.size();
        let (offset, tick) = logfile.reserve(size).ok_or(CoreError::DatafileFull)?;

        let mut slot = Self::new();
        slot.set_used(Arc::clone(logfile), offset, size, tick)?;
        Ok(slot)
    }

    /// Assigns an unused slot to a reserved range.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IllegalState`] if the slot is already assigned.
    pub fn set_used(
        &mut self,
        logfile: Arc<WalLogfile>,
        offset: u32,
        size: u32,
        tick: Tick,
    ) -> CoreResult<()> {
        if self.status != SlotStatus::Unused {
            return Err(CoreError::illegal_state(format!(
                "cannot assign a slot in state {:?}",
                self.status
            )));
        }
        self.status = SlotStatus::Used;
        self.logfile = Some(logfile);
        self.offset = offset;
        self.size = size;
        self.tick = tick;
        Ok(())
    }

    /// Hands the filled slot back.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IllegalState`] unless the slot is in use.
    pub fn set_returned(&mut self, wait_for_sync: bool) -> CoreResult<()> {
        if self.status != SlotStatus::Used {
            return Err(CoreError::illegal_state(format!(
                "cannot return a slot in state {:?}",
                self.status
            )));
        }
        self.status = if wait_for_sync {
            SlotStatus::ReturnedWfs
        } else {
            SlotStatus::Returned
        };
        Ok(())
    }

    /// Releases a returned slot.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IllegalState`] unless the slot was returned.
    pub fn set_unused(&mut self) -> CoreResult<()> {
        if !matches!(self.status, SlotStatus::Returned | SlotStatus::ReturnedWfs) {
            return Err(CoreError::illegal_state(format!(
                "cannot release a slot in state {:?}",
                self.status
            )));
        }
        *self = Self::new();
        Ok(())
    }

    /// Current state.
    #[must_use]
    pub fn status(&self) -> SlotStatus {
        self.status
    }

    /// Tick assigned to the slot.
    #[must_use]
    pub fn tick(&self) -> Tick {
        self.tick
    }

    /// Offset of the reserved range.
    #[must_use]
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Size of the marker in the slot.
    #[must_use]
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Logfile the slot points into.
    #[must_use]
    pub fn logfile(&self) -> Option<&Arc<WalLogfile>> {
        self.logfile.as_ref()
    }

    /// Stores `marker` in the slot and finalizes it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IllegalState`] if the slot is not in use or the
    /// marker does not match the reserved size, or the flush error when
    /// syncing is forced.
    pub fn fill(&mut self, marker: &WalMarker) -> CoreResult<()> {
        if self.status != SlotStatus::Used {
            return Err(CoreError::illegal_state("cannot fill a slot that is not in use"));
        }
        if marker.size() != self.size {
            return Err(CoreError::illegal_state(format!(
                "marker of {} bytes does not fit a slot of {} bytes",
                marker.size(),
                self.size
            )));
        }
        let logfile = self
            .logfile
            .as_ref()
            .ok_or_else(|| CoreError::illegal_state("slot has no logfile"))?;

        let mut datafile = logfile.datafile_mut();
        let len = u32::try_from(aligned_size(u64::from(self.size))).unwrap_or(u32::MAX);
        let region = datafile.marker_region_mut(self.offset, len)?;
        marker.store(region)?;
        self.finalize(region, marker)?;

        let view = MarkerRef::new(region)
            .ok_or_else(|| CoreError::illegal_state("slot shorter than a marker header"))?;
        let (raw_type, tick) = (view.raw_type(), view.tick());
        datafile.observe_tick(raw_type, tick);

        if datafile.context().config().force_sync {
            datafile.sync()?;
        }
        trace!(logfile = logfile.id(), offset = self.offset, tick = self.tick, "filled slot");
        Ok(())
    }

    /// Writes size, type and tick in single stores, then the checksum.
    fn finalize(&self, region: &mut [u8], marker: &WalMarker) -> CoreResult<()> {
        let mut header = MarkerMut::new(region)
            .ok_or_else(|| CoreError::illegal_state("slot shorter than a marker header"))?;
        header.set_size(self.size);
        header.set_type_and_tick(marker.marker_type().as_u8(), self.tick);
        if !header.update_crc() {
            return Err(CoreError::illegal_state("marker size exceeds its slot"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::context::EngineContext;
    use crate::marker::MarkerType;
    use crate::types::{DatabaseId, TransactionId};
    use tempfile::tempdir;

    fn open_logfile(dir: &std::path::Path, config: StorageConfig) -> Arc<WalLogfile> {
        let ctx = EngineContext::with_page_size(config, 4096);
        let logfile = WalLogfile::create_new(&ctx, &dir.join("logfile-3.db"), 3, 4096).unwrap();
        logfile.write_header().unwrap();
        logfile
    }

    #[test]
    fn fill_writes_checksummed_marker() {
        let dir = tempdir().unwrap();
        let logfile = open_logfile(dir.path(), StorageConfig::default());
        let marker = WalMarker::document(TransactionId::new(4), vec![0xA1, 0x01, 0x02], 77);

        let mut slot = WalSlot::reserve(&logfile, &marker).unwrap();
        assert_eq!(slot.status(), SlotStatus::Used);
        assert_eq!(slot.offset(), 32);
        slot.fill(&marker).unwrap();
        slot.set_returned(false).unwrap();
        assert_eq!(slot.status(), SlotStatus::Returned);

        let df = logfile.datafile();
        let view = MarkerRef::new(&df.data()[32..]).unwrap();
        assert!(view.check_crc());
        assert_eq!(view.marker_type(), Some(MarkerType::Document));
        assert_eq!(view.tick(), slot.tick());
        assert_eq!(view.local_document_id(), Some(77));
        assert_eq!(df.tick_max(), slot.tick());
    }

    #[test]
    fn forced_sync_flushes() {
        let dir = tempdir().unwrap();
        let logfile = open_logfile(dir.path(), StorageConfig::default().force_sync(true));
        let marker = WalMarker::transaction(MarkerType::BeginTransaction, DatabaseId::new(1), TransactionId::new(2));
        let mut slot = WalSlot::reserve(&logfile, &marker).unwrap();
        slot.fill(&marker).unwrap();
        assert_eq!(logfile.datafile().synced_size(), 64);
    }

    #[test]
    fn full_logfile_refuses_slot() {
        let dir = tempdir().unwrap();
        let logfile = open_logfile(dir.path(), StorageConfig::default());
        let marker = WalMarker::document(TransactionId::new(1), vec![0; 4096], 1);
        assert!(matches!(WalSlot::reserve(&logfile, &marker), Err(CoreError::DatafileFull)));
    }

    #[test]
    fn mismatched_marker_is_rejected() {
        let dir = tempdir().unwrap();
        let logfile = open_logfile(dir.path(), StorageConfig::default());
        let marker = WalMarker::document(TransactionId::new(1), vec![1], 1);
        let mut slot = WalSlot::reserve(&logfile, &marker).unwrap();
        let other = WalMarker::document(TransactionId::new(1), vec![1, 2, 3], 1);
        assert!(slot.fill(&other).is_err());
        assert_eq!(slot.status(), SlotStatus::Used);
    }

    #[test]
    fn slot_lifecycle_is_enforced() {
        let mut unused = WalSlot::new();
        assert!(unused.set_returned(true).is_err());
        assert!(unused.set_unused().is_err());
        assert_eq!(unused.status(), SlotStatus::Unused);

        let dir = tempdir().unwrap();
        let logfile = open_logfile(dir.path(), StorageConfig::default());
        let marker = WalMarker::document(TransactionId::new(1), vec![1], 1);
        let mut slot = WalSlot::reserve(&logfile, &marker).unwrap();
        assert!(slot.set_unused().is_err());
        assert!(slot.set_used(Arc::clone(&logfile), 0, 24, 1).is_err());
        assert_eq!(slot.status(), SlotStatus::Used);

        slot.fill(&marker).unwrap();
        slot.set_returned(true).unwrap();
        assert_eq!(slot.status(), SlotStatus::ReturnedWfs);
        assert!(slot.set_returned(false).is_err());

        slot.set_unused().unwrap();
        assert_eq!(slot.status(), SlotStatus::Unused);
        assert!(slot.logfile().is_none());
        assert!(slot.fill(&marker).is_err());
    }
}
