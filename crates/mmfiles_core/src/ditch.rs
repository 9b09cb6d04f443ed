//! Ditches: markers that keep datafiles alive while they are referenced.
//!
//! Readers pin datafiles with document ditches, the compactor and the
//! collector queue drop and rename work behind them. Work at the head of
//! the queue runs only once no reader ditch is in front of it.

use crate::types::Fid;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Handle of a queued ditch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DitchId(u64);

impl fmt::Display for DitchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ditch:{}", self.0)
    }
}

/// Kind of a ditch, without its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DitchKind {
    /// A reader holds documents of the collection.
    Document,
    /// A replication client reads the collection.
    ReplicationClient,
    /// The compactor works on the collection.
    Compaction,
    /// A datafile waits to be dropped.
    DropDatafile,
    /// A datafile waits to be renamed.
    RenameDatafile,
    /// The collection waits to be dropped.
    DropCollection,
}

impl DitchKind {
    /// Name used in status output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Document => "document-reference",
            Self::ReplicationClient => "replication-client",
            Self::Compaction => "compaction",
            Self::DropDatafile => "datafile-drop",
            Self::RenameDatafile => "datafile-rename",
            Self::DropCollection => "collection-drop",
        }
    }
}

/// A queued ditch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ditch {
    /// Reader reference with a usage count.
    Document {
        /// Number of users sharing this ditch.
        uses: u32,
    },
    /// Replication client reference.
    ReplicationClient,
    /// Compaction in progress.
    Compaction,
    /// Pending datafile removal.
    DropDatafile {
        /// Datafile to remove.
        fid: Fid,
    },
    /// Pending datafile rename.
    RenameDatafile {
        /// Datafile to rename.
        fid: Fid,
        /// Datafile it replaces.
        replaces: Fid,
    },
    /// Pending collection drop.
    DropCollection,
}

impl Ditch {
    /// Kind of the ditch.
    #[must_use]
    pub const fn kind(&self) -> DitchKind {
        match self {
            Self::Document { .. } => DitchKind::Document,
            Self::ReplicationClient => DitchKind::ReplicationClient,
            Self::Compaction => DitchKind::Compaction,
            Self::DropDatafile { .. } => DitchKind::DropDatafile,
            Self::RenameDatafile { .. } => DitchKind::RenameDatafile,
            Self::DropCollection => DitchKind::DropCollection,
        }
    }

    /// Returns `true` for deferred work the cleanup thread executes.
    #[must_use]
    pub const fn is_processable(&self) -> bool {
        matches!(
            self,
            Self::DropDatafile { .. } | Self::RenameDatafile { .. } | Self::DropCollection
        )
    }
}

/// FIFO of ditches of one collection.
#[derive(Debug, Default)]
pub struct DitchQueue {
    entries: Mutex<VecDeque<(DitchId, Ditch)>>,
    next_id: AtomicU64,
}

impl DitchQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a ditch and returns its handle.
    pub fn push(&self, ditch: Ditch) -> DitchId {
        let id = DitchId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.entries.lock().push_back((id, ditch));
        id
    }

    /// Pins documents: reuses the newest document ditch if it is at the
    /// tail, otherwise appends a new one.
    pub fn use_document_ditch(&self) -> DitchId {
        let mut entries = self.entries.lock();
        if let Some((id, Ditch::Document { uses })) = entries.back_mut() {
            *uses += 1;
            return *id;
        }
        let id = DitchId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        entries.push_back((id, Ditch::Document { uses: 1 }));
        id
    }

    /// Returns `true` if a ditch of `kind` is queued.
    #[must_use]
    pub fn contains(&self, kind: DitchKind) -> bool {
        self.entries.lock().iter().any(|(_, d)| d.kind() == kind)
    }

    /// Releases a ditch. Document ditches only go away with their last use.
    ///
    /// Returns `false` if the id is unknown.
    pub fn release(&self, id: DitchId) -> bool {
        let mut entries = self.entries.lock();
        let Some(index) = entries.iter().position(|(i, _)| *i == id) else {
            return false;
        };
        if let Some((_, Ditch::Document { uses })) = entries.get_mut(index) {
            *uses = uses.saturating_sub(1);
            if *uses > 0 {
                return true;
            }
        }
        entries.remove(index);
        true
    }

    /// Pops the head if it is deferred work.
    #[must_use]
    pub fn pop_processable(&self) -> Option<(DitchId, Ditch)> {
        let mut entries = self.entries.lock();
        if entries.front().is_some_and(|(_, d)| d.is_processable()) {
            entries.pop_front()
        } else {
            None
        }
    }

    /// Kind of the head ditch.
    #[must_use]
    pub fn head(&self) -> Option<DitchKind> {
        self.entries.lock().front().map(|(_, d)| d.kind())
    }

    /// Number of document ditches.
    #[must_use]
    pub fn document_ditch_count(&self) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|(_, d)| d.kind() == DitchKind::Document)
            .count()
    }

    /// Number of queued ditches.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_waits_behind_readers() {
        let queue = DitchQueue::new();
        let reader = queue.use_document_ditch();
        queue.push(Ditch::DropDatafile { fid: 7 });

        assert_eq!(queue.head(), Some(DitchKind::Document));
        assert!(queue.pop_processable().is_none());

        assert!(queue.release(reader));
        let (_, ditch) = queue.pop_processable().unwrap();
        assert_eq!(ditch, Ditch::DropDatafile { fid: 7 });
        assert!(queue.is_empty());
    }

    #[test]
    fn document_ditch_is_shared() {
        let queue = DitchQueue::new();
        let a = queue.use_document_ditch();
        let b = queue.use_document_ditch();
        assert_eq!(a, b);
        assert_eq!(queue.len(), 1);

        assert!(queue.release(a));
        assert_eq!(queue.document_ditch_count(), 1);
        assert!(queue.release(b));
        assert_eq!(queue.document_ditch_count(), 0);
        assert!(!queue.release(a));
    }

    #[test]
    fn new_document_ditch_behind_other_work() {
        let queue = DitchQueue::new();
        let first = queue.use_document_ditch();
        queue.push(Ditch::Compaction);
        let second = queue.use_document_ditch();
        assert_ne!(first, second);
        assert_eq!(queue.document_ditch_count(), 2);
        assert!(queue.contains(DitchKind::Compaction));
        assert!(!queue.contains(DitchKind::DropCollection));
    }

    #[test]
    fn rename_and_collection_drop_are_processable() {
        let queue = DitchQueue::new();
        queue.push(Ditch::RenameDatafile { fid: 3, replaces: 2 });
        queue.push(Ditch::ReplicationClient);
        queue.push(Ditch::DropCollection);

        assert!(queue.pop_processable().is_some());
        assert!(queue.pop_processable().is_none());
        assert_eq!(queue.head().map(DitchKind::as_str), Some("replication-client"));
    }
}
