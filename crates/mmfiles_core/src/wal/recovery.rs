//! Two-pass WAL recovery state.

use super::logfile::WalLogfile;
use crate::error::CoreResult;
use crate::marker::{document_revision, MarkerRef, MarkerType, WalMarker};
use crate::types::{CollectionId, DatabaseId, Tick, TransactionId, ViewId};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// An operation handed to the live structures during replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayOperation<'a> {
    /// Insert or replace a document.
    Insert {
        /// Owning database, from the preceding prologue.
        database_id: DatabaseId,
        /// Owning collection, from the preceding prologue.
        collection_id: CollectionId,
        /// Writing transaction.
        transaction_id: TransactionId,
        /// CBOR document.
        document: &'a [u8],
        /// Storage-local document id.
        local_document_id: u64,
        /// Marker tick.
        tick: Tick,
    },
    /// Remove a document.
    Remove {
        /// Owning database, from the preceding prologue.
        database_id: DatabaseId,
        /// Owning collection, from the preceding prologue.
        collection_id: CollectionId,
        /// Writing transaction.
        transaction_id: TransactionId,
        /// CBOR document holding at least the key.
        document: &'a [u8],
        /// Storage-local document id.
        local_document_id: u64,
        /// Marker tick.
        tick: Tick,
    },
    /// Create or drop a database.
    Database {
        /// [`MarkerType::CreateDatabase`] or [`MarkerType::DropDatabase`].
        kind: MarkerType,
        /// Affected database.
        database_id: DatabaseId,
        /// CBOR properties.
        payload: &'a [u8],
    },
    /// Collection or index definition change.
    Collection {
        /// One of the collection or index marker types.
        kind: MarkerType,
        /// Owning database.
        database_id: DatabaseId,
        /// Affected collection.
        collection_id: CollectionId,
        /// CBOR properties.
        payload: &'a [u8],
    },
    /// View definition change.
    View {
        /// One of the view marker types.
        kind: MarkerType,
        /// Owning database.
        database_id: DatabaseId,
        /// Affected view.
        view_id: ViewId,
        /// CBOR properties.
        payload: &'a [u8],
    },
}

/// The live side of recovery: databases, collections and indexes.
pub trait ReplayTarget {
    /// Applies one operation.
    ///
    /// # Errors
    ///
    /// Any error counts as a failed marker; replay continues only if
    /// recovery errors are ignored.
    fn apply(&mut self, operation: ReplayOperation<'_>) -> CoreResult<()>;
}

/// State accumulated while scanning and replaying the WAL.
#[derive(Debug, Default)]
pub struct RecoverState {
    /// Transactions without a commit marker, with their database and whether
    /// an abort marker was seen.
    pub failed_transactions: HashMap<TransactionId, (DatabaseId, bool)>,
    /// Databases dropped somewhere in the log.
    pub dropped_databases: HashSet<DatabaseId>,
    /// Collections dropped somewhere in the log.
    pub dropped_collections: HashSet<CollectionId>,
    /// Views dropped somewhere in the log.
    pub dropped_views: HashSet<ViewId>,
    /// Database of the last prologue.
    pub last_database_id: DatabaseId,
    /// Collection of the last prologue.
    pub last_collection_id: CollectionId,
    /// Largest tick seen.
    pub last_tick: Tick,
    /// Largest document revision seen.
    pub max_revision_id: u64,
    /// Largest local document id seen.
    pub max_local_document_id: u64,
    /// Logfiles that are replayed, oldest first.
    pub logfiles_to_process: Vec<Arc<WalLogfile>>,
    /// Logfiles found empty; removed after recovery.
    pub empty_logfiles: Vec<PathBuf>,
    /// Keep going after a marker failed to replay.
    pub ignore_recovery_errors: bool,
    /// Number of markers that failed to replay.
    pub error_count: u64,
}

impl RecoverState {
    /// Creates an empty state.
    #[must_use]
    pub fn new(ignore_recovery_errors: bool) -> Self {
        Self {
            ignore_recovery_errors,
            ..Self::default()
        }
    }

    /// Returns `true` if there is anything to replay.
    #[must_use]
    pub fn must_replay(&self) -> bool {
        !self.logfiles_to_process.is_empty()
    }

    /// Returns `true` if the transaction never committed.
    #[must_use]
    pub fn is_failed(&self, transaction_id: TransactionId) -> bool {
        self.failed_transactions.contains_key(&transaction_id)
    }

    /// Returns `true` if the database is dropped later in the log.
    #[must_use]
    pub fn is_dropped_database(&self, database_id: DatabaseId) -> bool {
        self.dropped_databases.contains(&database_id)
    }

    /// Returns `true` if the database or the collection is dropped later.
    #[must_use]
    pub fn is_dropped_collection(&self, database_id: DatabaseId, collection_id: CollectionId) -> bool {
        self.is_dropped_database(database_id) || self.dropped_collections.contains(&collection_id)
    }

    /// Returns `true` if the database or the view is dropped later.
    #[must_use]
    pub fn is_dropped_view(&self, database_id: DatabaseId, view_id: ViewId) -> bool {
        self.is_dropped_database(database_id) || self.dropped_views.contains(&view_id)
    }

    /// Counts a failed marker and returns whether replay may continue.
    pub fn can_continue(&mut self) -> bool {
        self.error_count += 1;
        self.ignore_recovery_errors
    }

    /// First pass: notes ticks, transaction outcomes, drops and id maxima.
    ///
    /// Never stops the iteration.
    pub fn initial_scan_marker(&mut self, marker: &MarkerRef<'_>) -> ControlFlow<()> {
        let Some(kind) = marker.marker_type() else {
            return ControlFlow::Continue(());
        };
        if kind.tracks_tick() {
            self.last_tick = self.last_tick.max(marker.tick());
        }

        match kind {
            MarkerType::Prologue => self.note_prologue(marker),
            MarkerType::BeginTransaction => {
                if let (Some(database_id), Some(transaction_id)) =
                    (marker.database_id(), marker.transaction_id())
                {
                    self.failed_transactions.insert(transaction_id, (database_id, false));
                }
            }
            MarkerType::CommitTransaction => {
                if let Some(transaction_id) = marker.transaction_id() {
                    self.failed_transactions.remove(&transaction_id);
                }
            }
            MarkerType::AbortTransaction => {
                if let (Some(database_id), Some(transaction_id)) =
                    (marker.database_id(), marker.transaction_id())
                {
                    self.failed_transactions.insert(transaction_id, (database_id, true));
                }
            }
            MarkerType::DropDatabase => {
                if let Some(database_id) = marker.database_id() {
                    self.dropped_databases.insert(database_id);
                }
            }
            MarkerType::CreateDatabase => {
                if let Some(database_id) = marker.database_id() {
                    self.dropped_databases.remove(&database_id);
                }
            }
            MarkerType::DropCollection => {
                if let Some(collection_id) = marker.collection_id() {
                    self.dropped_collections.insert(collection_id);
                }
            }
            MarkerType::CreateCollection => {
                if let Some(collection_id) = marker.collection_id() {
                    self.dropped_collections.remove(&collection_id);
                }
            }
            MarkerType::DropView => {
                if let Some(view_id) = marker.view_id() {
                    self.dropped_views.insert(view_id);
                }
            }
            MarkerType::CreateView => {
                if let Some(view_id) = marker.view_id() {
                    self.dropped_views.remove(&view_id);
                }
            }
            MarkerType::Document | MarkerType::Remove => {
                if let Some(revision) = marker.document().and_then(document_revision) {
                    self.max_revision_id = self.max_revision_id.max(revision);
                }
                if let Some(local_id) = marker.local_document_id() {
                    self.max_local_document_id = self.max_local_document_id.max(local_id);
                }
            }
            _ => {}
        }
        ControlFlow::Continue(())
    }

    fn note_prologue(&mut self, marker: &MarkerRef<'_>) {
        if let (Some(database_id), Some(collection_id)) = (marker.database_id(), marker.collection_id()) {
            self.last_database_id = database_id;
            self.last_collection_id = collection_id;
        }
    }

    /// Second pass: forwards the operations that survive to `target`.
    ///
    /// Skips markers of failed transactions and of objects dropped later.
    /// Stops the iteration when an operation fails and recovery errors are
    /// not ignored.
    pub fn replay_marker(
        &mut self,
        marker: &MarkerRef<'_>,
        target: &mut dyn ReplayTarget,
    ) -> ControlFlow<()> {
        let Some(kind) = marker.marker_type() else {
            return ControlFlow::Continue(());
        };
        let Some(operation) = self.replay_operation(kind, marker) else {
            return ControlFlow::Continue(());
        };

        match target.apply(operation) {
            Ok(()) => ControlFlow::Continue(()),
            Err(e) => {
                warn!(
                    marker = kind.name(),
                    tick = marker.tick(),
                    error = %e,
                    "cannot replay WAL marker"
                );
                if self.can_continue() {
                    ControlFlow::Continue(())
                } else {
                    ControlFlow::Break(())
                }
            }
        }
    }

    fn replay_operation<'a>(&mut self, kind: MarkerType, marker: &MarkerRef<'a>) -> Option<ReplayOperation<'a>> {
        match kind {
            MarkerType::Prologue => {
                self.note_prologue(marker);
                None
            }
            MarkerType::Document | MarkerType::Remove => {
                let transaction_id = marker.transaction_id()?;
                let (database_id, collection_id) = (self.last_database_id, self.last_collection_id);
                if self.is_failed(transaction_id) || self.is_dropped_collection(database_id, collection_id) {
                    debug!(tick = marker.tick(), "skipping document marker");
                    return None;
                }
                let document = marker.document()?;
                let local_document_id = marker.local_document_id()?;
                let tick = marker.tick();
                Some(if kind == MarkerType::Document {
                    ReplayOperation::Insert {
                        database_id,
                        collection_id,
                        transaction_id,
                        document,
                        local_document_id,
                        tick,
                    }
                } else {
                    ReplayOperation::Remove {
                        database_id,
                        collection_id,
                        transaction_id,
                        document,
                        local_document_id,
                        tick,
                    }
                })
            }
            MarkerType::CreateDatabase | MarkerType::DropDatabase => {
                let database_id = marker.database_id()?;
                if kind == MarkerType::CreateDatabase && self.is_dropped_database(database_id) {
                    return None;
                }
                Some(ReplayOperation::Database {
                    kind,
                    database_id,
                    payload: marker.payload()?,
                })
            }
            MarkerType::CreateCollection
            | MarkerType::DropCollection
            | MarkerType::RenameCollection
            | MarkerType::ChangeCollection
            | MarkerType::CreateIndex
            | MarkerType::DropIndex => {
                let database_id = marker.database_id()?;
                let collection_id = marker.collection_id()?;
                let skip = if kind == MarkerType::DropCollection {
                    self.is_dropped_database(database_id)
                } else {
                    self.is_dropped_collection(database_id, collection_id)
                };
                if skip {
                    return None;
                }
                Some(ReplayOperation::Collection {
                    kind,
                    database_id,
                    collection_id,
                    payload: marker.payload()?,
                })
            }
            MarkerType::CreateView | MarkerType::DropView | MarkerType::ChangeView => {
                let database_id = marker.database_id()?;
                let view_id = marker.view_id()?;
                let skip = if kind == MarkerType::DropView {
                    self.is_dropped_database(database_id)
                } else {
                    self.is_dropped_view(database_id, view_id)
                };
                if skip {
                    return None;
                }
                Some(ReplayOperation::View {
                    kind,
                    database_id,
                    view_id,
                    payload: marker.payload()?,
                })
            }
            _ => None,
        }
    }

    /// Writes an abort marker for every transaction that began but neither
    /// committed nor aborted.
    ///
    /// Returns the number of aborted transactions.
    ///
    /// # Errors
    ///
    /// Returns the first error of `writer`.
    pub fn abort_open_transactions<W>(&mut self, mut writer: W) -> CoreResult<usize>
    where
        W: FnMut(WalMarker) -> CoreResult<()>,
    {
        let mut open: Vec<_> = self
            .failed_transactions
            .iter()
            .filter(|(_, (_, aborted))| !aborted)
            .map(|(tid, (db, _))| (*tid, *db))
            .collect();
        open.sort_unstable();

        for (transaction_id, database_id) in &open {
            writer(WalMarker::transaction(
                MarkerType::AbortTransaction,
                *database_id,
                *transaction_id,
            ))?;
            self.failed_transactions
                .insert(*transaction_id, (*database_id, true));
        }
        if !open.is_empty() {
            info!(count = open.len(), "aborted unfinished transactions");
        }
        Ok(open.len())
    }

    /// Removes the logfiles found empty during inspection.
    ///
    /// Returns the number of removed files.
    pub fn remove_empty_logfiles(&mut self) -> usize {
        let mut removed = 0;
        for path in self.empty_logfiles.drain(..) {
            match fs::remove_file(&path) {
                Ok(()) => {
                    debug!(path = %path.display(), "removed empty logfile");
                    removed += 1;
                }
                Err(e) => warn!(path = %path.display(), error = %e, "cannot remove empty logfile"),
            }
        }
        removed
    }

    /// Drops the per-run bookkeeping. Counters stay for reseeding id
    /// generators.
    pub fn release_resources(&mut self) {
        self.logfiles_to_process.clear();
        self.failed_transactions.clear();
        self.dropped_databases.clear();
        self.dropped_collections.clear();
        self.dropped_views.clear();
    }
}
