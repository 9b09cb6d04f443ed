//! Classification of markers for replication.
//!
//! Replication clients consume the WAL as a stream of operations. Document,
//! remove and transaction markers are always shipped; definition changes
//! only when the client asked for DDL.

use crate::datafile::Datafile;
use crate::marker::{MarkerRef, MarkerType};
use crate::types::{CollectionId, DatabaseId, Tick, TransactionId, ViewId};
use serde::Serialize;
use std::ops::ControlFlow;
use tracing::debug;

/// Replication operation with its stable wire code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u16)]
pub enum ReplicationOperation {
    /// Not replicated.
    Invalid = 0,
    /// Database created.
    DatabaseCreate = 1100,
    /// Database dropped.
    DatabaseDrop = 1101,
    /// Collection created.
    CollectionCreate = 2000,
    /// Collection dropped.
    CollectionDrop = 2001,
    /// Collection renamed.
    CollectionRename = 2002,
    /// Collection properties changed.
    CollectionChange = 2003,
    /// Index created.
    IndexCreate = 2100,
    /// Index dropped.
    IndexDrop = 2101,
    /// View created.
    ViewCreate = 2110,
    /// View dropped.
    ViewDrop = 2111,
    /// View properties changed.
    ViewChange = 2112,
    /// Transaction started.
    TransactionStart = 2200,
    /// Transaction committed.
    TransactionCommit = 2201,
    /// Transaction aborted.
    TransactionAbort = 2202,
    /// Document inserted or replaced.
    MarkerDocument = 2300,
    /// Document removed.
    MarkerRemove = 2302,
}

impl ReplicationOperation {
    /// Stable numeric code.
    #[must_use]
    pub const fn code(self) -> u16 {
        self as u16
    }

    /// Returns `true` for definition changes.
    #[must_use]
    pub const fn is_ddl(self) -> bool {
        matches!(
            self,
            Self::DatabaseCreate
                | Self::DatabaseDrop
                | Self::CollectionCreate
                | Self::CollectionDrop
                | Self::CollectionRename
                | Self::CollectionChange
                | Self::IndexCreate
                | Self::IndexDrop
                | Self::ViewCreate
                | Self::ViewDrop
                | Self::ViewChange
        )
    }
}

/// Maps a marker type to its replication operation.
#[must_use]
pub const fn translate_type(marker_type: MarkerType) -> ReplicationOperation {
    use ReplicationOperation as Op;
    match marker_type {
        MarkerType::Document => Op::MarkerDocument,
        MarkerType::Remove => Op::MarkerRemove,
        MarkerType::BeginTransaction => Op::TransactionStart,
        MarkerType::CommitTransaction => Op::TransactionCommit,
        MarkerType::AbortTransaction => Op::TransactionAbort,
        MarkerType::CreateCollection => Op::CollectionCreate,
        MarkerType::DropCollection => Op::CollectionDrop,
        MarkerType::RenameCollection => Op::CollectionRename,
        MarkerType::ChangeCollection => Op::CollectionChange,
        MarkerType::CreateIndex => Op::IndexCreate,
        MarkerType::DropIndex => Op::IndexDrop,
        MarkerType::CreateDatabase => Op::DatabaseCreate,
        MarkerType::DropDatabase => Op::DatabaseDrop,
        MarkerType::CreateView => Op::ViewCreate,
        MarkerType::DropView => Op::ViewDrop,
        MarkerType::ChangeView => Op::ViewChange,
        MarkerType::Header
        | MarkerType::Footer
        | MarkerType::Blank
        | MarkerType::ColHeader
        | MarkerType::Prologue => Op::Invalid,
    }
}

/// Returns `true` if a marker of this type is shipped to clients.
#[must_use]
pub const fn must_replicate(marker_type: MarkerType, allow_ddl: bool) -> bool {
    let op = translate_type(marker_type);
    match op {
        ReplicationOperation::Invalid => false,
        _ if op.is_ddl() => allow_ddl,
        _ => true,
    }
}

/// A marker selected for replication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplicableMarker {
    /// Marker tick.
    pub tick: Tick,
    /// Offset in the datafile.
    pub offset: u32,
    /// Operation to ship.
    pub operation: ReplicationOperation,
    /// Database, from the marker or the preceding prologue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_id: Option<DatabaseId>,
    /// Collection, from the marker or the preceding prologue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection_id: Option<CollectionId>,
    /// View of view markers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view_id: Option<ViewId>,
    /// Transaction of document and transaction markers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<TransactionId>,
}

/// Collects the replicable markers with `tick_start <= tick <= tick_end`.
///
/// Markers are in tick order, so the walk stops at the first tick past the
/// window.
pub fn collect_replicable(
    datafile: &mut Datafile,
    tick_start: Tick,
    tick_end: Tick,
    allow_ddl: bool,
) -> Vec<ReplicableMarker> {
    let mut found = Vec::new();
    let mut prologue: Option<(DatabaseId, CollectionId)> = None;

    datafile.iterate(|offset, marker: &MarkerRef<'_>| {
        let Some(kind) = marker.marker_type() else {
            return ControlFlow::Continue(());
        };
        if kind == MarkerType::Prologue {
            prologue = marker.database_id().zip(marker.collection_id());
            return ControlFlow::Continue(());
        }
        if !must_replicate(kind, allow_ddl) {
            return ControlFlow::Continue(());
        }
        let tick = marker.tick();
        if tick > tick_end {
            return ControlFlow::Break(());
        }
        if tick < tick_start {
            return ControlFlow::Continue(());
        }

        let (database_id, collection_id) = if kind.is_data() {
            prologue.map_or((None, None), |(db, col)| (Some(db), Some(col)))
        } else {
            (marker.database_id(), marker.collection_id())
        };
        found.push(ReplicableMarker {
            tick,
            offset,
            operation: translate_type(kind),
            database_id,
            collection_id,
            view_id: marker.view_id(),
            transaction_id: marker.transaction_id(),
        });
        ControlFlow::Continue(())
    });

    debug!(
        datafile = %datafile.name(),
        tick_start,
        tick_end,
        count = found.len(),
        "collected replicable markers"
    );
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::context::EngineContext;
    use crate::marker::{prologue_marker, WalMarker};

    fn write(df: &mut Datafile, bytes: &[u8]) {
        let position = df.reserve_element(bytes.len() as u32, 0).unwrap();
        df.write_element(position, bytes, false).unwrap();
    }

    fn sample() -> Datafile {
        let ctx = EngineContext::with_page_size(StorageConfig::default(), 4096);
        let mut df = Datafile::create(&ctx, None, 1, 4096, true).unwrap();
        let db = DatabaseId::new(3);
        let tid = TransactionId::new(9);
        write(
            &mut df,
            &WalMarker::Collection {
                marker_type: MarkerType::CreateCollection,
                database_id: db,
                collection_id: CollectionId::new(4),
                payload: vec![0xA0],
            }
            .encode(10)
            .unwrap(),
        );
        write(
            &mut df,
            &WalMarker::transaction(MarkerType::BeginTransaction, db, tid)
                .encode(11)
                .unwrap(),
        );
        write(&mut df, &prologue_marker(db, CollectionId::new(4), 12));
        write(
            &mut df,
            &WalMarker::document(tid, vec![0xA0], 1).encode(13).unwrap(),
        );
        write(
            &mut df,
            &WalMarker::transaction(MarkerType::CommitTransaction, db, tid)
                .encode(14)
                .unwrap(),
        );
        df
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(translate_type(MarkerType::Document).code(), 2300);
        assert_eq!(translate_type(MarkerType::Remove).code(), 2302);
        assert_eq!(translate_type(MarkerType::DropDatabase).code(), 1101);
        assert_eq!(translate_type(MarkerType::ChangeView).code(), 2112);
        assert_eq!(translate_type(MarkerType::Footer), ReplicationOperation::Invalid);
    }

    #[test]
    fn ddl_needs_permission() {
        assert!(must_replicate(MarkerType::Document, false));
        assert!(must_replicate(MarkerType::AbortTransaction, false));
        assert!(!must_replicate(MarkerType::CreateIndex, false));
        assert!(must_replicate(MarkerType::CreateIndex, true));
        assert!(!must_replicate(MarkerType::Prologue, true));
        assert!(!must_replicate(MarkerType::Header, true));
    }

    #[test]
    fn collects_window_with_prologue_context() {
        let mut df = sample();

        let all = collect_replicable(&mut df, 0, u64::MAX, true);
        let ops: Vec<_> = all.iter().map(|m| m.operation).collect();
        assert_eq!(
            ops,
            vec![
                ReplicationOperation::CollectionCreate,
                ReplicationOperation::TransactionStart,
                ReplicationOperation::MarkerDocument,
                ReplicationOperation::TransactionCommit,
            ]
        );
        assert_eq!(all[2].collection_id, Some(CollectionId::new(4)));
        assert_eq!(all[2].transaction_id, Some(TransactionId::new(9)));

        let window = collect_replicable(&mut df, 11, 13, false);
        let ticks: Vec<_> = window.iter().map(|m| m.tick).collect();
        assert_eq!(ticks, vec![11, 13]);
    }

    #[test]
    fn serializes_operation_names() {
        let mut df = sample();
        let first = collect_replicable(&mut df, 0, 10, true).remove(0);
        let json = serde_json::to_value(&first).unwrap();
        assert_eq!(json["operation"], "collection_create");
        assert_eq!(json["database_id"], 3);
        assert!(json.get("transaction_id").is_none());
    }
}
