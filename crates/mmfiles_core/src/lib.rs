//! # mmfiles core
//!
//! Datafiles, markers and the write-ahead log of a memory-mapped document
//! store.
//!
//! This crate provides:
//! - The marker binary format (header, checksum, per-kind layouts)
//! - Datafiles: creation, append-only writing, sealing, integrity checks,
//!   scanning and repair
//! - WAL logfiles, write slots and the two-pass recovery state
//! - A WAL directory driving inventory and recovery
//! - Replication classification of markers and per-collection ditch queues
//!
//! ## Example
//!
//! ```rust
//! use mmfiles_core::{Datafile, EngineContext, TransactionId, WalMarker};
//!
//! let ctx = EngineContext::default();
//! let mut datafile = Datafile::create(&ctx, None, 1, 64 * 1024, true).unwrap();
//!
//! let marker = WalMarker::document(TransactionId::new(7), vec![0xA0], 1)
//!     .encode(ctx.ticks().next())
//!     .unwrap();
//! let position = datafile.reserve_element(marker.len() as u32, 0).unwrap();
//! datafile.write_element(position, &marker, false).unwrap();
//!
//! datafile.seal().unwrap();
//! assert!(datafile.is_sealed());
//! assert_eq!(datafile.markers().count(), 3);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
mod context;
pub mod datafile;
pub mod diag;
pub mod ditch;
mod error;
pub mod marker;
pub mod replication;
mod tick;
mod types;
pub mod wal;

pub use config::{
    StorageConfig, DEFAULT_JOURNAL_SIZE, DEFAULT_LOGFILE_SIZE, DEFAULT_MAX_MARKER_SIZE,
};
pub use context::EngineContext;
pub use datafile::{
    fid_from_path, CursorStop, Datafile, DatafileScan, DatafileScanEntry, DatafileState,
    Judgement, MarkerCursor, ScanEntryStatus, ScanStatus, TickRange,
};
pub use ditch::{Ditch, DitchId, DitchKind, DitchQueue};
pub use error::{CoreError, CoreResult};
pub use marker::{MarkerMut, MarkerRef, MarkerType, WalMarker};
pub use replication::{
    collect_replicable, must_replicate, translate_type, ReplicableMarker, ReplicationOperation,
};
pub use tick::TickClock;
pub use types::{CollectionId, DatabaseId, Fid, Tick, TransactionId, ViewId, TICK_MASK};
pub use wal::{
    LogfileId, LogfileStatus, RecoverState, ReplayOperation, ReplayTarget, SlotStatus,
    WalDirectory, WalLogfile, WalSlot,
};
