//! Write-ahead log built on top of datafiles.
//!
//! A WAL logfile is a [`Datafile`](crate::Datafile) created without initial
//! markers plus a status that follows the collection lifecycle:
//!
//! ```text
//! EMPTY -> OPEN -> SEAL_REQUESTED -> SEALED -> COLLECTION_REQUESTED -> COLLECTED
//! ```
//!
//! Writers reserve a [`WalSlot`] in the current logfile, fill it with a
//! [`WalMarker`](crate::WalMarker) and finalize it with a fresh tick.
//!
//! ## Recovery
//!
//! Recovery runs in two passes over every logfile that is still OPEN or
//! SEALED, oldest first:
//!
//! 1. [`RecoverState::initial_scan_marker`] records transaction outcomes and
//!    dropped databases, collections and views
//! 2. [`RecoverState::replay_marker`] forwards the surviving operations to a
//!    [`ReplayTarget`]
//!
//! A drop late in the log suppresses earlier markers of the same object, so
//! the whole log has to be seen before anything is replayed.
//! [`WalDirectory`] drives both passes over a directory of logfiles.

mod directory;
mod logfile;
mod recovery;
mod slot;

pub use directory::WalDirectory;
pub use logfile::{LogfileId, LogfileStatus, WalLogfile};
pub use recovery::{RecoverState, ReplayOperation, ReplayTarget};
pub use slot::{SlotStatus, WalSlot};
