//! Test fixtures and datafile helpers.
//!
//! Provides convenience functions for setting up contexts, datafiles and
//! WAL logfiles in temporary directories.

use ciborium::Value;
use mmfiles_core::marker::encode_document;
use mmfiles_core::{
    Datafile, EngineContext, StorageConfig, TransactionId, WalLogfile, WalMarker, WalSlot,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Page size used by test contexts, so sizes do not depend on the host.
pub const TEST_PAGE_SIZE: usize = 4096;

/// Transaction id used by [`append_document`].
pub const TEST_TRANSACTION: TransactionId = TransactionId::new(1);

/// A context with default settings and a fixed page size.
pub fn test_context() -> EngineContext {
    test_context_with(StorageConfig::default())
}

/// A context with the given settings and a fixed page size.
pub fn test_context_with(config: StorageConfig) -> EngineContext {
    EngineContext::with_page_size(config, TEST_PAGE_SIZE)
}

/// A temporary directory removed on drop.
pub struct TestDir {
    dir: TempDir,
}

impl TestDir {
    /// Creates a new temporary directory.
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Directory path.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Path of datafile `fid`.
    pub fn datafile_path(&self, fid: u64) -> PathBuf {
        self.dir.path().join(format!("datafile-{fid}.db"))
    }

    /// Path of WAL logfile `id`.
    pub fn logfile_path(&self, id: u64) -> PathBuf {
        self.dir.path().join(format!("logfile-{id}.db"))
    }

    /// Creates a physical datafile with a header marker.
    pub fn create_datafile(&self, ctx: &EngineContext, fid: u64, size: u32) -> Datafile {
        Datafile::create(ctx, Some(&self.datafile_path(fid)), fid, size, true)
            .expect("Failed to create datafile")
    }

    /// Creates an OPEN WAL logfile.
    pub fn create_logfile(&self, ctx: &EngineContext, id: u64, size: u32) -> Arc<WalLogfile> {
        let logfile = WalLogfile::create_new(ctx, &self.logfile_path(id), id, size)
            .expect("Failed to create logfile");
        logfile.write_header().expect("Failed to write logfile header");
        logfile
    }
}

impl Default for TestDir {
    fn default() -> Self {
        Self::new()
    }
}

/// Encodes `{_key, _rev}` as a CBOR document.
pub fn sample_document(key: &str, rev: u64) -> Vec<u8> {
    encode_document([
        ("_key", Value::Text(key.to_string())),
        ("_rev", Value::Integer(rev.into())),
    ])
    .expect("Failed to encode document")
}

/// Appends a checksummed document marker and returns its position.
pub fn append_document(datafile: &mut Datafile, key: &str, tick: u64) -> u32 {
    let marker = WalMarker::document(TEST_TRANSACTION, sample_document(key, tick), tick);
    append_marker(datafile, &marker, tick)
}

/// Appends any marker with the given tick and returns its position.
pub fn append_marker(datafile: &mut Datafile, marker: &WalMarker, tick: u64) -> u32 {
    let mut bytes = marker.encode(tick).expect("Failed to encode marker");
    let position = datafile
        .reserve_journal_element(bytes.len() as u32)
        .expect("Failed to reserve space");
    datafile
        .write_crc_element(position, &mut bytes, false)
        .expect("Failed to write marker");
    position
}

/// Writes a marker through a WAL slot with a fresh tick.
pub fn append_to_logfile(logfile: &Arc<WalLogfile>, marker: &WalMarker) -> u64 {
    let mut slot = WalSlot::reserve(logfile, marker).expect("Failed to reserve slot");
    slot.fill(marker).expect("Failed to fill slot");
    slot.tick()
}
