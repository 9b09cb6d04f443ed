//! Flush failures injected below a datafile.

use mmfiles_core::{CoreError, Datafile, DatafileState, WalMarker};
use mmfiles_storage::FileRegion;
use mmfiles_testkit::prelude::*;

fn crashable_datafile(dir: &TestDir, fid: u64) -> (Datafile, std::sync::Arc<CrashSwitch>) {
    let region = FileRegion::create(&dir.datafile_path(fid), 8192).unwrap();
    let (region, switch) = CrashableRegion::new(Box::new(region));
    let df = Datafile::with_region(&test_context(), Box::new(region), fid, true).unwrap();
    (df, switch)
}

#[test]
fn failed_forced_write_poisons_datafile() {
    let dir = TestDir::new();
    let (mut df, switch) = crashable_datafile(&dir, 1);
    assert_eq!(df.path(), Some(dir.datafile_path(1).as_path()));

    append_document(&mut df, "a", 2);
    switch.fail_after(0);

    let mut marker = WalMarker::document(TEST_TRANSACTION, sample_document("b", 3), 3)
        .encode(3)
        .unwrap();
    let position = df.reserve_element(marker.len() as u32, 0).unwrap();
    let err = df.write_crc_element(position, &mut marker, true).unwrap_err();

    assert!(matches!(err, CoreError::FilesystemFull));
    assert_eq!(err.code(), 1104);
    assert_eq!(df.state(), DatafileState::WriteError);
    assert_eq!(switch.failures(), 1);
    assert!(matches!(
        df.reserve_element(16, 0),
        Err(CoreError::IllegalState { .. })
    ));
}

#[test]
fn failed_sync_keeps_synced_position() {
    let dir = TestDir::new();
    let (mut df, switch) = crashable_datafile(&dir, 2);

    append_document(&mut df, "a", 2);
    df.sync().unwrap();
    let synced = df.synced_size();
    assert_eq!(synced, df.current_size());

    append_document(&mut df, "b", 3);
    switch.fail_after(0);
    assert!(matches!(df.sync(), Err(CoreError::FilesystemFull)));
    assert_eq!(df.synced_size(), synced);
    assert_eq!(df.state(), DatafileState::WriteError);
}

#[test]
fn failed_seal_leaves_datafile_unsealed() {
    let dir = TestDir::new();
    let (mut df, switch) = crashable_datafile(&dir, 3);
    append_document(&mut df, "a", 2);
    df.sync().unwrap();
    let synced = df.synced_size();
    append_document(&mut df, "b", 3);

    switch.fail_after(0);
    assert!(df.seal().is_err());
    assert!(!df.is_sealed());
    assert_eq!(df.synced_size(), synced);
    assert!(df.current_size() > synced);
    assert_eq!(df.state(), DatafileState::WriteError);

    switch.disarm();
    assert!(matches!(df.seal(), Err(CoreError::IllegalState { .. })));
}

#[test]
fn unflushed_data_is_still_recoverable_from_page_cache() {
    let dir = TestDir::new();
    let ctx = test_context();
    let (mut df, switch) = crashable_datafile(&dir, 4);
    append_document(&mut df, "a", 2);
    let end = df.current_size();
    switch.fail_after(0);
    drop(df);

    let df = Datafile::open(&ctx, &dir.datafile_path(4), false).unwrap();
    assert_eq!(df.current_size(), end);
    assert_eq!(df.tick_max(), 2);
}
