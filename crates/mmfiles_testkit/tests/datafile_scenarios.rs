//! Datafile lifecycle scenarios: create, seal, reopen, torn writes.

use mmfiles_core::marker::{DatafileHeader, DATAFILE_VERSION, FOOTER_MARKER_SIZE};
use mmfiles_core::{CoreError, Datafile, DatafileState, MarkerRef, MarkerType, WalMarker};
use mmfiles_testkit::prelude::*;

#[test]
fn create_seal_reopen() {
    let dir = TestDir::new();
    let ctx = test_context();
    let path = dir.datafile_path(1);

    let mut df = dir.create_datafile(&ctx, 1, 4096);
    let header = MarkerRef::new(df.data()).unwrap();
    let parsed = DatafileHeader::parse(&header).unwrap();
    assert_eq!(parsed.version, DATAFILE_VERSION);
    assert_eq!(parsed.maximal_size, 4096);
    assert_eq!(parsed.fid, 1);

    // header, transaction id and local document id around 18 bytes of document
    let marker = WalMarker::document(TEST_TRANSACTION, vec![0x41; 18], 9);
    assert_eq!(marker.size(), 50);
    append_marker(&mut df, &marker, 5);

    df.seal().unwrap();
    assert!(df.is_sealed());
    assert_eq!(df.maximal_size(), df.current_size());
    let footer_at = (df.current_size() - FOOTER_MARKER_SIZE) as usize;
    let footer = MarkerRef::new(&df.data()[footer_at..]).unwrap();
    assert_eq!(footer.marker_type(), Some(MarkerType::Footer));
    assert!(footer.check_crc());
    let sealed_size = df.current_size();
    drop(df);

    let mut reopened = Datafile::open(&ctx, &path, false).unwrap();
    assert!(reopened.is_sealed());
    assert_eq!(reopened.state(), DatafileState::Read);
    assert_eq!(reopened.current_size(), sealed_size);
    assert_eq!(reopened.tick_min(), 5);
    assert!(matches!(reopened.reserve_element(16, 0), Err(CoreError::ReadOnly)));
}

#[test]
fn second_seal_keeps_footer() {
    let ctx = test_context();
    let dir = TestDir::new();
    let mut df = dir.create_datafile(&ctx, 2, 4096);
    append_document(&mut df, "a", 3);
    df.seal().unwrap();
    let image = df.data().to_vec();

    assert!(matches!(df.seal(), Err(CoreError::DatafileSealed)));
    assert_eq!(df.data(), image.as_slice());
    let footer = [0u8; 16];
    assert!(matches!(
        df.write_element(df.current_size(), &footer, false),
        Err(CoreError::IllegalState { .. }) | Err(CoreError::ReadOnly)
    ));
}

#[test]
fn unsealed_datafile_reopens_writable() {
    let ctx = test_context();
    let dir = TestDir::new();
    let mut df = dir.create_datafile(&ctx, 3, 8192);
    let second = {
        append_document(&mut df, "a", 3);
        append_document(&mut df, "b", 4)
    };
    let end = df.current_size();
    drop(df);

    let mut df = Datafile::open(&ctx, &dir.datafile_path(3), false).unwrap();
    assert!(!df.is_sealed());
    assert_eq!(df.state(), DatafileState::Write);
    assert_eq!(df.current_size(), end);
    assert_eq!(df.tick_max(), 4);
    assert!(ctx.ticks().current() >= 4);

    let third = append_document(&mut df, "c", 5);
    assert!(third > second);
    df.seal().unwrap();
}

#[test]
fn torn_write_recovery() {
    let ctx = test_context();
    let dir = TestDir::new();
    let path = dir.datafile_path(4);

    let mut df = dir.create_datafile(&ctx, 4, 8192);
    for (i, key) in ["a", "b", "c"].iter().enumerate() {
        append_document(&mut df, key, 10 + i as u64);
    }
    let end_of_third = df.current_size();
    drop(df);

    let fourth = WalMarker::document(TEST_TRANSACTION, sample_document("d", 13), 13)
        .encode(13)
        .unwrap();
    write_torn_marker(&path, u64::from(end_of_third), &fourth, 20);

    let mut df = Datafile::open(&ctx, &path, true).unwrap();
    assert_eq!(df.current_size(), end_of_third);
    assert!(df.is_sealed());
    assert_eq!(df.tick_max(), 12);
    assert!(df.check(false));
}

#[test]
fn corrupted_final_marker_converges() {
    let ctx = test_context();
    let dir = TestDir::new();
    let path = dir.datafile_path(5);

    let mut df = dir.create_datafile(&ctx, 5, 8192);
    append_document(&mut df, "a", 1);
    let last = append_document(&mut df, "b", 2);
    drop(df);
    corrupt_byte(&path, u64::from(last) + 30);

    let mut df = Datafile::open(&ctx, &path, true).unwrap();
    assert_eq!(df.current_size(), last);
    assert!(df.check(false));
    assert_eq!(df.markers().count(), 2);
}

#[test]
fn mid_file_corruption_is_refused() {
    let ctx = test_context();
    let dir = TestDir::new();
    let path = dir.datafile_path(6);

    let mut df = dir.create_datafile(&ctx, 6, 8192);
    let first = append_document(&mut df, "a", 1);
    append_document(&mut df, "b", 2);
    drop(df);
    corrupt_byte(&path, u64::from(first) + 30);

    let err = Datafile::open(&ctx, &path, false).unwrap_err();
    match err {
        CoreError::CorruptedDatafile { position, .. } => assert_eq!(position, u64::from(first)),
        other => panic!("unexpected error {other}"),
    }
}
