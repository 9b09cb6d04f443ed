//! Static entry points used by the CLI: judge, scan, repair, truncate.

use mmfiles_core::{
    CoreError, Datafile, Judgement, MarkerType, ScanEntryStatus, ScanStatus,
};
use mmfiles_testkit::prelude::*;
use std::fs;

#[test]
fn judge_classifies_files() {
    let dir = TestDir::new();
    let empty = dir.path().join("empty.db");
    let short = dir.path().join("short.db");
    let zeros = dir.path().join("zeros.db");
    fs::write(&empty, b"").unwrap();
    fs::write(&short, vec![1u8; 100]).unwrap();
    fs::write(&zeros, vec![0u8; 4096]).unwrap();

    let ctx = test_context();
    drop(dir.create_datafile(&ctx, 1, 4096));

    assert_eq!(Datafile::judge(&empty), Judgement::Empty);
    assert_eq!(Datafile::judge(&short), Judgement::Unreadable);
    assert_eq!(Datafile::judge(&zeros), Judgement::Empty);
    assert_eq!(Datafile::judge(&dir.datafile_path(1)), Judgement::Ok);
    assert_eq!(Datafile::judge(&dir.path().join("missing.db")), Judgement::Unreadable);

    assert!(matches!(
        Judgement::Empty.into_result(&empty),
        Err(CoreError::DatafileEmpty { .. })
    ));
}

#[test]
fn scan_reports_sealed_file() {
    let dir = TestDir::new();
    let ctx = test_context();
    let mut df = dir.create_datafile(&ctx, 1, 4096);
    append_document(&mut df, "alpha", 3);
    append_document(&mut df, "beta", 4);
    df.seal().unwrap();
    drop(df);

    let report = Datafile::scan(&ctx, &dir.datafile_path(1));
    assert_eq!(report.status, ScanStatus::Clean);
    assert!(report.is_sealed);
    assert_eq!(report.number_markers, 4);
    assert_eq!(report.entries[1].key.as_deref(), Some("alpha"));
    assert_eq!(report.entries[3].type_id, MarkerType::Footer.as_u8());

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["status"], "clean");
    assert_eq!(json["entries"][2]["key"], "beta");
}

#[test]
fn scan_stops_at_crc_failure() {
    let dir = TestDir::new();
    let ctx = test_context();
    let mut df = dir.create_datafile(&ctx, 1, 4096);
    let bad = append_document(&mut df, "alpha", 3);
    append_document(&mut df, "beta", 4);
    drop(df);
    corrupt_byte(&dir.datafile_path(1), u64::from(bad) + 30);

    let report = Datafile::scan(&ctx, &dir.datafile_path(1));
    assert_eq!(report.status, ScanStatus::CrcFailure);
    let last = report.entries.last().unwrap();
    assert_eq!(last.position, bad);
    assert_eq!(last.status, ScanEntryStatus::CrcFailed);
    assert!(last.diagnosis.is_some());
}

#[test]
fn scan_of_missing_file() {
    let dir = TestDir::new();
    let report = Datafile::scan(&test_context(), &dir.datafile_path(99));
    assert_eq!(report.status, ScanStatus::OpenFailed);
}

#[test]
fn repair_blanks_isolated_corruption() {
    let dir = TestDir::new();
    let ctx = test_context();
    let path = dir.datafile_path(1);
    let mut df = dir.create_datafile(&ctx, 1, 4096);
    let bad = append_document(&mut df, "alpha", 3);
    append_document(&mut df, "beta", 4);
    drop(df);
    corrupt_byte(&path, u64::from(bad) + 30);

    assert!(Datafile::try_repair(&ctx, &path).unwrap());

    let df = Datafile::open(&ctx, &path, false).unwrap();
    let kinds: Vec<_> = df.markers().map(|(_, m)| m.marker_type()).collect();
    assert_eq!(
        kinds,
        vec![
            Some(MarkerType::Header),
            Some(MarkerType::Blank),
            Some(MarkerType::Document),
        ]
    );
}

#[test]
fn truncate_keeps_backup() {
    let dir = TestDir::new();
    let ctx = test_context();
    let path = dir.datafile_path(1);
    let mut df = dir.create_datafile(&ctx, 1, 8192);
    append_document(&mut df, "alpha", 3);
    let cut = append_document(&mut df, "beta", 4);
    append_document(&mut df, "gamma", 5);
    drop(df);

    Datafile::truncate(&ctx, &path, cut).unwrap();

    assert!(dir.path().join("datafile-1.db.corrupted").exists());
    let df = Datafile::open(&ctx, &path, false).unwrap();
    assert!(df.is_sealed());
    assert_eq!(df.markers().count(), 3);
    assert_eq!(df.tick_max(), 3);
    assert_eq!(fs::metadata(&path).unwrap().len(), 4096);

    assert!(Datafile::truncate(&ctx, &path, 8).is_err());
}
