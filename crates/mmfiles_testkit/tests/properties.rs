//! Property tests over generated markers and datafiles.

use mmfiles_core::marker::{aligned_size, FOOTER_MARKER_SIZE};
use mmfiles_core::{CoreError, Datafile, MarkerRef};
use mmfiles_testkit::prelude::*;
use proptest::prelude::*;

fn anonymous(size: u32) -> Datafile {
    Datafile::create(&test_context(), None, 1, size, true).unwrap()
}

proptest! {
    #[test]
    fn encoded_markers_verify(marker in wal_marker_strategy(), tick in tick_strategy()) {
        let bytes = marker.encode(tick).unwrap();
        prop_assert_eq!(bytes.len() as u64, aligned_size(u64::from(marker.size())));

        let view = MarkerRef::new(&bytes).unwrap();
        prop_assert!(view.check_crc());
        prop_assert_eq!(view.size(), marker.size());
        prop_assert_eq!(view.tick(), tick);
        prop_assert_eq!(view.marker_type(), Some(marker.marker_type()));
    }

    #[test]
    fn tick_range_follows_writes(ticks in increasing_ticks(8)) {
        let mut df = anonymous(16 * 1024);
        for tick in &ticks {
            append_document(&mut df, "k", *tick);
        }
        prop_assert_eq!(df.tick_min(), ticks[0]);
        prop_assert_eq!(df.tick_max(), ticks[7]);

        df.seal().unwrap();
        prop_assert_eq!(df.tick_min(), ticks[0]);
        prop_assert_eq!(df.tick_max(), ticks[7]);
    }

    #[test]
    fn full_datafile_never_moves_cursor(sizes in prop::collection::vec(16u32..600, 1..64)) {
        let mut df = anonymous(4096);
        for size in sizes {
            let before = df.current_size();
            let aligned = aligned_size(u64::from(size));
            let room = u64::from(df.maximal_size() - before - FOOTER_MARKER_SIZE);
            match df.reserve_element(size, 0) {
                Ok(position) => {
                    prop_assert!(aligned <= room);
                    prop_assert_eq!(position, before);
                    prop_assert_eq!(u64::from(df.current_size()), u64::from(before) + aligned);
                }
                Err(CoreError::DatafileFull) => {
                    prop_assert!(aligned > room);
                    prop_assert_eq!(df.current_size(), before);
                    prop_assert!(df.is_full());
                }
                Err(other) => prop_assert!(false, "unexpected error {}", other),
            }
        }
    }

    #[test]
    fn generated_documents_keep_key(doc in document_strategy()) {
        let key = mmfiles_core::marker::document_key(&doc);
        prop_assert!(key.is_some_and(|k| !k.is_empty()));
    }
}
