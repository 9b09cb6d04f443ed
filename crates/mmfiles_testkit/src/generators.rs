//! Property-based test generators using proptest.
//!
//! Provides strategies for ticks, marker types, documents and WAL markers
//! that respect the format's limits.

use ciborium::Value;
use mmfiles_core::marker::encode_document;
use mmfiles_core::{CollectionId, DatabaseId, MarkerType, TransactionId, ViewId, WalMarker, TICK_MASK};
use proptest::prelude::*;

/// Strategy for valid, non-zero ticks.
pub fn tick_strategy() -> impl Strategy<Value = u64> {
    1..=TICK_MASK
}

/// Strategy for `len` strictly increasing ticks.
pub fn increasing_ticks(len: usize) -> impl Strategy<Value = Vec<u64>> {
    prop::collection::btree_set(1u64..1_000_000, len).prop_map(|set| set.into_iter().collect())
}

/// Strategy for every known marker type.
pub fn marker_type_strategy() -> impl Strategy<Value = MarkerType> {
    (0u8..=255).prop_filter_map("unknown marker type", MarkerType::from_u8)
}

/// Strategy for document keys.
pub fn key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9_-]{1,32}").expect("Invalid regex")
}

/// Strategy for CBOR documents with `_key`, `_rev` and a few extra fields.
pub fn document_strategy() -> impl Strategy<Value = Vec<u8>> {
    (
        key_strategy(),
        any::<u32>(),
        prop::collection::vec(("[a-z]{1,8}", any::<i32>()), 0..4),
    )
        .prop_map(|(key, rev, extra)| {
            let mut fields = vec![
                ("_key".to_string(), Value::Text(key)),
                ("_rev".to_string(), Value::Integer(rev.into())),
            ];
            fields.extend(
                extra
                    .into_iter()
                    .map(|(name, value)| (format!("x_{name}"), Value::Integer(value.into()))),
            );
            encode_document(fields.iter().map(|(k, v)| (k.as_str(), v.clone())))
                .expect("Failed to encode document")
        })
}

fn payload_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..64)
}

/// Strategy for WAL markers of every kind.
pub fn wal_marker_strategy() -> impl Strategy<Value = WalMarker> {
    let id = 1u64..1000;
    prop_oneof![
        (id.clone(), document_strategy(), any::<u64>()).prop_map(|(tid, doc, local)| {
            WalMarker::document(TransactionId::new(tid), doc, local)
        }),
        (id.clone(), document_strategy(), any::<u64>()).prop_map(|(tid, doc, local)| {
            WalMarker::remove(TransactionId::new(tid), doc, local)
        }),
        (
            prop_oneof![
                Just(MarkerType::BeginTransaction),
                Just(MarkerType::CommitTransaction),
                Just(MarkerType::AbortTransaction),
            ],
            id.clone(),
            id.clone()
        )
            .prop_map(|(kind, db, tid)| {
                WalMarker::transaction(kind, DatabaseId::new(db), TransactionId::new(tid))
            }),
        (
            prop_oneof![Just(MarkerType::CreateDatabase), Just(MarkerType::DropDatabase)],
            id.clone(),
            payload_strategy()
        )
            .prop_map(|(marker_type, db, payload)| WalMarker::Database {
                marker_type,
                database_id: DatabaseId::new(db),
                payload,
            }),
        (
            prop_oneof![
                Just(MarkerType::CreateCollection),
                Just(MarkerType::DropCollection),
                Just(MarkerType::RenameCollection),
                Just(MarkerType::ChangeCollection),
                Just(MarkerType::CreateIndex),
                Just(MarkerType::DropIndex),
            ],
            id.clone(),
            id.clone(),
            payload_strategy()
        )
            .prop_map(|(marker_type, db, cid, payload)| WalMarker::Collection {
                marker_type,
                database_id: DatabaseId::new(db),
                collection_id: CollectionId::new(cid),
                payload,
            }),
        (
            prop_oneof![
                Just(MarkerType::CreateView),
                Just(MarkerType::DropView),
                Just(MarkerType::ChangeView),
            ],
            id.clone(),
            id,
            payload_strategy()
        )
            .prop_map(|(marker_type, db, vid, payload)| WalMarker::View {
                marker_type,
                database_id: DatabaseId::new(db),
                view_id: ViewId::new(vid),
                payload,
            }),
    ]
}
