//! Markers written to the write-ahead log.

use super::header::{aligned_size, write_u64, MarkerMut, MARKER_HEADER_SIZE};
use super::layout::{PROLOGUE_MARKER_SIZE, TRANSACTION_MARKER_SIZE};
use super::types::MarkerType;
use crate::error::{CoreError, CoreResult};
use crate::types::{CollectionId, DatabaseId, Tick, TransactionId, ViewId};

/// A marker staged for the write-ahead log.
///
/// Each kind carries only the fields it needs. [`WalMarker::size`] and
/// [`WalMarker::store`] dispatch on the kind; the tick and checksum are
/// filled in afterwards when the slot is finalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalMarker {
    /// Document insert or removal.
    Crud {
        /// [`MarkerType::Document`] or [`MarkerType::Remove`].
        marker_type: MarkerType,
        /// Owning transaction.
        transaction_id: TransactionId,
        /// CBOR document.
        document: Vec<u8>,
        /// Storage-local document id.
        local_document_id: u64,
    },
    /// Database lifecycle event.
    Database {
        /// [`MarkerType::CreateDatabase`] or [`MarkerType::DropDatabase`].
        marker_type: MarkerType,
        /// Affected database.
        database_id: DatabaseId,
        /// CBOR properties.
        payload: Vec<u8>,
    },
    /// Collection or index lifecycle event.
    Collection {
        /// One of the collection or index marker types.
        marker_type: MarkerType,
        /// Owning database.
        database_id: DatabaseId,
        /// Affected collection.
        collection_id: CollectionId,
        /// CBOR properties.
        payload: Vec<u8>,
    },
    /// View lifecycle event.
    View {
        /// One of the view marker types.
        marker_type: MarkerType,
        /// Owning database.
        database_id: DatabaseId,
        /// Affected view.
        view_id: ViewId,
        /// CBOR properties.
        payload: Vec<u8>,
    },
    /// Transaction boundary.
    Transaction {
        /// Begin, commit or abort.
        marker_type: MarkerType,
        /// Owning database.
        database_id: DatabaseId,
        /// Affected transaction.
        transaction_id: TransactionId,
    },
    /// Switches the database and collection of the following markers.
    Prologue {
        /// Database of the following markers.
        database_id: DatabaseId,
        /// Collection of the following markers.
        collection_id: CollectionId,
    },
}

impl WalMarker {
    /// Creates a document marker.
    #[must_use]
    pub fn document(transaction_id: TransactionId, document: Vec<u8>, local_document_id: u64) -> Self {
        Self::Crud {
            marker_type: MarkerType::Document,
            transaction_id,
            document,
            local_document_id,
        }
    }

    /// Creates a remove marker.
    #[must_use]
    pub fn remove(transaction_id: TransactionId, document: Vec<u8>, local_document_id: u64) -> Self {
        Self::Crud {
            marker_type: MarkerType::Remove,
            transaction_id,
            document,
            local_document_id,
        }
    }

    /// Creates a transaction boundary marker.
    #[must_use]
    pub fn transaction(
        marker_type: MarkerType,
        database_id: DatabaseId,
        transaction_id: TransactionId,
    ) -> Self {
        Self::Transaction {
            marker_type,
            database_id,
            transaction_id,
        }
    }

    /// Returns the marker type this marker is written with.
    #[must_use]
    pub fn marker_type(&self) -> MarkerType {
        match self {
            Self::Crud { marker_type, .. }
            | Self::Database { marker_type, .. }
            | Self::Collection { marker_type, .. }
            | Self::View { marker_type, .. }
            | Self::Transaction { marker_type, .. } => *marker_type,
            Self::Prologue { .. } => MarkerType::Prologue,
        }
    }

    /// Total marker size in bytes, without alignment padding.
    #[must_use]
    pub fn size(&self) -> u32 {
        let size = match self {
            Self::Crud { document, .. } => MARKER_HEADER_SIZE + 8 + document.len() + 8,
            Self::Database { payload, .. } => MARKER_HEADER_SIZE + 8 + payload.len(),
            Self::Collection { payload, .. } | Self::View { payload, .. } => {
                MARKER_HEADER_SIZE + 16 + payload.len()
            }
            Self::Transaction { .. } => TRANSACTION_MARKER_SIZE as usize,
            Self::Prologue { .. } => PROLOGUE_MARKER_SIZE as usize,
        };
        u32::try_from(size).unwrap_or(u32::MAX)
    }

    /// Writes the marker into `buf`, leaving tick and checksum at zero.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IllegalState`] if `buf` is shorter than
    /// [`WalMarker::size`].
    pub fn store(&self, buf: &mut [u8]) -> CoreResult<()> {
        let size = self.size();
        let available = buf.len();
        let buf = buf.get_mut(..size as usize).ok_or_else(|| {
            CoreError::illegal_state(format!(
                "buffer of {available} bytes cannot hold a {size} byte marker"
            ))
        })?;
        buf.fill(0);
        let mut header = MarkerMut::new(buf)
            .ok_or_else(|| CoreError::illegal_state("marker buffer shorter than header"))?;
        header.set_size(size);
        header.set_type_and_tick(self.marker_type().as_u8(), 0);

        let first = MARKER_HEADER_SIZE;
        let second = MARKER_HEADER_SIZE + 8;
        match self {
            Self::Crud {
                transaction_id,
                document,
                local_document_id,
                ..
            } => {
                write_u64(buf, first, transaction_id.as_u64());
                buf[second..second + document.len()].copy_from_slice(document);
                let tail = size as usize - 8;
                write_u64(buf, tail, *local_document_id);
            }
            Self::Database {
                database_id,
                payload,
                ..
            } => {
                write_u64(buf, first, database_id.as_u64());
                buf[second..].copy_from_slice(payload);
            }
            Self::Collection {
                database_id,
                collection_id,
                payload,
                ..
            } => {
                write_u64(buf, first, database_id.as_u64());
                write_u64(buf, second, collection_id.as_u64());
                buf[second + 8..].copy_from_slice(payload);
            }
            Self::View {
                database_id,
                view_id,
                payload,
                ..
            } => {
                write_u64(buf, first, database_id.as_u64());
                write_u64(buf, second, view_id.as_u64());
                buf[second + 8..].copy_from_slice(payload);
            }
            Self::Transaction {
                database_id,
                transaction_id,
                ..
            } => {
                write_u64(buf, first, database_id.as_u64());
                write_u64(buf, second, transaction_id.as_u64());
            }
            Self::Prologue {
                database_id,
                collection_id,
            } => {
                write_u64(buf, first, database_id.as_u64());
                write_u64(buf, second, collection_id.as_u64());
            }
        }
        Ok(())
    }

    /// Encodes the marker into an aligned buffer with tick and checksum set.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`WalMarker::store`].
    pub fn encode(&self, tick: Tick) -> CoreResult<Vec<u8>> {
        let mut buf = vec![0u8; aligned_size(u64::from(self.size())) as usize];
        self.store(&mut buf)?;
        if let Some(mut header) = MarkerMut::new(&mut buf) {
            header.set_tick(tick);
            header.update_crc();
        }
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marker::MarkerRef;

    #[test]
    fn crud_marker_layout() {
        let marker = WalMarker::document(TransactionId(5), vec![0xA0], 900);
        assert_eq!(marker.size(), 16 + 8 + 1 + 8);

        let buf = marker.encode(11).unwrap();
        let view = MarkerRef::new(&buf).unwrap();
        assert!(view.check_crc());
        assert_eq!(view.tick(), 11);
        assert_eq!(view.marker_type(), Some(MarkerType::Document));
        assert_eq!(view.transaction_id(), Some(TransactionId(5)));
        assert_eq!(view.document(), Some(&[0xA0][..]));
        assert_eq!(view.local_document_id(), Some(900));
    }

    #[test]
    fn collection_marker_layout() {
        let marker = WalMarker::Collection {
            marker_type: MarkerType::CreateCollection,
            database_id: DatabaseId(1),
            collection_id: CollectionId(2),
            payload: vec![1, 2, 3],
        };
        let buf = marker.encode(3).unwrap();
        let view = MarkerRef::new(&buf).unwrap();
        assert_eq!(view.size(), 35);
        assert_eq!(buf.len(), 40);
        assert_eq!(view.database_id(), Some(DatabaseId(1)));
        assert_eq!(view.collection_id(), Some(CollectionId(2)));
        assert_eq!(view.payload(), Some(&[1, 2, 3][..]));
    }

    #[test]
    fn view_and_database_markers() {
        let view_marker = WalMarker::View {
            marker_type: MarkerType::DropView,
            database_id: DatabaseId(4),
            view_id: ViewId(8),
            payload: Vec::new(),
        };
        let buf = view_marker.encode(1).unwrap();
        let view = MarkerRef::new(&buf).unwrap();
        assert_eq!(view.view_id(), Some(ViewId(8)));
        assert_eq!(view.collection_id(), None);

        let db_marker = WalMarker::Database {
            marker_type: MarkerType::CreateDatabase,
            database_id: DatabaseId(9),
            payload: vec![7; 5],
        };
        let buf = db_marker.encode(2).unwrap();
        let view = MarkerRef::new(&buf).unwrap();
        assert_eq!(view.database_id(), Some(DatabaseId(9)));
        assert_eq!(view.payload(), Some(&[7; 5][..]));
    }

    #[test]
    fn transaction_marker_is_fixed_size() {
        let marker = WalMarker::transaction(
            MarkerType::CommitTransaction,
            DatabaseId(1),
            TransactionId(77),
        );
        assert_eq!(marker.size(), TRANSACTION_MARKER_SIZE);
        let buf = marker.encode(5).unwrap();
        let view = MarkerRef::new(&buf).unwrap();
        assert_eq!(view.transaction_id(), Some(TransactionId(77)));
        assert_eq!(view.database_id(), Some(DatabaseId(1)));
    }

    #[test]
    fn store_rejects_short_buffer() {
        let marker = WalMarker::Prologue {
            database_id: DatabaseId(1),
            collection_id: CollectionId(1),
        };
        let mut buf = [0u8; 16];
        assert!(matches!(
            marker.store(&mut buf),
            Err(CoreError::IllegalState { .. })
        ));
    }
}
