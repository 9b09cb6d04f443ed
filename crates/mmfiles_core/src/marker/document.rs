//! CBOR document payloads of document and remove markers.

use crate::error::{CoreError, CoreResult};
use ciborium::Value;

/// Attribute holding the primary key.
const KEY_ATTRIBUTE: &str = "_key";

/// Attribute holding the revision.
const REV_ATTRIBUTE: &str = "_rev";

/// Encodes a document as a CBOR map with text keys.
///
/// # Errors
///
/// Returns [`CoreError::Codec`] if serialization fails.
pub fn encode_document<'a, I>(fields: I) -> CoreResult<Vec<u8>>
where
    I: IntoIterator<Item = (&'a str, Value)>,
{
    let map = Value::Map(
        fields
            .into_iter()
            .map(|(k, v)| (Value::Text(k.to_string()), v))
            .collect(),
    );
    let mut buf = Vec::new();
    ciborium::into_writer(&map, &mut buf).map_err(|e| CoreError::Codec {
        message: e.to_string(),
    })?;
    Ok(buf)
}

fn attribute(document: &[u8], name: &str) -> Option<Value> {
    let Value::Map(entries) = ciborium::from_reader::<Value, _>(document).ok()? else {
        return None;
    };
    entries
        .into_iter()
        .find(|(k, _)| matches!(k, Value::Text(t) if t == name))
        .map(|(_, v)| v)
}

/// Extracts the `_key` attribute of a CBOR document.
#[must_use]
pub fn document_key(document: &[u8]) -> Option<String> {
    match attribute(document, KEY_ATTRIBUTE)? {
        Value::Text(key) => Some(key),
        _ => None,
    }
}

/// Extracts the `_rev` attribute, stored either as integer or decimal text.
#[must_use]
pub fn document_revision(document: &[u8]) -> Option<u64> {
    match attribute(document, REV_ATTRIBUTE)? {
        Value::Integer(rev) => u64::try_from(rev).ok(),
        Value::Text(rev) => rev.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_and_revision() {
        let doc = encode_document([
            ("_key", Value::Text("alice".into())),
            ("_rev", Value::Integer(42.into())),
            ("age", Value::Integer(31.into())),
        ])
        .unwrap();

        assert_eq!(document_key(&doc).as_deref(), Some("alice"));
        assert_eq!(document_revision(&doc), Some(42));
    }

    #[test]
    fn textual_revision() {
        let doc = encode_document([("_rev", Value::Text("1234".into()))]).unwrap();
        assert_eq!(document_revision(&doc), Some(1234));
        assert_eq!(document_key(&doc), None);
    }

    #[test]
    fn garbage_yields_nothing() {
        assert_eq!(document_key(&[0xFF, 0x00, 0x13]), None);
        assert_eq!(document_key(&[]), None);
    }
}
