/// Canonical encoding of evidence documents.
///
/// Output is compact JSON (`,` and `:` separators, no whitespace) with keys
/// sorted by byte order and non-ASCII text written as UTF-8, encoded to
/// bytes. Every field in [`EvidenceField::ALL`] is always present.
use serde::Serialize;
use serde_json::Value;

use super::{EvidenceDocument, EvidenceField};
use crate::error::{IntegrityError, Result};

/// Encode `doc` to its canonical byte form.
///
/// Fails with [`IntegrityError::IncompleteDocument`] if a required field
/// is absent or null.
pub fn encode(doc: &EvidenceDocument) -> Result<Vec<u8>> {
    for field in EvidenceField::REQUIRED {
        match doc.get(field) {
            Some(value) if !value.is_null() => {}
            _ => return Err(IntegrityError::IncompleteDocument(field.key())),
        }
    }

    // Insert in sorted key order so the output is sorted whichever map
    // backing serde_json was built with.
    let mut fields = EvidenceField::ALL;
    fields.sort_by_key(|f| f.key());

    let mut map = serde_json::Map::new();
    for field in fields {
        map.insert(field.key().to_string(), doc.value_of(field));
    }

    serde_json::to_vec(&serde_json::Value::Object(map))
        .map_err(|e| IntegrityError::Serialization(format!("canonical encoding failed: {e}")))
}

/// Key-sorted compact JSON for any serializable value, nested objects included.
pub fn to_canonical_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let value = serde_json::to_value(value)
        .map_err(|e| IntegrityError::Serialization(format!("canonical encoding failed: {e}")))?;
    serde_json::to_vec(&sorted(value))
        .map_err(|e| IntegrityError::Serialization(format!("canonical encoding failed: {e}")))
}

fn sorted(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(entries.into_iter().map(|(k, v)| (k, sorted(v))).collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sorted).collect()),
        other => other,
    }
}
