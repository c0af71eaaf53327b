//! Canonical JSON and sha512 identities.
//!
//! Canonical form: object keys sorted bytewise, no insignificant whitespace.
//! A manifest's id is the sha512 of the canonical form of the document as it
//! is stored, so any change to any layer reference changes the id.

use crate::types::ManifestId;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha512};

pub fn sha512_hex(data: &[u8]) -> String {
    hex::encode(Sha512::digest(data))
}

/// Serialize `value` in canonical form.
pub fn canonical_json(value: &impl Serialize) -> Result<Vec<u8>, serde_json::Error> {
    let value = serde_json::to_value(value)?;
    let mut out = Vec::new();
    write_canonical(&value, &mut out)?;
    Ok(out)
}

fn write_canonical(value: &Value, out: &mut Vec<u8>) -> Result<(), serde_json::Error> {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
            out.push(b'{');
            for (i, (key, val)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                serde_json::to_writer(&mut *out, key)?;
                out.push(b':');
                write_canonical(val, out)?;
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(item, out)?;
            }
            out.push(b']');
        }
        scalar => serde_json::to_writer(&mut *out, scalar)?,
    }
    Ok(())
}

/// Content id of a manifest document.
pub fn manifest_id(document: &impl Serialize) -> Result<ManifestId, serde_json::Error> {
    Ok(ManifestId::new(sha512_hex(&canonical_json(document)?)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_json_sorts_keys_and_strips_whitespace() {
        let v = json!({"b": 1, "a": {"d": [1, 2], "c": "x"}});
        let out = canonical_json(&v).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            r#"{"a":{"c":"x","d":[1,2]},"b":1}"#
        );
    }

    #[test]
    fn key_order_does_not_change_id() {
        let a: Value = serde_json::from_str(r#"{"x": 1, "y": 2}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{ "y": 2,  "x": 1 }"#).unwrap();
        assert_eq!(manifest_id(&a).unwrap(), manifest_id(&b).unwrap());
    }

    #[test]
    fn sha512_hex_is_128_chars() {
        let h = sha512_hex(b"strata");
        assert_eq!(h.len(), 128);
        assert!(crate::is_content_hash(&h));
    }
}
