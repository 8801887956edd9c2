//! Record fingerprinting
//!
//! Ported from the reference Python implementation's
//! `utils.fingerprint_payload`/`utils.compute_hash`. `ring::digest` is
//! reused for the single SHA-256 call rather than adding a dedicated
//! hashing crate (see `DESIGN.md`).

use ring::digest;
use serde_json::Value;

/// Build the canonical string hashed into a fingerprint: either the full
/// record, or only the values at `keys`, each serialized with sorted keys.
pub(crate) fn fingerprint_payload(record: &Value, keys: Option<&[String]>, source: &str) -> String {
    let subset = match keys {
        None => record.clone(),
        Some(keys) => {
            let mut map = serde_json::Map::new();
            for key in keys {
                if let Some(value) = record.get(key) {
                    map.insert(key.clone(), value.clone());
                }
            }
            Value::Object(map)
        }
    };

    let canonical = canonical_json(&subset);
    format!("{source}:{canonical}")
}

/// Serialize with recursively sorted object keys, matching Python's
/// `json.dumps(..., sort_keys=True)`.
fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            let body = entries
                .into_iter()
                .map(|(k, v)| format!("{}: {}", serde_json::to_string(k).unwrap_or_default(), canonical_json(v)))
                .collect::<Vec<_>>()
                .join(", ");
            format!("{{{body}}}")
        }
        Value::Array(items) => {
            let body = items.iter().map(canonical_json).collect::<Vec<_>>().join(", ");
            format!("[{body}]")
        }
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

/// SHA-256 hex digest of `payload`.
pub(crate) fn compute_hash(payload: &str) -> String {
    let digest = digest::digest(&digest::SHA256, payload.as_bytes());
    digest
        .as_ref()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn identical_logical_inputs_hash_identically_regardless_of_key_order() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        let ha = compute_hash(&fingerprint_payload(&a, None, "src"));
        let hb = compute_hash(&fingerprint_payload(&b, None, "src"));
        assert_eq!(ha, hb);
    }

    #[test]
    fn keys_mode_only_considers_listed_fields() {
        let a = json!({"id": 1, "noise": "x"});
        let b = json!({"id": 1, "noise": "y"});
        let keys = vec!["id".to_owned()];
        let ha = compute_hash(&fingerprint_payload(&a, Some(&keys), "src"));
        let hb = compute_hash(&fingerprint_payload(&b, Some(&keys), "src"));
        assert_eq!(ha, hb);
    }

    #[test]
    fn different_sources_hash_differently() {
        let a = json!({"id": 1});
        let ha = compute_hash(&fingerprint_payload(&a, None, "src-a"));
        let hb = compute_hash(&fingerprint_payload(&a, None, "src-b"));
        assert_ne!(ha, hb);
    }
}
