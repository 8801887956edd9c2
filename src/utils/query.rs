//! Query string construction
//!
//! Ported from the reference Python implementation's
//! `utils.build_query_string`. A param whose value carries the
//! `{noEncodeValue: v}` shape is emitted as a raw, un-encoded `k=v` segment;
//! everything else is percent-encoded.

use serde_json::Value;

pub(crate) fn build_query_string(params: &[(String, Value)]) -> String {
    params
        .iter()
        .map(|(key, value)| build_segment(key, value))
        .collect::<Vec<_>>()
        .join("&")
}

fn build_segment(key: &str, value: &Value) -> String {
    if let Some(raw) = no_encode_value(value) {
        return format!("{key}={raw}");
    }
    format!("{}={}", percent_encode(key), percent_encode(&value_to_string(value)))
}

/// Minimal `application/x-www-form-urlencoded` percent-encoding: unreserved
/// characters pass through, spaces become `+`, everything else is `%XX`.
fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            b' ' => out.push('+'),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

fn no_encode_value(value: &Value) -> Option<String> {
    value
        .as_object()
        .and_then(|obj| obj.get("noEncodeValue"))
        .map(value_to_string)
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn encodes_normal_params() {
        let params = vec![("q".to_owned(), json!("a b"))];
        assert_eq!(build_query_string(&params), "q=a+b");
    }

    #[test]
    fn passes_through_no_encode_value_raw() {
        let params = vec![("range".to_owned(), json!({"noEncodeValue": "1:5"}))];
        assert_eq!(build_query_string(&params), "range=1:5");
    }

    #[test]
    fn joins_multiple_segments_with_ampersand() {
        let params = vec![("a".to_owned(), json!("1")), ("b".to_owned(), json!("2"))];
        assert_eq!(build_query_string(&params), "a=1&b=2");
    }
}
