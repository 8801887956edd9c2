//! Declarative dot-path navigation over decoded JSON
//!
//! Ported from the reference Python implementation's `utils.split_key`,
//! `utils.lookup_path`, and `utils._parse_data_path`/`extract_records`. A
//! literal dot inside a segment is written `/.`; a leading `$root.` redirects
//! lookup to the original top-level payload instead of the current record.

use serde_json::Value;

const ROOT_SENTINEL: &str = "$root.";

/// Error raised when a payload's shape doesn't match a configured path.
#[derive(Debug, thiserror::Error)]
#[error("shape mismatch at {path:?}: {snippet}")]
pub(crate) struct ShapeMismatch {
    pub(crate) path: String,
    pub(crate) snippet: String,
}

fn snippet(value: &Value) -> String {
    let s = value.to_string();
    if s.len() > 200 {
        format!("{}...", &s[..200])
    } else {
        s
    }
}

/// Split a dot-path into segments, honoring the `/.` literal-dot escape.
pub(crate) fn split_key(path: &str) -> Vec<String> {
    let placeholder = "\u{0}DOT\u{0}";
    let escaped = path.replace("/.", placeholder);
    escaped
        .split('.')
        .map(|seg| seg.replace(placeholder, "."))
        .collect()
}

/// Look up `path` against `record`, redirecting to `root` for any segment
/// chain beginning with `$root.`.
pub(crate) fn lookup_path<'a>(
    record: &'a Value,
    root: &'a Value,
    path: &str,
) -> Result<Option<&'a Value>, ShapeMismatch> {
    if let Some(rest) = path.strip_prefix(ROOT_SENTINEL) {
        if !root.is_object() {
            return Err(ShapeMismatch {
                path: path.to_owned(),
                snippet: snippet(root),
            });
        }
        return Ok(lookup_segments(root, &split_key(rest)));
    }

    Ok(lookup_segments(record, &split_key(path)))
}

fn lookup_segments<'a>(value: &'a Value, segments: &[String]) -> Option<&'a Value> {
    let mut current = value;
    for segment in segments {
        current = current.as_object()?.get(segment.as_str())?;
    }
    Some(current)
}

enum Selector {
    All,
    Index(i64),
    Slice(Option<i64>, Option<i64>),
}

fn parse_segment(segment: &str) -> (String, Option<Selector>) {
    let Some(open) = segment.find('[') else {
        return (segment.to_owned(), None);
    };
    if !segment.ends_with(']') {
        return (segment.to_owned(), None);
    }
    let name = segment[..open].to_owned();
    let inner = &segment[open + 1..segment.len() - 1];

    if inner.is_empty() {
        return (name, Some(Selector::All));
    }

    if let Some((start, end)) = inner.split_once(':') {
        let start = if start.is_empty() { None } else { start.parse().ok() };
        let end = if end.is_empty() { None } else { end.parse().ok() };
        return (name, Some(Selector::Slice(start, end)));
    }

    match inner.parse::<i64>() {
        Ok(idx) => (name, Some(Selector::Index(idx))),
        Err(_) => (name, None),
    }
}

fn apply_selector(
    list: &[Value],
    selector: &Selector,
    path: &str,
) -> Result<Vec<Value>, ShapeMismatch> {
    match selector {
        Selector::All => Ok(list.to_vec()),
        Selector::Index(idx) => {
            let len = list.len() as i64;
            let real = if *idx < 0 { len + idx } else { *idx };
            if real < 0 || real >= len {
                return Err(ShapeMismatch {
                    path: path.to_owned(),
                    snippet: format!("index {idx} out of bounds for length {len}"),
                });
            }
            Ok(vec![list[real as usize].clone()])
        }
        Selector::Slice(start, end) => {
            let len = list.len() as i64;
            let norm = |v: Option<i64>, default: i64| -> usize {
                let raw = v.unwrap_or(default);
                let raw = if raw < 0 { (len + raw).max(0) } else { raw.min(len) };
                raw as usize
            };
            let s = norm(*start, 0);
            let e = norm(*end, len);
            if s >= e {
                return Ok(Vec::new());
            }
            Ok(list[s..e].to_vec())
        }
    }
}

/// Extract a list of object records from `payload` using `data_key`.
///
/// Empty `data_key` requires `payload` to already be a list. Otherwise the
/// key is parsed into `name` / `name[selector]` segments; the final
/// collected value(s) must be an object (wrapped into a one-element list) or
/// a list of objects.
pub(crate) fn extract_records(
    payload: &Value,
    data_key: &str,
) -> Result<Vec<Value>, ShapeMismatch> {
    if data_key.is_empty() {
        return match payload.as_array() {
            Some(arr) => Ok(arr.clone()),
            None => Err(ShapeMismatch {
                path: String::new(),
                snippet: snippet(payload),
            }),
        };
    }

    let mut current: Vec<Value> = vec![payload.clone()];

    for raw_segment in split_key(data_key) {
        let (name, selector) = parse_segment(&raw_segment);
        let mut next = Vec::new();

        for item in &current {
            // A non-object item or a missing key yields no value for this
            // branch and is silently dropped, matching the reference
            // implementation's `val = item.get(name)` / `if val is None:
            // continue`; only a `[...]` selector against a non-list value,
            // or an out-of-bounds index, raises a shape mismatch.
            let Some(value) = item.as_object().and_then(|obj| obj.get(name.as_str())) else {
                continue;
            };
            if value.is_null() {
                continue;
            }

            match selector {
                Some(ref sel) => {
                    let Some(list) = value.as_array() else {
                        return Err(ShapeMismatch {
                            path: data_key.to_owned(),
                            snippet: snippet(value),
                        });
                    };
                    next.extend(apply_selector(list, sel, data_key)?);
                }
                None => next.push(value.clone()),
            }
        }

        current = next;
    }

    if current.is_empty() {
        return Ok(Vec::new());
    }

    let mut records = Vec::with_capacity(current.len());
    for value in current {
        match value {
            Value::Object(_) => records.push(value),
            Value::Array(items) => {
                for item in items {
                    if !item.is_object() {
                        return Err(ShapeMismatch {
                            path: data_key.to_owned(),
                            snippet: snippet(&item),
                        });
                    }
                    records.push(item);
                }
            }
            other => {
                return Err(ShapeMismatch {
                    path: data_key.to_owned(),
                    snippet: snippet(&other),
                })
            }
        }
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn split_key_honors_literal_dot_escape() {
        assert_eq!(split_key("a.b/.c"), vec!["a", "b.c"]);
    }

    #[test]
    fn lookup_path_handles_literal_dot_key() {
        let record = json!({"a": {"b.c": 1}});
        let root = json!({});
        let value = lookup_path(&record, &root, "a.b/.c").unwrap().unwrap();
        assert_eq!(value, &json!(1));
    }

    #[test]
    fn lookup_path_root_sentinel_requires_object_root() {
        let record = json!({});
        let root = json!([1, 2, 3]);
        let err = lookup_path(&record, &root, "$root.a").unwrap_err();
        assert_eq!(err.path, "$root.a");
    }

    #[test]
    fn lookup_path_missing_segment_is_none_not_error() {
        let record = json!({"a": {}});
        let root = json!({});
        assert!(lookup_path(&record, &root, "a.missing").unwrap().is_none());
    }

    #[test]
    fn extract_records_empty_data_key_requires_list() {
        let payload = json!([{"a": 1}, {"a": 2}]);
        let records = extract_records(&payload, "").unwrap();
        assert_eq!(records.len(), 2);

        let bad = json!({"a": 1});
        assert!(extract_records(&bad, "").is_err());
    }

    #[test]
    fn extract_records_wraps_single_object() {
        let payload = json!({"data": {"id": 1}});
        let records = extract_records(&payload, "data").unwrap();
        assert_eq!(records, vec![json!({"id": 1})]);
    }

    #[test]
    fn extract_records_with_all_selector() {
        let payload = json!({"items": [{"id": 1}, {"id": 2}]});
        let records = extract_records(&payload, "items[]").unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn extract_records_with_negative_index() {
        let payload = json!({"batches": [[{"id": 1}], [{"id": 2}]]});
        let records = extract_records(&payload, "batches[-1]").unwrap();
        assert_eq!(records, vec![json!({"id": 2})]);
    }

    #[test]
    fn extract_records_with_slice() {
        let payload = json!({"items": [{"id": 1}, {"id": 2}, {"id": 3}]});
        let records = extract_records(&payload, "items[1:]").unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn extract_records_rejects_primitive_lists() {
        let payload = json!({"items": [1, 2, 3]});
        assert!(extract_records(&payload, "items").is_err());
    }

    #[test]
    fn extract_records_missing_intermediate_key_yields_empty_not_error() {
        let payload = json!({"other": [{"id": 1}]});
        assert_eq!(extract_records(&payload, "items").unwrap(), Vec::<Value>::new());
    }
}
