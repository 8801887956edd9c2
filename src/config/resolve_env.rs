//! Recursive `${VAR}`-or-bare-name environment variable substitution
//!
//! Ported from the reference Python implementation's `utils.resolve_env`:
//! strings of the exact form `${VAR}` are substituted with `VAR`'s value,
//! falling back to the original string if unset; strings that happen to
//! exactly match the name of a set environment variable are substituted too.
//! Runs over the raw YAML value tree before typed deserialization.

use serde_yaml::Value;

pub(crate) fn resolve_env(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(resolve_string(&s)),
        Value::Sequence(items) => {
            Value::Sequence(items.into_iter().map(resolve_env).collect())
        }
        Value::Mapping(map) => Value::Mapping(
            map.into_iter()
                .map(|(k, v)| (resolve_env(k), resolve_env(v)))
                .collect(),
        ),
        other => other,
    }
}

fn resolve_string(s: &str) -> String {
    if let Some(var_name) = s.strip_prefix("${").and_then(|r| r.strip_suffix('}')) {
        return std::env::var(var_name).unwrap_or_else(|_| s.to_owned());
    }

    if let Ok(value) = std::env::var(s) {
        return value;
    }

    s.to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_braced_form() {
        std::env::set_var("OTEL_SCRAPER_TEST_VAR", "hello");
        assert_eq!(resolve_string("${OTEL_SCRAPER_TEST_VAR}"), "hello");
    }

    #[test]
    fn falls_back_when_unset() {
        std::env::remove_var("OTEL_SCRAPER_TEST_UNSET");
        assert_eq!(
            resolve_string("${OTEL_SCRAPER_TEST_UNSET}"),
            "${OTEL_SCRAPER_TEST_UNSET}"
        );
    }

    #[test]
    fn substitutes_bare_name_match() {
        std::env::set_var("OTEL_SCRAPER_TEST_BARE", "world");
        assert_eq!(resolve_string("OTEL_SCRAPER_TEST_BARE"), "world");
    }

    #[test]
    fn leaves_non_matching_strings_alone() {
        assert_eq!(resolve_string("plain-value"), "plain-value");
    }

    #[test]
    fn recurses_into_mappings_and_sequences() {
        std::env::set_var("OTEL_SCRAPER_TEST_NESTED", "nested-value");
        let value: Value = serde_yaml::from_str(
            "a: \"${OTEL_SCRAPER_TEST_NESTED}\"\nb:\n  - \"${OTEL_SCRAPER_TEST_NESTED}\"\n",
        )
        .unwrap();
        let resolved = resolve_env(value);
        let a = resolved.get("a").unwrap().as_str().unwrap();
        assert_eq!(a, "nested-value");
    }
}
