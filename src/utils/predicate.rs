//! Predicate matching semantics for filter rules
//!
//! Ported from the reference Python implementation's `utils.matches`.

use regex::Regex;
use serde_json::Value;

use crate::config::MatchType;

pub(crate) fn matches(match_type: MatchType, candidate: Option<&Value>, expected: &Value) -> bool {
    match match_type {
        MatchType::Equals => candidate == Some(expected),
        MatchType::NotEquals => candidate != Some(expected),
        MatchType::In => match_in(candidate, expected),
        MatchType::Regex => match_regex(candidate, expected),
    }
}

fn match_in(candidate: Option<&Value>, expected: &Value) -> bool {
    let Some(candidate) = candidate else { return false };

    if let Some(items) = expected.as_array() {
        return items.contains(candidate);
    }

    match candidate {
        Value::Array(items) => items.contains(expected),
        Value::String(s) => expected.as_str().is_some_and(|needle| s.contains(needle)),
        _ => false,
    }
}

fn match_regex(candidate: Option<&Value>, expected: &Value) -> bool {
    let Some(candidate) = candidate else { return false };
    let Some(candidate_str) = candidate.as_str() else { return false };
    let Some(pattern) = expected.as_str() else { return false };
    let Ok(re) = Regex::new(pattern) else { return false };
    re.is_match(candidate_str)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn equals_and_not_equals() {
        let candidate = json!("ok");
        assert!(matches(MatchType::Equals, Some(&candidate), &json!("ok")));
        assert!(matches(MatchType::NotEquals, Some(&candidate), &json!("fail")));
    }

    #[test]
    fn in_with_expected_list() {
        let candidate = json!("b");
        assert!(matches(MatchType::In, Some(&candidate), &json!(["a", "b"])));
    }

    #[test]
    fn in_with_candidate_string_substring() {
        let candidate = json!("hello world");
        assert!(matches(MatchType::In, Some(&candidate), &json!("world")));
    }

    #[test]
    fn in_with_unsupported_candidate_is_false() {
        let candidate = json!(42);
        assert!(!matches(MatchType::In, Some(&candidate), &json!(42)));
    }

    #[test]
    fn regex_none_candidate_is_false() {
        assert!(!matches(MatchType::Regex, None, &json!("a.*")));
    }

    #[test]
    fn regex_search_semantics() {
        let candidate = json!("order-42");
        assert!(matches(MatchType::Regex, Some(&candidate), &json!(r"\d+")));
    }
}
