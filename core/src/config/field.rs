//! Fail-soft field extraction.
//!
//! Optional configuration fields never abort a load. Each lookup returns a
//! `Defaulted<T>`: the value that was read, or the documented default plus a
//! flag saying the default was substituted.

use serde_json::{Map, Value};


/// A field value together with whether the default was used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Defaulted<T> {
    pub value: T,
    pub defaulted: bool,
}

impl<T> Defaulted<T> {
    pub fn read(value: T) -> Self {
        Defaulted { value, defaulted: false }
    }

    pub fn fallback(value: T) -> Self {
        Defaulted { value, defaulted: true }
    }
}


/// A string field. Absent or non-string values yield `default`.
pub fn string_or(obj: &Map<String, Value>, key: &str, default: &str) -> Defaulted<String> {
    match obj.get(key) {
        Some(Value::String(s)) => Defaulted::read(s.clone()),
        _ => Defaulted::fallback(default.to_string()),
    }
}

/// A string field, `None` when absent or malformed.
pub fn opt_string(obj: &Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key) {
        Some(Value::String(s)) => Some(s.clone()),
        _ => None,
    }
}

/// A list of words: either a whitespace-separated string or an array of
/// strings. Anything else yields an empty list.
pub fn word_list(obj: &Map<String, Value>, key: &str) -> Defaulted<Vec<String>> {
    match obj.get(key) {
        Some(Value::String(s)) => {
            Defaulted::read(s.split_whitespace().map(str::to_string).collect())
        }
        Some(Value::Array(items)) if items.iter().all(Value::is_string) => Defaulted::read(
            items
                .iter()
                .filter_map(Value::as_str)
                .flat_map(str::split_whitespace)
                .map(str::to_string)
                .collect(),
        ),
        _ => Defaulted::fallback(Vec::new()),
    }
}

/// Normalise a yes/no string. `"yes"` and the canonical `"1"` are true,
/// `"no"` and `"0"` are false, anything else is `unmatched`.
pub fn normalize_flag(raw: &str, unmatched: bool) -> Defaulted<bool> {
    match raw {
        "yes" | "1" => Defaulted::read(true),
        "no" | "0" => Defaulted::read(false),
        _ => Defaulted::fallback(unmatched),
    }
}

/// A yes/no field. Absent, malformed, or unrecognised values all yield
/// `default`.
pub fn flag_or(obj: &Map<String, Value>, key: &str, default: bool) -> Defaulted<bool> {
    match obj.get(key) {
        Some(Value::String(s)) => normalize_flag(s, default),
        Some(Value::Bool(b)) => Defaulted::read(*b),
        _ => Defaulted::fallback(default),
    }
}

/// Canonical textual form of a flag, as passed to remote programs.
pub fn canonical_flag(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}
