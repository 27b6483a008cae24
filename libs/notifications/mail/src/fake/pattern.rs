//! Subset matching of captured records.
//!
//! A candidate matches a pattern when every key present in the pattern exists
//! in the candidate with an equal value, recursively. Arrays match when each
//! pattern element is matched by at least one candidate element. A predicate
//! leaf is called with the candidate value instead of being compared.

use serde_json::Value;
use std::fmt;
use std::sync::Arc;

type Predicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Partial description of a record.
///
/// ```ignore
/// use serde_json::json;
///
/// // match by subject alone
/// let by_subject = Pattern::from(json!({ "subject": "Welcome" }));
///
/// // mix equality with a predicate
/// let pattern = Pattern::from(json!({ "to": [{ "address": "foo@bar.com" }] }))
///     .with("subject", Pattern::matches(|v| v.as_str().is_some_and(|s| s.starts_with("Re:"))));
/// ```
#[derive(Clone)]
pub enum Pattern {
    /// Plain equality
    Exact(Value),
    /// Every listed key must exist and match
    Object(Vec<(String, Pattern)>),
    /// Every element must be matched by some candidate element
    Array(Vec<Pattern>),
    /// Called with the candidate value
    Predicate(Predicate),
}

impl Pattern {
    /// Predicate leaf.
    pub fn matches<F>(predicate: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(predicate))
    }

    /// Pattern matching any object.
    pub fn any() -> Self {
        Self::Object(Vec::new())
    }

    /// Add or replace a key of an object pattern. A non-object pattern is
    /// replaced by an object pattern holding only `key`.
    pub fn with(self, key: impl Into<String>, pattern: impl Into<Pattern>) -> Self {
        let key = key.into();
        let pattern = pattern.into();

        let mut entries = match self {
            Self::Object(entries) => entries,
            _ => Vec::new(),
        };

        match entries.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, slot)) => *slot = pattern,
            None => entries.push((key, pattern)),
        }

        Self::Object(entries)
    }

    /// Whether `candidate` satisfies this pattern.
    pub fn is_match(&self, candidate: &Value) -> bool {
        match self {
            Self::Exact(expected) => expected == candidate,
            Self::Predicate(predicate) => predicate(candidate),
            Self::Object(entries) => {
                let Value::Object(map) = candidate else {
                    return false;
                };

                entries.iter().all(|(key, pattern)| {
                    map.get(key)
                        .is_some_and(|value| pattern.is_match(value))
                })
            }
            Self::Array(items) => {
                let Value::Array(values) = candidate else {
                    return false;
                };

                items
                    .iter()
                    .all(|pattern| values.iter().any(|value| pattern.is_match(value)))
            }
        }
    }
}

impl From<Value> for Pattern {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::Object(
                map.into_iter()
                    .map(|(key, value)| (key, Pattern::from(value)))
                    .collect(),
            ),
            Value::Array(values) => Self::Array(values.into_iter().map(Pattern::from).collect()),
            other => Self::Exact(other),
        }
    }
}

impl From<&str> for Pattern {
    fn from(value: &str) -> Self {
        Self::Exact(Value::String(value.to_string()))
    }
}

impl From<String> for Pattern {
    fn from(value: String) -> Self {
        Self::Exact(Value::String(value))
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(value) => write!(f, "{}", value),
            Self::Predicate(_) => f.write_str("<predicate>"),
            Self::Object(entries) => f
                .debug_map()
                .entries(entries.iter().map(|(key, pattern)| (key, pattern)))
                .finish(),
            Self::Array(items) => f.debug_list().entries(items).finish(),
        }
    }
}
