use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::error::{Result, ToolkitError};

/* ============================= PATH AST ============================= */

/// One step of a dotted key path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Object member lookup.
    Key(String),
    /// `[]`: every element of a list.
    Each,
    /// `*`: the first value of a map (or first element of a list).
    First,
    /// `KEYS`: the member names of a map.
    Keys,
}

/// A parsed dotted path such as `spec.includedNamespaces[].namespace`,
/// `metadata.labels.*` or `metadata.annotations.KEYS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPath {
    segments: Vec<Segment>,
}

impl KeyPath {
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Evaluate against `root`, returning every value the path reaches.
    pub fn resolve(&self, root: &Value) -> Vec<Value> {
        let mut current = vec![root.clone()];
        for segment in &self.segments {
            let mut next = Vec::new();
            for value in &current {
                match (segment, value) {
                    (Segment::Key(k), Value::Object(map)) => {
                        if let Some(v) = map.get(k) {
                            next.push(v.clone());
                        }
                    }
                    (Segment::Each, Value::Array(items)) => next.extend(items.iter().cloned()),
                    (Segment::First, Value::Object(map)) => {
                        if let Some(v) = map.values().next() {
                            next.push(v.clone());
                        }
                    }
                    (Segment::First, Value::Array(items)) => {
                        if let Some(v) = items.first() {
                            next.push(v.clone());
                        }
                    }
                    (Segment::Keys, Value::Object(map)) => {
                        next.extend(map.keys().map(|k| Value::String(k.clone())));
                    }
                    _ => {}
                }
            }
            current = next;
        }
        current
    }

    /// First scalar the path reaches, rendered as a string.
    pub fn first_string(&self, root: &Value) -> Option<String> {
        self.resolve(root).iter().find_map(scalar_string)
    }
}

impl FromStr for KeyPath {
    type Err = ToolkitError;

    fn from_str(s: &str) -> Result<Self> {
        if s.trim().is_empty() {
            return Err(ToolkitError::validation("key path must not be empty"));
        }
        let mut segments = Vec::new();
        for token in s.split('.') {
            match token {
                "" => {
                    return Err(ToolkitError::validation(format!(
                        "key path '{s}' contains an empty segment"
                    )));
                }
                "*" => segments.push(Segment::First),
                "KEYS" => segments.push(Segment::Keys),
                "[]" => segments.push(Segment::Each),
                _ => match token.strip_suffix("[]") {
                    Some(key) => {
                        segments.push(Segment::Key(key.to_string()));
                        segments.push(Segment::Each);
                    }
                    None => segments.push(Segment::Key(token.to_string())),
                },
            }
        }
        Ok(Self { segments })
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Key(k) => {
                    if !out.is_empty() {
                        out.push('.');
                    }
                    out.push_str(k);
                }
                Segment::Each => out.push_str("[]"),
                Segment::First => {
                    if !out.is_empty() {
                        out.push('.');
                    }
                    out.push('*');
                }
                Segment::Keys => {
                    if !out.is_empty() {
                        out.push('.');
                    }
                    out.push_str("KEYS");
                }
            }
        }
        f.write_str(&out)
    }
}

/// Strings, numbers and booleans compare by their textual form.
pub fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Convenience for one-off lookups with a literal path.
pub fn lookup(root: &Value, path: &str) -> Option<String> {
    path.parse::<KeyPath>().ok()?.first_string(root)
}

/* ============================= FILTERS ============================= */

/// A single list filter; filters passed together are AND-combined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub key: KeyPath,
    pub value: String,
    /// Substring match instead of equality.
    pub in_match: bool,
}

impl Filter {
    pub fn new(key: &str, value: impl Into<String>, in_match: bool) -> Result<Self> {
        Ok(Self {
            key: key.parse()?,
            value: value.into(),
            in_match,
        })
    }

    pub fn equals(key: &str, value: impl Into<String>) -> Result<Self> {
        Self::new(key, value, false)
    }

    pub fn substring(key: &str, value: impl Into<String>) -> Result<Self> {
        Self::new(key, value, true)
    }

    /// True when any value reached by the path satisfies the filter.
    pub fn matches(&self, item: &Value) -> bool {
        self.key.resolve(item).iter().filter_map(scalar_string).any(|candidate| {
            if self.in_match {
                candidate.contains(&self.value)
            } else {
                candidate == self.value
            }
        })
    }
}

/// Drop every `items[]` entry that does not satisfy all filters.
pub fn apply_filters(list: &mut Value, filters: &[Filter]) {
    if filters.is_empty() {
        return;
    }
    if let Some(items) = list.get_mut("items").and_then(Value::as_array_mut) {
        items.retain(|item| filters.iter().all(|f| f.matches(item)));
    }
}

/* ============================= TESTS ============================= */

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn app() -> Value {
        json!({
            "metadata": {
                "name": "wordpress",
                "labels": {"tier": "web", "team": "blue"},
            },
            "spec": {
                "includedNamespaces": [
                    {"namespace": "wp"},
                    {"namespace": "wp-db"},
                ],
            },
            "status": {"state": "Ready", "replicas": 3},
        })
    }

    #[test]
    fn test_parse_segments() {
        let p: KeyPath = "spec.includedNamespaces[].namespace".parse().unwrap();
        assert_eq!(
            p.segments(),
            &[
                Segment::Key("spec".into()),
                Segment::Key("includedNamespaces".into()),
                Segment::Each,
                Segment::Key("namespace".into()),
            ]
        );
        assert_eq!(p.to_string(), "spec.includedNamespaces[].namespace");
    }

    #[test]
    fn test_parse_rejects_empty_segments() {
        assert!("".parse::<KeyPath>().is_err());
        assert!("metadata..name".parse::<KeyPath>().is_err());
    }

    #[test]
    fn test_resolve_plain_key() {
        assert_eq!(lookup(&app(), "metadata.name"), Some("wordpress".into()));
        assert_eq!(lookup(&app(), "status.replicas"), Some("3".into()));
        assert_eq!(lookup(&app(), "metadata.missing"), None);
    }

    #[test]
    fn test_resolve_each() {
        let p: KeyPath = "spec.includedNamespaces[].namespace".parse().unwrap();
        assert_eq!(p.resolve(&app()), vec![json!("wp"), json!("wp-db")]);
    }

    #[test]
    fn test_resolve_first_value() {
        let p: KeyPath = "metadata.labels.*".parse().unwrap();
        assert_eq!(p.resolve(&app()), vec![json!("web")]);
    }

    #[test]
    fn test_resolve_keys() {
        let p: KeyPath = "metadata.labels.KEYS".parse().unwrap();
        assert_eq!(p.resolve(&app()), vec![json!("tier"), json!("team")]);
    }

    #[test]
    fn test_filter_equality_and_substring() {
        let item = app();
        assert!(Filter::equals("metadata.name", "wordpress").unwrap().matches(&item));
        assert!(!Filter::equals("metadata.name", "word").unwrap().matches(&item));
        assert!(Filter::substring("metadata.name", "word").unwrap().matches(&item));
    }

    #[test]
    fn test_filter_any_element_matches() {
        let item = app();
        let f = Filter::equals("spec.includedNamespaces[].namespace", "wp-db").unwrap();
        assert!(f.matches(&item));
        let f = Filter::equals("spec.includedNamespaces[].namespace", "other").unwrap();
        assert!(!f.matches(&item));
    }

    #[test]
    fn test_filter_keys() {
        let f = Filter::equals("metadata.labels.KEYS", "team").unwrap();
        assert!(f.matches(&app()));
    }

    #[test]
    fn test_apply_filters_is_and_combined() {
        let mut list = json!({"items": [
            {"metadata": {"name": "a"}, "status": {"state": "Ready"}},
            {"metadata": {"name": "ab"}, "status": {"state": "Failed"}},
            {"metadata": {"name": "c"}, "status": {"state": "Ready"}},
        ]});
        let filters = vec![
            Filter::substring("metadata.name", "a").unwrap(),
            Filter::equals("status.state", "Ready").unwrap(),
        ];
        apply_filters(&mut list, &filters);
        let names: Vec<_> = list["items"]
            .as_array()
            .unwrap()
            .iter()
            .map(|i| i["metadata"]["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["a"]);
    }
}
