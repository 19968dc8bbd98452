//! Subgraph labels and federated-graph label matchers.
//!
//! A matcher is a list of AND-groups. Each group is written as a comma-joined
//! list of `key=value` pairs. A label set satisfies the matcher when at least
//! one group is a subset of it.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SchemaCheckError;

/// A single `key=value` label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Label {
    pub key: String,
    pub value: String,
}

impl Label {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Parse `key=value`. Whitespace around either side is trimmed.
    pub fn parse(s: &str) -> Result<Self, SchemaCheckError> {
        let (key, value) = s
            .split_once('=')
            .ok_or_else(|| SchemaCheckError::InvalidInput(format!("label '{s}' is not key=value")))?;
        let (key, value) = (key.trim(), value.trim());
        if key.is_empty() || value.is_empty() {
            return Err(SchemaCheckError::InvalidInput(format!(
                "label '{s}' has an empty key or value"
            )));
        }
        Ok(Self::new(key, value))
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// One AND-group: every label in it must be present.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LabelMatcher {
    pub labels: BTreeSet<Label>,
}

impl LabelMatcher {
    /// Parse `team=a,env=prod`.
    pub fn parse(s: &str) -> Result<Self, SchemaCheckError> {
        let labels = s
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(Label::parse)
            .collect::<Result<BTreeSet<_>, _>>()?;
        if labels.is_empty() {
            return Err(SchemaCheckError::InvalidInput(format!(
                "label matcher '{s}' is empty"
            )));
        }
        Ok(Self { labels })
    }

    pub fn is_satisfied_by(&self, labels: &BTreeSet<Label>) -> bool {
        self.labels.is_subset(labels)
    }
}

impl fmt::Display for LabelMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.labels.iter().map(|l| l.to_string()).collect();
        write!(f, "{}", parts.join(","))
    }
}

/// OR across groups, AND within a group.
///
/// A graph with no matchers only accepts subgraphs that carry no labels at all.
pub fn matches(matchers: &[LabelMatcher], labels: &BTreeSet<Label>) -> bool {
    if matchers.is_empty() {
        return labels.is_empty();
    }
    matchers.iter().any(|m| m.is_satisfied_by(labels))
}

/// Parse a list of `key=value` strings into a label set.
pub fn parse_labels<S: AsRef<str>>(raw: &[S]) -> Result<BTreeSet<Label>, SchemaCheckError> {
    raw.iter().map(|s| Label::parse(s.as_ref())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(raw: &[&str]) -> BTreeSet<Label> {
        parse_labels(raw).unwrap()
    }

    #[test]
    fn parse_label_trims() {
        let l = Label::parse(" team = reviews ").unwrap();
        assert_eq!(l, Label::new("team", "reviews"));
    }

    #[test]
    fn parse_label_rejects_missing_eq() {
        assert!(Label::parse("team").is_err());
        assert!(Label::parse("=x").is_err());
    }

    #[test]
    fn matcher_is_and_within_group() {
        let m = LabelMatcher::parse("team=a,env=prod").unwrap();
        assert!(m.is_satisfied_by(&set(&["team=a", "env=prod", "x=y"])));
        assert!(!m.is_satisfied_by(&set(&["team=a"])));
    }

    #[test]
    fn matchers_are_or_across_groups() {
        let ms = vec![
            LabelMatcher::parse("team=a").unwrap(),
            LabelMatcher::parse("team=b,env=prod").unwrap(),
        ];
        assert!(matches(&ms, &set(&["team=a"])));
        assert!(matches(&ms, &set(&["team=b", "env=prod"])));
        assert!(!matches(&ms, &set(&["team=b"])));
    }

    #[test]
    fn empty_matchers_only_accept_unlabelled() {
        assert!(matches(&[], &BTreeSet::new()));
        assert!(!matches(&[], &set(&["team=a"])));
    }

    #[test]
    fn matcher_display_roundtrips_sorted() {
        let m = LabelMatcher::parse("env=prod,team=a").unwrap();
        assert_eq!(m.to_string(), "env=prod,team=a");
    }
}
