//! Tag Matcher
//!
//! A tag filter is a list of terms; a resource satisfies the filter when
//! every term matches its tags. `key` matches on presence of the key,
//! `key:value` additionally requires the exact value.

use std::collections::HashMap;

/// One parsed filter term
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagTerm {
    pub key: String,
    pub value: Option<String>,
}

impl TagTerm {
    /// Parse `key` or `key:value`, splitting on the first `:`
    pub fn parse(term: &str) -> Self {
        match term.split_once(':') {
            Some((key, value)) if !value.is_empty() => Self {
                key: key.to_string(),
                value: Some(value.to_string()),
            },
            Some((key, _)) => Self {
                key: key.to_string(),
                value: None,
            },
            None => Self {
                key: term.to_string(),
                value: None,
            },
        }
    }

    fn matches(&self, tags: &HashMap<&str, &str>) -> bool {
        match (&self.value, tags.get(self.key.as_str())) {
            (_, None) => false,
            (None, Some(_)) => true,
            (Some(expected), Some(actual)) => expected == actual,
        }
    }
}

/// Conjunction of tag terms
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagFilter {
    terms: Vec<TagTerm>,
}

impl TagFilter {
    pub fn parse<S: AsRef<str>>(terms: &[S]) -> Self {
        Self {
            terms: terms.iter().map(|t| TagTerm::parse(t.as_ref())).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn terms(&self) -> &[TagTerm] {
        &self.terms
    }

    /// Does a resource's tag mapping satisfy every term?
    pub fn matches(&self, tags: Option<&HashMap<&str, &str>>) -> bool {
        if self.terms.is_empty() {
            return true;
        }
        match tags {
            Some(tags) if !tags.is_empty() => self.terms.iter().all(|t| t.matches(tags)),
            _ => false,
        }
    }
}
