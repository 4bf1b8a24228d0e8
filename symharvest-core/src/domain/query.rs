use serde::{Deserialize, Serialize};
use std::fmt;

/// Instrument-type label sent as the lookup `type` parameter.
///
/// The remote service owns the vocabulary, so any non-blank label is accepted.
/// Labels are normalized to trimmed lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Category(String);

impl Category {
    pub fn new(label: &str) -> Self {
        Self(label.trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.is_empty()
    }

    /// The instrument types the lookup endpoint answers for out of the box.
    pub fn defaults() -> Vec<Category> {
        DEFAULT_CATEGORIES.iter().map(|c| Category::new(c)).collect()
    }

    /// Parse a comma-separated list (`"equity,etf"`). Empty segments are kept
    /// as blank categories so validation can reject them.
    pub fn parse_list(list: &str) -> Vec<Category> {
        list.split(',').map(Category::new).collect()
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub const DEFAULT_CATEGORIES: [&str; 6] =
    ["equity", "mutualfund", "etf", "index", "future", "currency"];

/// One unit of fetch work: a search term paired with a category.
///
/// Identity is the value itself; the scheduler keys its error tracking on it.
/// The concrete request target is derived by the issuer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LookupQuery {
    pub term: String,
    pub category: Category,
}

impl LookupQuery {
    pub fn new(term: impl Into<String>, category: Category) -> Self {
        Self {
            term: term.into(),
            category,
        }
    }
}

impl fmt::Display for LookupQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.term, self.category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_is_normalized() {
        assert_eq!(Category::new("  ETF ").as_str(), "etf");
    }

    #[test]
    fn parse_list_keeps_blank_segments() {
        let cats = Category::parse_list("equity,,etf");
        assert_eq!(cats.len(), 3);
        assert!(cats[1].is_blank());
    }

    #[test]
    fn defaults_match_lookup_types() {
        let names: Vec<String> = Category::defaults()
            .iter()
            .map(|c| c.to_string())
            .collect();
        assert_eq!(
            names,
            vec!["equity", "mutualfund", "etf", "index", "future", "currency"]
        );
    }

    #[test]
    fn display_includes_category() {
        let q = LookupQuery::new("ab", Category::new("equity"));
        assert_eq!(q.to_string(), "ab[equity]");
    }
}
