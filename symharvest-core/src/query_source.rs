//! Query source: enumerates every search term up to a maximum length.
//!
//! For each length `1..=max_length`, every ordered tuple drawn (with
//! repetition) from the alphabet is paired with every category. Terms are
//! produced in alphabet order with the last position varying fastest, so with
//! the default alphabet `"aa"` comes first and `"=="` last. A descending
//! [`QueryOrder`] walks the alphabet back to front instead.
//!
//! The sequence is lazy: at length 4 with the default alphabet and categories
//! it is roughly 12.5 million descriptors, which must never be materialized
//! up front.

use std::collections::HashSet;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{Category, LookupQuery};

/// Letters, digits and the two punctuation marks that appear in tickers.
pub const DEFAULT_ALPHABET: &str = "abcdefghijklmnopqrstuvwxyz0123456789.=";

/// Default maximum term length.
pub const DEFAULT_MAX_LENGTH: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuerySourceError {
    #[error("alphabet is empty")]
    EmptyAlphabet,

    #[error("alphabet contains '{0}' more than once")]
    DuplicateCharacter(char),

    #[error("maximum combination length must be at least 1")]
    ZeroLength,

    #[error("no categories given")]
    NoCategories,

    #[error("category list contains a blank entry")]
    BlankCategory,

    #[error("category '{0}' is listed more than once")]
    DuplicateCategory(String),

    #[error("query count for length {0} overflows")]
    TooManyQueries(usize),
}

/// Direction in which each term position walks the alphabet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOrder {
    #[default]
    Ascending,
    Descending,
}

/// Validated generation parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySource {
    /// Characters in enumeration order.
    alphabet: Vec<char>,
    order: QueryOrder,
    max_length: usize,
    categories: Vec<Category>,
    total: usize,
}

impl QuerySource {
    pub fn new(
        max_length: usize,
        alphabet: &str,
        categories: Vec<Category>,
    ) -> Result<Self, QuerySourceError> {
        let alphabet: Vec<char> = alphabet.chars().collect();
        if alphabet.is_empty() {
            return Err(QuerySourceError::EmptyAlphabet);
        }
        let mut seen = HashSet::new();
        for &c in &alphabet {
            if !seen.insert(c) {
                return Err(QuerySourceError::DuplicateCharacter(c));
            }
        }

        if max_length < 1 {
            return Err(QuerySourceError::ZeroLength);
        }

        if categories.is_empty() {
            return Err(QuerySourceError::NoCategories);
        }
        let mut seen = HashSet::new();
        for cat in &categories {
            if cat.is_blank() {
                return Err(QuerySourceError::BlankCategory);
            }
            if !seen.insert(cat.as_str()) {
                return Err(QuerySourceError::DuplicateCategory(cat.to_string()));
            }
        }

        let mut total: usize = 0;
        for length in 1..=max_length {
            let n = count_for_length(alphabet.len(), categories.len(), length)
                .ok_or(QuerySourceError::TooManyQueries(length))?;
            total = total
                .checked_add(n)
                .ok_or(QuerySourceError::TooManyQueries(length))?;
        }

        Ok(Self {
            alphabet,
            order: QueryOrder::Ascending,
            max_length,
            categories,
            total,
        })
    }

    /// Default alphabet and categories with the given maximum length.
    pub fn with_defaults(max_length: usize) -> Result<Self, QuerySourceError> {
        Self::new(max_length, DEFAULT_ALPHABET, Category::defaults())
    }

    pub fn with_order(mut self, order: QueryOrder) -> Self {
        if order != self.order {
            self.alphabet.reverse();
            self.order = order;
        }
        self
    }

    pub fn order(&self) -> QueryOrder {
        self.order
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    pub fn lengths(&self) -> RangeInclusive<usize> {
        1..=self.max_length
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    /// Exact number of descriptors [`iter`](Self::iter) yields.
    pub fn len(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Every descriptor, lengths `1..=max_length`.
    pub fn iter(&self) -> QueryIter {
        QueryIter::new(self, 1, self.max_length, self.total)
    }

    /// Descriptors of exactly one term length. Lengths outside
    /// `1..=max_length` yield nothing.
    pub fn for_length(&self, length: usize) -> QueryIter {
        if length == 0 || length > self.max_length {
            return QueryIter::exhausted(self);
        }
        // Bounded by `total`, which was checked in `new`.
        let count = count_for_length(self.alphabet.len(), self.categories.len(), length)
            .unwrap_or(0);
        QueryIter::new(self, length, length, count)
    }
}

/// Validate parameters and return the lazy descriptor sequence.
pub fn generate(
    max_length: usize,
    alphabet: &str,
    categories: Vec<Category>,
) -> Result<QueryIter, QuerySourceError> {
    Ok(QuerySource::new(max_length, alphabet, categories)?.iter())
}

fn count_for_length(alphabet: usize, categories: usize, length: usize) -> Option<usize> {
    let exp = u32::try_from(length).ok()?;
    alphabet.checked_pow(exp)?.checked_mul(categories)
}

/// Lazy odometer over `alphabet^length × categories`.
#[derive(Debug, Clone)]
pub struct QueryIter {
    alphabet: Vec<char>,
    categories: Vec<Category>,
    last_length: usize,
    digits: Vec<usize>,
    term: String,
    category: usize,
    remaining: usize,
}

impl QueryIter {
    fn new(source: &QuerySource, first_length: usize, last_length: usize, count: usize) -> Self {
        let digits = vec![0; first_length];
        let term = render(&source.alphabet, &digits);
        Self {
            alphabet: source.alphabet.clone(),
            categories: source.categories.clone(),
            last_length,
            digits,
            term,
            category: 0,
            remaining: count,
        }
    }

    fn exhausted(source: &QuerySource) -> Self {
        Self::new(source, 0, 0, 0)
    }

    fn advance(&mut self) {
        self.category += 1;
        if self.category < self.categories.len() {
            return;
        }
        self.category = 0;

        let base = self.alphabet.len();
        for pos in (0..self.digits.len()).rev() {
            self.digits[pos] += 1;
            if self.digits[pos] < base {
                self.term = render(&self.alphabet, &self.digits);
                return;
            }
            self.digits[pos] = 0;
        }

        // Odometer rolled over: move to the next length.
        let next = self.digits.len() + 1;
        if next <= self.last_length {
            self.digits = vec![0; next];
            self.term = render(&self.alphabet, &self.digits);
        }
    }
}

fn render(alphabet: &[char], digits: &[usize]) -> String {
    digits.iter().map(|&d| alphabet[d]).collect()
}

impl Iterator for QueryIter {
    type Item = LookupQuery;

    fn next(&mut self) -> Option<LookupQuery> {
        if self.remaining == 0 {
            return None;
        }
        let query = LookupQuery::new(self.term.clone(), self.categories[self.category].clone());
        self.remaining -= 1;
        if self.remaining > 0 {
            self.advance();
        }
        Some(query)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for QueryIter {}
