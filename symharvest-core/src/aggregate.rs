//! Result aggregation: folds lookup documents into one record per symbol.
//!
//! Field rules:
//! - `exchange` / `instrument_type`: last write wins.
//! - `display_name`: a real `shortName` always wins; a document without one
//!   falls back to the symbol only when the symbol was never seen before.
//! - `rank`: a present rank always wins; a missing rank never erases a prior one.
//!
//! The aggregator is owned by a single thread. Concurrent fetches hand their
//! outcomes to that thread instead of sharing the map.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::debug;

use crate::domain::{Instrument, LookupRecord, RANK_UNSET};

/// Symbol → merged instrument, iterated in symbol order.
pub type ResultMap = BTreeMap<String, Instrument>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MergeError {
    #[error("document has no symbol (exchange {exchange}, type {quote_type})")]
    MissingSymbol { exchange: String, quote_type: String },
}

/// Counts from merging one response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub merged: usize,
    pub inserted: usize,
    pub skipped: usize,
}

#[derive(Debug, Default, Clone)]
pub struct Aggregator {
    results: ResultMap,
    skipped: usize,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one document. Returns `Ok(true)` when the symbol is new.
    pub fn merge(&mut self, record: LookupRecord) -> Result<bool, MergeError> {
        let LookupRecord {
            symbol,
            short_name,
            exchange,
            quote_type,
            rank,
        } = record;

        let symbol = match symbol.map(|s| s.trim().to_string()) {
            Some(s) if !s.is_empty() => s,
            _ => {
                self.skipped += 1;
                return Err(MergeError::MissingSymbol {
                    exchange,
                    quote_type,
                });
            }
        };
        let short_name = short_name.filter(|n| !n.trim().is_empty());

        if let Some(existing) = self.results.get_mut(&symbol) {
            if let Some(name) = short_name {
                existing.display_name = name;
            }
            existing.exchange = exchange;
            existing.instrument_type = quote_type;
            if let Some(rank) = rank {
                existing.rank = rank;
            }
            return Ok(false);
        }

        debug!(symbol = %symbol, "new symbol");
        let instrument = Instrument {
            display_name: short_name.unwrap_or_else(|| symbol.clone()),
            symbol: symbol.clone(),
            exchange,
            instrument_type: quote_type,
            rank: rank.unwrap_or(RANK_UNSET),
        };
        self.results.insert(symbol, instrument);
        Ok(true)
    }

    /// Merge every document of one response. Bad documents are skipped and
    /// reported through `on_skip`; the rest still merge.
    pub fn merge_all<I, F>(&mut self, records: I, mut on_skip: F) -> MergeReport
    where
        I: IntoIterator<Item = LookupRecord>,
        F: FnMut(&MergeError),
    {
        let mut report = MergeReport::default();
        for record in records {
            match self.merge(record) {
                Ok(inserted) => {
                    report.merged += 1;
                    if inserted {
                        report.inserted += 1;
                    }
                }
                Err(e) => {
                    on_skip(&e);
                    report.skipped += 1;
                }
            }
        }
        report
    }

    pub fn get(&self, symbol: &str) -> Option<&Instrument> {
        self.results.get(symbol)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Documents dropped for a missing symbol since creation.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn results(&self) -> &ResultMap {
        &self.results
    }

    pub fn into_results(self) -> ResultMap {
        self.results
    }
}
