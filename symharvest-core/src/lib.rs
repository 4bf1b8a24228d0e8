//! SymHarvest Core: lookup descriptors, query generation, record merging.
//!
//! This crate contains the pieces of the harvester that do not care how work
//! is scheduled:
//! - Domain types (lookup descriptors, raw documents, merged instruments,
//!   fetch outcomes and their failure taxonomy)
//! - The query source that enumerates every term/category pair
//! - The aggregator that folds documents into one record per symbol
//! - The issuer trait and the Yahoo Finance lookup issuer

pub mod aggregate;
pub mod domain;
pub mod lookup;
pub mod query_source;

pub use aggregate::{Aggregator, MergeError, MergeReport, ResultMap};
pub use lookup::{LookupIssuer, YahooLookup};
pub use query_source::{generate, QueryIter, QueryOrder, QuerySource, QuerySourceError};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: everything handed to pool workers is Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<domain::LookupQuery>();
        require_sync::<domain::LookupQuery>();
        require_send::<domain::FetchOutcome>();
        require_sync::<domain::FetchOutcome>();
        require_send::<YahooLookup>();
        require_sync::<YahooLookup>();
        require_send::<Aggregator>();
    }

    /// The issuer trait is object safe so callers can hold `&dyn LookupIssuer`.
    #[test]
    fn issuer_trait_is_object_safe() {
        fn _check(issuer: &dyn LookupIssuer, q: &domain::LookupQuery) -> domain::FetchOutcome {
            issuer.issue(q)
        }
    }
}
