//! Domain types for SymHarvest

pub mod outcome;
pub mod query;
pub mod record;

pub use outcome::{FetchError, FetchOutcome, TransportKind};
pub use query::{Category, LookupQuery, DEFAULT_CATEGORIES};
pub use record::{Instrument, LookupRecord, RANK_UNSET};
