//! Remote lookup: the issuer seam and the Yahoo Finance implementation.

pub mod provider;
pub mod yahoo;

pub use provider::LookupIssuer;
pub use yahoo::{LookupSetupError, YahooLookup, DEFAULT_ENDPOINT, DEFAULT_TIMEOUT};
