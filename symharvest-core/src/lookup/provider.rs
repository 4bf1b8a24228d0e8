//! Issuer trait: the seam between the fetch engine and the remote service.
//!
//! The engine only knows how to hand a descriptor to an issuer and receive a
//! [`FetchOutcome`] back. Implementations own transport, timeouts and payload
//! validation, so the engine can be driven by a scripted issuer in tests.

use crate::domain::{FetchOutcome, LookupQuery};

/// Performs one lookup round trip for one descriptor.
///
/// Implementations must never panic or block indefinitely: every fault is
/// reported as [`FetchOutcome::Failure`]. Issuers are shared by all pool
/// workers, hence `Send + Sync`.
pub trait LookupIssuer: Send + Sync {
    /// Human-readable name of this issuer.
    fn name(&self) -> &str {
        "issuer"
    }

    fn issue(&self, query: &LookupQuery) -> FetchOutcome;
}

impl<F> LookupIssuer for F
where
    F: Fn(&LookupQuery) -> FetchOutcome + Send + Sync,
{
    fn name(&self) -> &str {
        "closure"
    }

    fn issue(&self, query: &LookupQuery) -> FetchOutcome {
        self(query)
    }
}
