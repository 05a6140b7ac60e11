//! Error taxonomy for the resolution pipeline.
//!
//! Most call sites propagate `anyhow::Error`; boundaries that have to decide
//! between rolling back one unit of work and aborting the whole run downcast
//! to `ResolveError` to tell the cases apart.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolveError {
    /// Multiple candidates survived disambiguation. Resolved by falling back
    /// to the empty sentinel rather than guessing; logged for manual review.
    #[error("ambiguous match for {context}: {candidates} candidates remain")]
    AmbiguousMatch { context: String, candidates: usize },

    /// Transient failure of an external geocoding call. Rolls back the
    /// current chain or report, not the run.
    #[error("geocoding service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The geocoding service returned an explicit status message. Terminal
    /// unless the decision policy confirms continuing; aborts the run.
    #[error("geocoding service status: {0}")]
    ServiceStatus(String),

    /// An internal invariant was violated, e.g. a query expected to find
    /// exactly one premises found several. Never suppressed.
    #[error("data integrity violation: {0}")]
    DataIntegrity(String),

    /// A report row carries inconsistent or insufficient address roles.
    /// The whole report is rejected and rolled back.
    #[error("malformed report {reference}: {detail}")]
    MalformedReport { reference: String, detail: String },
}

impl ResolveError {
    /// Errors that must terminate the run instead of the current unit of work.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ResolveError::ServiceStatus(_) | ResolveError::DataIntegrity(_)
        )
    }
}

/// True when `err` contains a run-fatal `ResolveError` anywhere in its chain.
pub fn is_fatal(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<ResolveError>())
        .any(|resolve_err| resolve_err.is_fatal())
}
