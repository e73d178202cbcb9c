#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **blessed-contributors** – Contributor attribution and calibrated
//! reputation scoring for the Blessed ledger.
//!
//! Contributors register through events, submit signals through an
//! attributed two-event append, and earn a calibrated reputation rather
//! than a raw count: the denominator is what was *submitted* (closing the
//! selection-bias loophole), contributions decay with a 30-day half-life,
//! conviction calibration is scored with a Brier term, and near-duplicate
//! payloads across contributors are detected and penalized.

pub mod attribution;
pub mod limits;
pub mod registry;
pub mod scoring;

pub use attribution::{
    outcome_draft, submission_drafts, AttributionPayload, OutcomePayload, SignalOutcome,
};
pub use limits::{DuplicateDetector, RateLimitConfig, RateLimiter};
pub use registry::{Contributor, ContributorRegistry, RegisterPayload};
pub use scoring::{ContributorScore, ScoreBoard, ScoringConfig};

/// Contributor-facing policy and input errors.
#[derive(Debug, thiserror::Error)]
pub enum ContributorError {
    /// No contributor registered under this id.
    #[error("contributor {0} not found")]
    NotFound(String),
    /// A contributor with this node id already exists.
    #[error("node id {0} is already registered")]
    DuplicateNodeId(String),
    /// The contributor exceeded its submission rate limit.
    #[error("rate limited; retry after {retry_after_secs}s")]
    RateLimited {
        /// Seconds until the bucket refills enough for one submission.
        retry_after_secs: u64,
    },
    /// An identical payload was submitted by another contributor inside
    /// the detection window.
    #[error("duplicate payload detected within the dedupe window")]
    DuplicatePayload,
    /// Signal submissions must use a `signal.*` kind.
    #[error("invalid signal kind: {0}")]
    InvalidSignalKind(String),
}

impl ContributorError {
    /// Stable machine-readable code for automation.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "contributor_not_found",
            Self::DuplicateNodeId(_) => "duplicate_node_id",
            Self::RateLimited { .. } => "rate_limited",
            Self::DuplicatePayload => "duplicate_payload",
            Self::InvalidSignalKind(_) => "invalid_type",
        }
    }
}
