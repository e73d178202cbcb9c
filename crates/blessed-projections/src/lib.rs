#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **blessed-projections** – Replayable projections over the Blessed event
//! log.
//!
//! A projection is a pure function from a sequence range of the log to a
//! derived view. Projections are caches, never sources of truth: any view
//! can be reset and rebuilt from events, and the rebuild must be
//! byte-identical to the live fold. Schema evolution is handled by
//! registered upcasters; payloads with unknown future versions are
//! quarantined and reported, never silently dropped.

use blessed_store_core::{Event, EventJournal, StoreError};

pub mod positions;
pub mod regime;
pub mod snapshot;
pub mod upcast;
pub mod weights;

pub use positions::{PortfolioStats, Position, PositionsProjection};
pub use regime::RegimeProjection;
pub use snapshot::snapshot_draft;
pub use upcast::{QuarantinedEvent, UpcasterRegistry};
pub use weights::WeightsProjection;

/// Chunk size used when replaying the journal.
const REPLAY_CHUNK: u64 = 512;

/// Errors raised while deriving projections.
#[derive(Debug, thiserror::Error)]
pub enum ProjectionError {
    /// The underlying journal failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// An upcaster rejected a historical payload.
    #[error("upcast failed for {kind} v{version} at seq {seq}: {detail}")]
    UpcastFailed {
        /// Event kind.
        kind: String,
        /// Source schema version.
        version: String,
        /// Sequence number of the offending event.
        seq: u64,
        /// Diagnosis.
        detail: String,
    },
}

/// A deterministic fold over events.
///
/// `apply` must be total: events a projection does not understand are
/// skipped, and malformed payloads of understood kinds are counted as
/// skipped rather than panicking. `state` renders the full view as a JSON
/// value; replay equivalence is asserted over its canonical bytes.
pub trait Projection: Send {
    /// Stable name of this view.
    fn name(&self) -> &'static str;

    /// Fold one event into the view.
    fn apply(&mut self, event: &Event);

    /// Drop all derived state.
    fn reset(&mut self);

    /// Render the full view deterministically.
    fn state(&self) -> serde_json::Value;
}

/// Outcome of a [`replay`] pass.
#[derive(Debug, Default)]
pub struct ReplayReport {
    /// Events folded into the projections.
    pub applied: u64,
    /// Events withheld because no upcaster understands their version.
    pub quarantined: Vec<QuarantinedEvent>,
}

/// Re-derive projections from the journal over `from..=to`.
///
/// Events pass through the upcaster registry first, so projections always
/// observe current-shape payloads regardless of when they were written.
pub async fn replay(
    journal: &dyn EventJournal,
    from: u64,
    to: u64,
    registry: &UpcasterRegistry,
    projections: &mut [&mut dyn Projection],
) -> Result<ReplayReport, ProjectionError> {
    let mut report = ReplayReport::default();
    let mut cursor = from;
    while cursor <= to {
        let chunk_end = cursor.saturating_add(REPLAY_CHUNK - 1).min(to);
        let events = journal.scan(cursor, chunk_end).await?;
        if events.is_empty() {
            break;
        }
        for event in &events {
            match registry.normalize(event)? {
                upcast::Normalized::Current(event) => {
                    for projection in projections.iter_mut() {
                        projection.apply(&event);
                    }
                    report.applied += 1;
                }
                upcast::Normalized::Quarantined(entry) => {
                    report.quarantined.push(entry);
                }
            }
        }
        cursor = chunk_end + 1;
    }
    Ok(report)
}

/// Rebuild projections from genesis to the journal tip.
pub async fn replay_from_genesis(
    journal: &dyn EventJournal,
    registry: &UpcasterRegistry,
    projections: &mut [&mut dyn Projection],
) -> Result<ReplayReport, ProjectionError> {
    for projection in projections.iter_mut() {
        projection.reset();
    }
    let head = journal.head().await?;
    match head {
        Some((head_seq, _)) => replay(journal, 0, head_seq, registry, projections).await,
        None => Ok(ReplayReport::default()),
    }
}
