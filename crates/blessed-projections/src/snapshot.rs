//! Signed projection snapshots.
//!
//! A snapshot is an ordinary event (`system.snapshot.v1`) whose payload
//! captures a projection's full state at a sequence number. Snapshots ride
//! alongside the log to accelerate restart; the log itself is never
//! truncated and a snapshot is never load-bearing for correctness.

use serde_json::json;

use blessed_store_core::{EventDraft, StoreError};
use blessed_types::KIND_SNAPSHOT;

use crate::Projection;

/// Build a snapshot draft for a projection's state as of `as_of_seq`.
///
/// The append path signs the draft like any other event, so a snapshot
/// carries the same authenticity guarantees as the records it summarizes.
pub fn snapshot_draft(projection: &dyn Projection, as_of_seq: u64) -> Result<EventDraft, StoreError> {
    let payload = json!({
        "projection": projection.name(),
        "as_of_seq": as_of_seq,
        "state": projection.state(),
    });
    Ok(EventDraft::new(KIND_SNAPSHOT, payload)
        .with_dedupe_key(format!("{}-{as_of_seq}", projection.name())))
}
