//! Chain verification: full walks and checkpoint-anchored fast checks.
//!
//! Fast verification alone would accept a journal whose middle had been cut
//! out and re-linked, so it must re-anchor: at least one signed checkpoint
//! below the inspected window has to vouch for the chain body, and the row
//! count has to match the head sequence. Full verification is the default;
//! fast is an explicit opt-in.

use ed25519_dalek::VerifyingKey;
use tracing::debug;

use blessed_types::{KIND_CHECKPOINT, KIND_GENESIS};

use crate::chain::{genesis_prev_hash, node_id_for_key};
use crate::error::StoreError;
use crate::journal::EventJournal;
use crate::payloads::{from_value, CheckpointPayload, GenesisPayload};
use crate::seal::verify_event;
use crate::Event;

/// Chunk size for full-verification scans.
const SCAN_CHUNK: u64 = 512;

/// How much of the chain a verification pass inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyMode {
    /// Recompute every hash, check every signature, follow every link. O(n).
    Full,
    /// Verify the newest `window` events plus one checkpoint anchor below
    /// the window. Requires a checkpoint to exist when the window does not
    /// reach genesis.
    Fast {
        /// Number of newest events to recompute.
        window: u64,
    },
}

/// Outcome of a verification pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    /// Sequence number of the newest event at verification time.
    pub head_seq: u64,
    /// Number of events whose hash and signature were recomputed.
    pub events_checked: u64,
    /// Number of checkpoint anchors verified (fast mode only).
    pub checkpoints_verified: u64,
}

/// Verify the journal's chain under the given mode.
///
/// Any mismatch is fatal and surfaces as [`StoreError::ChainBroken`] with
/// the offending sequence number, or [`StoreError::GenesisMismatch`] when
/// the chain root itself is wrong.
pub async fn verify_chain(
    journal: &dyn EventJournal,
    mode: VerifyMode,
) -> Result<VerifyReport, StoreError> {
    let (head_seq, _) = journal
        .head()
        .await?
        .ok_or_else(|| StoreError::GenesisMismatch("journal is empty".into()))?;

    let key = verify_genesis(journal).await?;

    // Row count must match the head sequence; a shortfall means rows were
    // deleted underneath the chain even if the remaining links look intact.
    let count = journal.count().await?;
    if count != head_seq + 1 {
        return Err(StoreError::ChainBroken {
            seq: head_seq,
            detail: format!("journal holds {count} events but head seq is {head_seq}"),
        });
    }

    match mode {
        VerifyMode::Full => verify_full(journal, &key, head_seq).await,
        VerifyMode::Fast { window } => verify_fast(journal, &key, head_seq, window).await,
    }
}

/// Check the genesis record and return the chain's verifying key.
async fn verify_genesis(journal: &dyn EventJournal) -> Result<VerifyingKey, StoreError> {
    let genesis = journal
        .event(0)
        .await?
        .ok_or_else(|| StoreError::GenesisMismatch("no event at seq 0".into()))?;
    if genesis.kind != KIND_GENESIS {
        return Err(StoreError::GenesisMismatch(format!(
            "first event has kind {}, expected {KIND_GENESIS}",
            genesis.kind
        )));
    }
    let payload: GenesisPayload = from_value(&genesis.payload)?;
    let key_bytes: [u8; 32] = hex::decode(&payload.public_key)
        .map_err(|e| StoreError::GenesisMismatch(format!("malformed public key hex: {e}")))?
        .try_into()
        .map_err(|_| StoreError::GenesisMismatch("public key must be 32 bytes".into()))?;
    let key = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|e| StoreError::GenesisMismatch(format!("invalid public key: {e}")))?;
    if genesis.prev_hash != genesis_prev_hash(&key) {
        return Err(StoreError::GenesisMismatch(
            "genesis prev_hash is not anchored to the committed public key".into(),
        ));
    }
    if payload.node_id != node_id_for_key(&key) || genesis.signer != payload.node_id {
        return Err(StoreError::GenesisMismatch(
            "genesis node_id does not correspond to the committed public key".into(),
        ));
    }
    verify_event(&genesis, &key).map_err(|e| match e {
        StoreError::ChainBroken { detail, .. } => StoreError::GenesisMismatch(detail),
        other => other,
    })?;
    Ok(key)
}

async fn verify_full(
    journal: &dyn EventJournal,
    key: &VerifyingKey,
    head_seq: u64,
) -> Result<VerifyReport, StoreError> {
    let mut prev: Option<Event> = None;
    let mut checked = 0u64;
    let mut from = 0u64;
    while from <= head_seq {
        let to = (from + SCAN_CHUNK - 1).min(head_seq);
        let chunk = journal.scan(from, to).await?;
        let mut expected = from;
        for event in chunk {
            if event.seq != expected {
                return Err(StoreError::ChainBroken {
                    seq: expected,
                    detail: format!("expected seq {expected}, found {}", event.seq),
                });
            }
            if let Some(prev_event) = &prev {
                if event.prev_hash != prev_event.hash {
                    return Err(StoreError::ChainBroken {
                        seq: event.seq,
                        detail: "prev_hash does not match preceding event".into(),
                    });
                }
            }
            verify_event(&event, key)?;
            checked += 1;
            expected += 1;
            prev = Some(event);
        }
        if expected != to + 1 {
            return Err(StoreError::ChainBroken {
                seq: expected,
                detail: "scan returned fewer events than the range holds".into(),
            });
        }
        from = to + 1;
    }
    debug!(head_seq, checked, "full chain verification passed");
    Ok(VerifyReport {
        head_seq,
        events_checked: checked,
        checkpoints_verified: 0,
    })
}

async fn verify_fast(
    journal: &dyn EventJournal,
    key: &VerifyingKey,
    head_seq: u64,
    window: u64,
) -> Result<VerifyReport, StoreError> {
    if window == 0 {
        return Err(StoreError::InvalidPayload(
            "fast verification window must be at least 1".into(),
        ));
    }
    let start = head_seq.saturating_sub(window - 1);

    // Recompute the window itself.
    let events = journal.scan(start, head_seq).await?;
    let mut expected = start;
    let mut prev_hash = None;
    let mut checked = 0u64;
    for event in &events {
        if event.seq != expected {
            return Err(StoreError::ChainBroken {
                seq: expected,
                detail: format!("expected seq {expected}, found {}", event.seq),
            });
        }
        if let Some(prev) = prev_hash {
            if event.prev_hash != prev {
                return Err(StoreError::ChainBroken {
                    seq: event.seq,
                    detail: "prev_hash does not match preceding event".into(),
                });
            }
        }
        verify_event(event, key)?;
        checked += 1;
        expected += 1;
        prev_hash = Some(event.hash);
    }
    if expected != head_seq + 1 {
        return Err(StoreError::ChainBroken {
            seq: expected,
            detail: "verification window is missing events".into(),
        });
    }

    // Link the window to the event just below it.
    if start > 0 {
        let below = journal
            .event(start - 1)
            .await?
            .ok_or(StoreError::EventNotFound(start - 1))?;
        let first = events.first().ok_or(StoreError::EventNotFound(start))?;
        if first.prev_hash != below.hash {
            return Err(StoreError::ChainBroken {
                seq: start,
                detail: "window does not link to the preceding event".into(),
            });
        }
    }

    // Re-anchor: a signed checkpoint below the window must vouch for the
    // chain body the window cannot see.
    let mut checkpoints_verified = 0u64;
    if start > 1 {
        let anchors = journal.events_of_kind(KIND_CHECKPOINT, 0, start - 1).await?;
        let anchor = anchors.last().ok_or_else(|| StoreError::ChainBroken {
            seq: start,
            detail: "no checkpoint covers the span below the verified window".into(),
        })?;
        verify_event(anchor, key)?;
        let payload: CheckpointPayload = from_value(&anchor.payload)?;
        let target = journal
            .event(payload.seq)
            .await?
            .ok_or(StoreError::EventNotFound(payload.seq))?;
        if target.hash != payload.hash_bytes()? {
            return Err(StoreError::ChainBroken {
                seq: payload.seq,
                detail: "checkpoint commitment does not match stored event".into(),
            });
        }
        verify_event(&target, key)?;
        checkpoints_verified = 1;
    }

    debug!(
        head_seq,
        window, checked, checkpoints_verified, "fast chain verification passed"
    );
    Ok(VerifyReport {
        head_seq,
        events_checked: checked,
        checkpoints_verified,
    })
}
