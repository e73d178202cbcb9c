//! Turning drafts into committed events: hashing, signing, genesis and
//! checkpoint construction. Shared by every journal driver so the two
//! drivers cannot drift apart on the sealing algorithm.

use chrono::{DateTime, Utc};
use ed25519_dalek::{Verifier, VerifyingKey};

use blessed_types::{KIND_CHECKPOINT, KIND_GENESIS, NodeId};

use crate::canonical::canonical_payload_bytes;
use crate::chain::{
    event_hash, genesis_prev_hash, header_bytes, node_id_for_key, signing_bytes, EventHash,
};
use crate::error::StoreError;
use crate::payloads::{to_value, CheckpointPayload, GenesisPayload};
use crate::signer::{Signer, SignerError};
use crate::{Event, EventDraft};

/// Seal a validated draft into a signed event at the given chain position.
///
/// The caller (a journal driver) supplies `seq` and `prev_hash` read inside
/// its write transaction; this function is pure apart from the signer call.
pub fn seal_draft(
    draft: &EventDraft,
    seq: u64,
    prev_hash: EventHash,
    ts: DateTime<Utc>,
    signer: &dyn Signer,
) -> Result<Event, StoreError> {
    draft.validate()?;
    let ts_nanos = ts
        .timestamp_nanos_opt()
        .ok_or_else(|| StoreError::InvalidPayload("timestamp outside nanosecond range".into()))?;
    let payload_bytes = canonical_payload_bytes(&draft.payload)?;
    let header = header_bytes(
        &draft.event_id,
        seq,
        ts_nanos,
        &draft.kind,
        &draft.schema_version,
        draft.source.as_deref(),
        draft.trace_id.as_deref(),
        draft.dedupe_key.as_deref(),
        &prev_hash,
    );
    let hash = event_hash(&header, &payload_bytes);
    let node_id = signer.node_id().clone();
    let signature = signer
        .try_sign(&signing_bytes(&hash, &node_id))
        .map_err(|e| match e {
            SignerError::Unavailable => StoreError::SignerUnavailable,
            SignerError::Failed(msg) => StoreError::Backend(format!("signing failed: {msg}")),
        })?;
    Ok(Event {
        event_id: draft.event_id,
        seq,
        ts,
        kind: draft.kind.clone(),
        schema_version: draft.schema_version.clone(),
        source: draft.source.clone(),
        trace_id: draft.trace_id.clone(),
        dedupe_key: draft.dedupe_key.clone(),
        payload: draft.payload.clone(),
        prev_hash,
        hash,
        signer: node_id,
        signature,
    })
}

/// Build the genesis draft for a fresh journal.
pub fn genesis_draft(signer: &dyn Signer, created_at: DateTime<Utc>) -> Result<EventDraft, StoreError> {
    let payload = GenesisPayload {
        public_key: hex::encode(signer.verifying_key().as_bytes()),
        node_id: signer.node_id().clone(),
        created_at,
    };
    Ok(EventDraft::new(KIND_GENESIS, to_value(&payload)?))
}

/// Seal the genesis event: `seq` 0, `prev_hash` anchored to the signer key.
pub fn seal_genesis(signer: &dyn Signer, ts: DateTime<Utc>) -> Result<Event, StoreError> {
    let draft = genesis_draft(signer, ts)?;
    let anchor = genesis_prev_hash(&signer.verifying_key());
    seal_draft(&draft, 0, anchor, ts, signer)
}

/// Build a checkpoint draft committing to `(seq, hash)`.
pub fn checkpoint_draft(
    seq: u64,
    hash: &EventHash,
    node_id: &NodeId,
) -> Result<EventDraft, StoreError> {
    let payload = CheckpointPayload {
        seq,
        hash: hex::encode(hash),
        node_id: node_id.clone(),
    };
    Ok(EventDraft::new(KIND_CHECKPOINT, to_value(&payload)?))
}

/// Recompute an event's hash and check its signature against `key`.
///
/// This checks internal consistency of a single record; chain linkage is
/// the verifier's job (see [`crate::verify`]).
pub fn verify_event(event: &Event, key: &VerifyingKey) -> Result<(), StoreError> {
    let payload_bytes = canonical_payload_bytes(&event.payload)?;
    let ts_nanos = event.ts_nanos()?;
    let header = header_bytes(
        &event.event_id,
        event.seq,
        ts_nanos,
        &event.kind,
        &event.schema_version,
        event.source.as_deref(),
        event.trace_id.as_deref(),
        event.dedupe_key.as_deref(),
        &event.prev_hash,
    );
    let recomputed = event_hash(&header, &payload_bytes);
    if recomputed != event.hash {
        return Err(StoreError::ChainBroken {
            seq: event.seq,
            detail: "stored hash does not match recomputed hash".into(),
        });
    }
    if node_id_for_key(key) != event.signer {
        return Err(StoreError::ChainBroken {
            seq: event.seq,
            detail: format!("signer {} does not match chain key", event.signer),
        });
    }
    key.verify(&signing_bytes(&event.hash, &event.signer), &event.signature)
        .map_err(|_| StoreError::ChainBroken {
            seq: event.seq,
            detail: "signature verification failed".into(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signature, SigningKey};
    use serde_json::json;

    /// Deterministic in-memory signer for sealing tests.
    struct TestSigner {
        key: SigningKey,
        node_id: NodeId,
    }

    impl TestSigner {
        fn new(seed: u8) -> Self {
            let key = SigningKey::from_bytes(&[seed; 32]);
            let node_id = node_id_for_key(&key.verifying_key());
            Self { key, node_id }
        }
    }

    impl Signer for TestSigner {
        fn node_id(&self) -> &NodeId {
            &self.node_id
        }
        fn verifying_key(&self) -> VerifyingKey {
            self.key.verifying_key()
        }
        fn try_sign(&self, msg: &[u8]) -> Result<Signature, SignerError> {
            use ed25519_dalek::Signer as _;
            Ok(self.key.sign(msg))
        }
    }

    #[test]
    fn sealed_event_verifies() {
        let signer = TestSigner::new(1);
        let draft = EventDraft::new("signal.ta.rsi.v1", json!({"asset": "BTC", "rsi": 24.1}));
        let event = seal_draft(&draft, 5, [3u8; 32], Utc::now(), &signer).unwrap();
        assert_eq!(event.seq, 5);
        assert_eq!(event.prev_hash, [3u8; 32]);
        verify_event(&event, &signer.verifying_key()).unwrap();
    }

    #[test]
    fn tampered_payload_fails_verification() {
        let signer = TestSigner::new(1);
        let draft = EventDraft::new("signal.ta.rsi.v1", json!({"rsi": 24.1}));
        let mut event = seal_draft(&draft, 1, [0u8; 32], Utc::now(), &signer).unwrap();
        event.payload = json!({"rsi": 99.9});
        assert!(matches!(
            verify_event(&event, &signer.verifying_key()),
            Err(StoreError::ChainBroken { seq: 1, .. })
        ));
    }

    #[test]
    fn wrong_key_fails_verification() {
        let signer = TestSigner::new(1);
        let other = TestSigner::new(2);
        let draft = EventDraft::new("signal.ta.rsi.v1", json!({"rsi": 24.1}));
        let event = seal_draft(&draft, 1, [0u8; 32], Utc::now(), &signer).unwrap();
        assert!(verify_event(&event, &other.verifying_key()).is_err());
    }

    #[test]
    fn genesis_has_anchor_and_key_payload() {
        let signer = TestSigner::new(7);
        let genesis = seal_genesis(&signer, Utc::now()).unwrap();
        assert_eq!(genesis.seq, 0);
        assert_eq!(genesis.kind, KIND_GENESIS);
        assert_eq!(
            genesis.prev_hash,
            genesis_prev_hash(&signer.verifying_key())
        );
        let payload: GenesisPayload = crate::payloads::from_value(&genesis.payload).unwrap();
        assert_eq!(
            payload.public_key,
            hex::encode(signer.verifying_key().as_bytes())
        );
        assert_eq!(payload.node_id, *signer.node_id());
        verify_event(&genesis, &signer.verifying_key()).unwrap();
    }

    #[test]
    fn unavailable_signer_maps_to_store_error() {
        struct SealedSigner(NodeId, VerifyingKey);
        impl Signer for SealedSigner {
            fn node_id(&self) -> &NodeId {
                &self.0
            }
            fn verifying_key(&self) -> VerifyingKey {
                self.1
            }
            fn try_sign(&self, _msg: &[u8]) -> Result<Signature, SignerError> {
                Err(SignerError::Unavailable)
            }
        }
        let key = SigningKey::from_bytes(&[4u8; 32]);
        let sealed = SealedSigner(node_id_for_key(&key.verifying_key()), key.verifying_key());
        let draft = EventDraft::new("signal.ta.rsi.v1", json!({}));
        assert!(matches!(
            seal_draft(&draft, 1, [0u8; 32], Utc::now(), &sealed),
            Err(StoreError::SignerUnavailable)
        ));
    }
}
