#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **blessed-store-core** – Event model, canonical hashing and journal
//! contracts for the Blessed ledger.
//!
//! This crate provides the fundamental ledger primitives used throughout the
//! workspace: the signed [`Event`] record, the deterministic canonical
//! encoding that is the wire compatibility surface, the SHA-256 hash chain
//! with its signed genesis anchor, and the [`EventJournal`] trait that
//! storage drivers (SQLite, in-memory) implement in separate crates.
//!
//! Nothing in here performs I/O; drivers own durability, this crate owns
//! *meaning* – what an event is, how it hashes, and when a chain is valid.

use chrono::{DateTime, Utc};
use ed25519_dalek::Signature;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use blessed_types::NodeId;

pub mod canonical;
pub mod chain;
pub mod error;
pub mod journal;
pub mod payloads;
pub mod seal;
pub mod signer;
pub mod verify;

pub use canonical::canonical_payload_bytes;
pub use chain::{event_hash, genesis_prev_hash, header_bytes, signing_bytes, EventHash};
pub use error::StoreError;
pub use journal::{EventJournal, JournalConfig};
pub use seal::{checkpoint_draft, genesis_draft, seal_draft, seal_genesis, verify_event};
pub use signer::{Signer, SignerError};
pub use verify::{verify_chain, VerifyMode, VerifyReport};

//─────────────────────────────
//  Event record
//─────────────────────────────

/// The atomic append unit: signed, hashed, and linked to its predecessor.
///
/// `seq` is the authoritative ordering; `ts` is informational only. The
/// `(prev_hash, hash)` pair links the record into the chain and `signature`
/// binds it to the node identity named in `signer`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Opaque 128-bit unique identifier, allocated at draft creation.
    pub event_id: Uuid,
    /// Strictly increasing, gap-free append index. Authoritative ordering.
    pub seq: u64,
    /// Wall-clock commit timestamp (nanosecond precision, UTC).
    pub ts: DateTime<Utc>,
    /// Dotted type tag, e.g. `signal.ta.rsi.v1`.
    pub kind: String,
    /// Schema version of the payload, versioned per kind.
    pub schema_version: String,
    /// Optional producer / subsystem identifier.
    pub source: Option<String>,
    /// Optional correlation identifier.
    pub trace_id: Option<String>,
    /// Optional idempotency key, unique per kind.
    pub dedupe_key: Option<String>,
    /// Structured payload; always a JSON object.
    pub payload: serde_json::Value,
    /// Hash of the preceding event, or the signed genesis anchor at `seq` 0.
    pub prev_hash: EventHash,
    /// SHA-256 over the canonical header and payload bytes.
    pub hash: EventHash,
    /// Node identity that signed this event.
    pub signer: NodeId,
    /// Ed25519 signature over `(hash, signer)`.
    pub signature: Signature,
}

impl Event {
    /// Nanosecond timestamp used in the canonical header encoding.
    ///
    /// Fails only for dates outside the ~584-year `i64` nanosecond range,
    /// which validation rejects before sealing.
    pub fn ts_nanos(&self) -> Result<i64, StoreError> {
        self.ts
            .timestamp_nanos_opt()
            .ok_or_else(|| StoreError::InvalidPayload("timestamp outside nanosecond range".into()))
    }
}

//─────────────────────────────
//  Event draft
//─────────────────────────────

/// Unsigned input to the append path.
///
/// The `event_id` is allocated when the draft is created so that linked
/// drafts in one batch (e.g. a signal and its attribution record) can
/// reference each other before either is sealed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDraft {
    /// Pre-allocated event identifier.
    pub event_id: Uuid,
    /// Dotted type tag.
    pub kind: String,
    /// Payload schema version, defaults to `"1"`.
    pub schema_version: String,
    /// Optional producer / subsystem identifier.
    pub source: Option<String>,
    /// Optional correlation identifier.
    pub trace_id: Option<String>,
    /// Optional idempotency key, unique per kind.
    pub dedupe_key: Option<String>,
    /// Structured payload; must be a JSON object.
    pub payload: serde_json::Value,
}

impl EventDraft {
    /// Create a draft with a fresh `event_id` and schema version `"1"`.
    pub fn new(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            kind: kind.into(),
            schema_version: "1".to_string(),
            source: None,
            trace_id: None,
            dedupe_key: None,
            payload,
        }
    }

    /// Set the producer identifier.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Set the correlation identifier.
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    /// Set the idempotency key.
    pub fn with_dedupe_key(mut self, dedupe_key: impl Into<String>) -> Self {
        self.dedupe_key = Some(dedupe_key.into());
        self
    }

    /// Set the payload schema version.
    pub fn with_schema_version(mut self, version: impl Into<String>) -> Self {
        self.schema_version = version.into();
        self
    }

    /// Validate the draft against the primitive-level limits.
    ///
    /// Optional header fields must be non-empty when present: the canonical
    /// header encodes an absent field as the empty string, so an empty
    /// `source` would be indistinguishable from no source at all.
    pub fn validate(&self) -> Result<(), StoreError> {
        blessed_types::validate_kind(&self.kind)
            .map_err(|e| StoreError::InvalidType(e.to_string()))?;
        if self.schema_version.is_empty()
            || self.schema_version.len() > 16
            || !self
                .schema_version
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'.')
        {
            return Err(StoreError::InvalidPayload(format!(
                "malformed schema_version {:?}",
                self.schema_version
            )));
        }
        check_optional("source", &self.source, blessed_types::MAX_SOURCE_LEN)?;
        check_optional("trace_id", &self.trace_id, blessed_types::MAX_TRACE_ID_LEN)?;
        check_optional(
            "dedupe_key",
            &self.dedupe_key,
            blessed_types::MAX_DEDUPE_KEY_LEN,
        )?;
        let bytes = canonical_payload_bytes(&self.payload)?;
        if bytes.len() > blessed_types::MAX_PAYLOAD_BYTES {
            return Err(StoreError::InvalidPayload(format!(
                "payload too large: {} > {}",
                bytes.len(),
                blessed_types::MAX_PAYLOAD_BYTES
            )));
        }
        Ok(())
    }
}

fn check_optional(
    field: &'static str,
    value: &Option<String>,
    max: usize,
) -> Result<(), StoreError> {
    if let Some(v) = value {
        if v.is_empty() {
            return Err(StoreError::InvalidPayload(format!(
                "{field} must be omitted rather than empty"
            )));
        }
        if v.len() > max {
            return Err(StoreError::InvalidPayload(format!(
                "{field} exceeds maximum length ({} > {max})",
                v.len()
            )));
        }
        if v.bytes().any(|b| b < 0x20) {
            return Err(StoreError::InvalidPayload(format!(
                "{field} contains control bytes"
            )));
        }
    }
    Ok(())
}

//─────────────────────────────
//  Convenience re-exports
//─────────────────────────────

/// Convenient prelude for importing the most common types.
pub mod prelude {
    pub use super::{
        canonical_payload_bytes, event_hash, genesis_prev_hash, header_bytes, seal_draft,
        seal_genesis, signing_bytes, verify_chain, verify_event, Event, EventDraft, EventHash,
        EventJournal, JournalConfig, Signer, SignerError, StoreError, VerifyMode, VerifyReport,
    };
    pub use crate::payloads::{CheckpointPayload, GenesisPayload};
}
