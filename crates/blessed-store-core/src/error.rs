//! Ledger error taxonomy.
//!
//! Errors are grouped by kind: fatal ledger errors stop the writer and
//! require operator intervention; policy and input errors are reported to
//! the caller with no state change; transient errors are recorded and the
//! operation is not retried automatically. Every variant maps to a stable
//! string code usable for automation.

/// Errors produced by the event store and its drivers.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    //── fatal ledger errors ──────────────────────────────
    /// Hash or signature mismatch, linkage discontinuity, or missing
    /// coverage at verification time. The store refuses further writes.
    #[error("chain broken at seq {seq}: {detail}")]
    ChainBroken {
        /// Sequence number of the offending event.
        seq: u64,
        /// Human-readable diagnosis.
        detail: String,
    },
    /// Genesis event missing, malformed, or bound to a different key.
    #[error("genesis mismatch: {0}")]
    GenesisMismatch(String),
    /// Another process holds the write lease.
    #[error("another writer holds the journal lease: {0}")]
    WriterBusy(String),
    /// The signer refused or could not produce a signature.
    #[error("signer unavailable")]
    SignerUnavailable,
    /// The journal reached its configured capacity.
    #[error("store full: limit {limit} events")]
    StoreFull {
        /// Configured maximum number of events.
        limit: u64,
    },
    /// The write transaction observed a tip that moved underneath it.
    #[error("append conflict: {0}")]
    Conflict(String),

    //── input errors ─────────────────────────────────────
    /// Event kind is malformed or outside the permitted namespace.
    #[error("invalid event type: {0}")]
    InvalidType(String),
    /// Payload schema version is not known to any registered upcaster.
    #[error("unknown schema version {version} for {kind}")]
    SchemaVersionUnknown {
        /// Event kind.
        kind: String,
        /// Offending version string.
        version: String,
    },
    /// An event with the same `(kind, dedupe_key)` already exists.
    #[error("duplicate dedupe key {key:?} for {kind}")]
    DuplicateDedupeKey {
        /// Event kind.
        kind: String,
        /// Offending dedupe key.
        key: String,
    },
    /// A batch exceeded the single-transaction limit; nothing was committed.
    #[error("batch of {len} events exceeds transaction limit {max}")]
    BatchTooLarge {
        /// Batch length submitted.
        len: usize,
        /// Configured per-transaction maximum.
        max: usize,
    },
    /// Payload or header field failed validation.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    /// No event exists at the requested sequence number.
    #[error("no event at seq {0}")]
    EventNotFound(u64),

    //── driver / IO ──────────────────────────────────────
    /// Storage backend failure (IO, SQL, serialization).
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Stable machine-readable code for automation.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ChainBroken { .. } => "chain_broken",
            Self::GenesisMismatch(_) => "genesis_mismatch",
            Self::WriterBusy(_) => "writer_busy",
            Self::SignerUnavailable => "signer_unavailable",
            Self::StoreFull { .. } => "store_full",
            Self::Conflict(_) => "conflict",
            Self::InvalidType(_) => "invalid_type",
            Self::SchemaVersionUnknown { .. } => "schema_version_unknown",
            Self::DuplicateDedupeKey { .. } => "duplicate_dedupe_key",
            Self::BatchTooLarge { .. } => "batch_too_large",
            Self::InvalidPayload(_) => "invalid_payload",
            Self::EventNotFound(_) => "event_not_found",
            Self::Backend(_) => "backend_error",
        }
    }

    /// Fatal ledger errors stop the writer until an operator intervenes.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ChainBroken { .. }
                | Self::GenesisMismatch(_)
                | Self::WriterBusy(_)
                | Self::SignerUnavailable
                | Self::StoreFull { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            StoreError::ChainBroken {
                seq: 3,
                detail: "x".into()
            }
            .code(),
            "chain_broken"
        );
        assert_eq!(StoreError::SignerUnavailable.code(), "signer_unavailable");
        assert_eq!(
            StoreError::DuplicateDedupeKey {
                kind: "a.b".into(),
                key: "k".into()
            }
            .code(),
            "duplicate_dedupe_key"
        );
    }

    #[test]
    fn fatality_classification() {
        assert!(StoreError::GenesisMismatch("k".into()).is_fatal());
        assert!(StoreError::WriterBusy("locked".into()).is_fatal());
        assert!(!StoreError::InvalidType("x".into()).is_fatal());
        assert!(!StoreError::EventNotFound(9).is_fatal());
    }
}
