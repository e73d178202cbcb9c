//! Header encoding, event hashing and the signed genesis anchor.
//!
//! The hash of an event covers a fixed-order header region and the canonical
//! payload region, separated so that no payload byte sequence can alias a
//! header continuation. Header fields never contain bytes below `0x20`
//! (draft validation enforces this), so the `0x1F` unit separator is
//! unambiguous; `0x00` closes the header region.

use ed25519_dalek::VerifyingKey;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use blessed_types::NodeId;

/// SHA-256 digest linking an event into the chain.
pub type EventHash = [u8; 32];

/// Domain tag mixed into the genesis anchor. Splicing a chain under a
/// different key changes this anchor and is therefore detectable.
pub const GENESIS_DOMAIN_TAG: &[u8] = b"b1e55ed-genesis";

/// Separator between header fields.
pub const HEADER_FIELD_SEPARATOR: u8 = 0x1F;

/// Separator closing the header region before the payload bytes.
pub const HEADER_PAYLOAD_SEPARATOR: u8 = 0x00;

/// Encode the fixed-order header region.
///
/// Absent optional fields encode as the empty string; drafts reject empty
/// strings for those fields so the two cases cannot collide.
#[allow(clippy::too_many_arguments)]
pub fn header_bytes(
    event_id: &Uuid,
    seq: u64,
    ts_nanos: i64,
    kind: &str,
    schema_version: &str,
    source: Option<&str>,
    trace_id: Option<&str>,
    dedupe_key: Option<&str>,
    prev_hash: &EventHash,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(160);
    let push = |field: &[u8], out: &mut Vec<u8>| {
        out.extend_from_slice(field);
        out.push(HEADER_FIELD_SEPARATOR);
    };
    push(event_id.hyphenated().to_string().as_bytes(), &mut out);
    push(seq.to_string().as_bytes(), &mut out);
    push(ts_nanos.to_string().as_bytes(), &mut out);
    push(kind.as_bytes(), &mut out);
    push(schema_version.as_bytes(), &mut out);
    push(source.unwrap_or("").as_bytes(), &mut out);
    push(trace_id.unwrap_or("").as_bytes(), &mut out);
    push(dedupe_key.unwrap_or("").as_bytes(), &mut out);
    push(hex::encode(prev_hash).as_bytes(), &mut out);
    out.push(HEADER_PAYLOAD_SEPARATOR);
    out
}

/// `SHA-256(header_bytes || canonical_payload_bytes)`.
pub fn event_hash(header: &[u8], canonical_payload: &[u8]) -> EventHash {
    let mut hasher = Sha256::new();
    hasher.update(header);
    hasher.update(canonical_payload);
    hasher.finalize().into()
}

/// The genesis `prev_hash`: `SHA-256("b1e55ed-genesis" || public_key)`.
pub fn genesis_prev_hash(public_key: &VerifyingKey) -> EventHash {
    let mut hasher = Sha256::new();
    hasher.update(GENESIS_DOMAIN_TAG);
    hasher.update(public_key.as_bytes());
    hasher.finalize().into()
}

/// Bytes placed under the Ed25519 signature: the event hash followed by the
/// signer identifier, so a signature cannot be replayed under another node id.
pub fn signing_bytes(hash: &EventHash, signer: &NodeId) -> Vec<u8> {
    let mut out = Vec::with_capacity(32 + signer.as_str().len());
    out.extend_from_slice(hash);
    out.extend_from_slice(signer.as_str().as_bytes());
    out
}

/// Derive the stable node identifier for a public key: the hex encoding of
/// the first 16 bytes of `SHA-256(public_key)`.
pub fn node_id_for_key(public_key: &VerifyingKey) -> NodeId {
    let digest: [u8; 32] = Sha256::digest(public_key.as_bytes()).into();
    NodeId(hex::encode(&digest[..16]))
}
