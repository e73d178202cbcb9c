//! Typed payload shapes for the system events the store itself emits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use blessed_types::NodeId;

use crate::chain::EventHash;
use crate::error::StoreError;

/// Payload of `system.genesis.v1`: commits the chain to the node key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenesisPayload {
    /// Hex-encoded Ed25519 public key of the signing identity.
    pub public_key: String,
    /// Node identifier derived from the public key.
    pub node_id: NodeId,
    /// Journal creation time.
    pub created_at: DateTime<Utc>,
}

/// Payload of `system.checkpoint.v1`: a signed `{seq, hash}` commitment
/// giving fast verification an anchor inside the chain body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointPayload {
    /// Sequence number being committed to.
    pub seq: u64,
    /// Hex-encoded hash of the event at `seq`.
    pub hash: String,
    /// Node identifier of the checkpoint signer.
    pub node_id: NodeId,
}

impl CheckpointPayload {
    /// Decode the hex hash field.
    pub fn hash_bytes(&self) -> Result<EventHash, StoreError> {
        decode_hash(&self.hash)
    }
}

/// Decode a 64-character hex digest.
pub fn decode_hash(hex_str: &str) -> Result<EventHash, StoreError> {
    let bytes = hex::decode(hex_str)
        .map_err(|e| StoreError::InvalidPayload(format!("malformed hash hex: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| StoreError::InvalidPayload("hash must be 32 bytes".into()))
}

/// Deserialize a typed payload from an event's JSON value.
pub fn from_value<T: for<'de> Deserialize<'de>>(
    value: &serde_json::Value,
) -> Result<T, StoreError> {
    serde_json::from_value(value.clone())
        .map_err(|e| StoreError::InvalidPayload(format!("payload decode: {e}")))
}

/// Serialize a typed payload into an event's JSON value.
pub fn to_value<T: Serialize>(payload: &T) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(payload)
        .map_err(|e| StoreError::InvalidPayload(format!("payload encode: {e}")))
}
