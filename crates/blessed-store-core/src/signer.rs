//! Signing capability consumed by the append path.
//!
//! The store treats the signer as an injected capability object: drivers
//! never see private key material, only a `try_sign` surface. The concrete
//! implementation (encrypted keystore, session-unlocked key) lives in
//! `blessed-identity`; tests inject deterministic fakes.

use ed25519_dalek::{Signature, VerifyingKey};

use blessed_types::NodeId;

/// Errors surfaced by a signing capability.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignerError {
    /// The key is locked, sealed, or otherwise not currently usable.
    /// `try_sign` never blocks waiting for it.
    #[error("signer unavailable")]
    Unavailable,
    /// The signing operation itself failed.
    #[error("signing failed: {0}")]
    Failed(String),
}

/// A node's long-lived signing identity.
///
/// Implementations serialize signing internally; `try_sign` is non-blocking
/// and fails with [`SignerError::Unavailable`] rather than waiting when the
/// key is not usable (e.g. unlocked only while a session is active).
pub trait Signer: Send + Sync {
    /// Stable identifier of the signing identity.
    fn node_id(&self) -> &NodeId;

    /// Public verification key corresponding to the signing key.
    fn verifying_key(&self) -> VerifyingKey;

    /// Sign `msg`, without blocking on key availability.
    fn try_sign(&self, msg: &[u8]) -> Result<Signature, SignerError>;
}
