//! The unlocked signing capability handed to journal drivers.
//!
//! Signing is serialized behind an internal mutex; `try_sign` never waits.
//! Sealing the signer drops the private key (zeroized by the key type) and
//! subsequent signing attempts fail with `Unavailable` instead of blocking.

use std::sync::Mutex;

use ed25519_dalek::{Signature, Signer as DalekSigner, SigningKey, VerifyingKey};
use zeroize::Zeroizing;

use blessed_store_core::chain::node_id_for_key;
use blessed_store_core::{Signer, SignerError};
use blessed_types::NodeId;

/// Signing identity holding the unlocked Ed25519 key.
pub struct NodeSigner {
    node_id: NodeId,
    verifying_key: VerifyingKey,
    key: Mutex<Option<SigningKey>>,
}

impl NodeSigner {
    /// Construct from a 32-byte seed. The caller's seed buffer should be
    /// zeroizing; this function keeps no additional copies.
    pub fn from_seed(seed: &Zeroizing<[u8; 32]>) -> Self {
        let key = SigningKey::from_bytes(seed);
        let verifying_key = key.verifying_key();
        Self {
            node_id: node_id_for_key(&verifying_key),
            verifying_key,
            key: Mutex::new(Some(key)),
        }
    }

    /// Deterministic signer from a single seed byte. Development and test
    /// use only; real identities come from [`crate::Keystore`].
    pub fn dev(seed: u8) -> Self {
        Self::from_seed(&Zeroizing::new([seed; 32]))
    }

    /// Public key bytes, for genesis payloads and operator tooling.
    pub fn verifying_key_bytes(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    /// Drop the private key. Further `try_sign` calls fail with
    /// `Unavailable` until the keystore is unlocked again.
    pub fn seal(&self) {
        if let Ok(mut guard) = self.key.lock() {
            // SigningKey zeroizes its material on drop.
            guard.take();
        }
    }

    /// True while the private key is resident.
    pub fn is_unlocked(&self) -> bool {
        self.key.lock().map(|g| g.is_some()).unwrap_or(false)
    }
}

impl std::fmt::Debug for NodeSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material is deliberately absent from the debug output.
        f.debug_struct("NodeSigner")
            .field("node_id", &self.node_id)
            .field("unlocked", &self.is_unlocked())
            .finish()
    }
}

impl Signer for NodeSigner {
    fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    fn verifying_key(&self) -> VerifyingKey {
        self.verifying_key
    }

    fn try_sign(&self, msg: &[u8]) -> Result<Signature, SignerError> {
        let guard = self.key.try_lock().map_err(|_| SignerError::Unavailable)?;
        match guard.as_ref() {
            Some(key) => Ok(key.sign(msg)),
            None => Err(SignerError::Unavailable),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::Verifier;

    fn test_signer() -> NodeSigner {
        NodeSigner::from_seed(&Zeroizing::new([42u8; 32]))
    }

    #[test]
    fn signatures_verify_under_public_key() {
        let signer = test_signer();
        let sig = signer.try_sign(b"payload").unwrap();
        signer.verifying_key().verify(b"payload", &sig).unwrap();
    }

    #[test]
    fn sealed_signer_is_unavailable() {
        let signer = test_signer();
        assert!(signer.is_unlocked());
        signer.seal();
        assert!(!signer.is_unlocked());
        assert_eq!(signer.try_sign(b"x"), Err(SignerError::Unavailable));
    }

    #[test]
    fn debug_output_has_no_key_material() {
        let signer = test_signer();
        let rendered = format!("{signer:?}");
        assert!(rendered.contains("node_id"));
        assert!(rendered.contains("unlocked"));
        assert!(!rendered.contains("SigningKey"));
    }
}
