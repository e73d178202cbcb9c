#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **blessed-identity** – Node signing identity and encrypted keystore for
//! the Blessed ledger.
//!
//! A node owns exactly one long-lived Ed25519 identity used for event
//! signatures and checkpoints. The private seed lives on disk sealed under
//! AES-256-GCM with a key derived from the operator passphrase via Argon2id;
//! plaintext seed files are refused unless the explicit development flag is
//! set. The unlocked key is held behind [`NodeSigner`], which exposes a
//! non-blocking `try_sign` and never exports raw key bytes to callers.

use std::path::Path;

use ed25519_dalek::VerifyingKey;

use blessed_store_core::chain::node_id_for_key;
use blessed_types::NodeId;

pub mod keystore;
pub mod signer;

pub use keystore::{Keystore, KeystoreOptions};
pub use signer::NodeSigner;

/// Errors raised by identity and keystore operations.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// Filesystem failure reading or writing the keystore.
    #[error("keystore io: {0}")]
    Io(#[from] std::io::Error),
    /// Keystore file is not in a recognized format.
    #[error("malformed keystore: {0}")]
    Malformed(String),
    /// Key derivation failed (bad parameters).
    #[error("key derivation failed: {0}")]
    Kdf(String),
    /// Decryption failed; in practice this means a wrong passphrase.
    #[error("keystore decryption failed (wrong passphrase?)")]
    Decrypt,
    /// A plaintext seed file was found without the development flag.
    #[error("plaintext keystore refused outside development mode")]
    PlaintextRefused,
    /// Decrypted material does not form a valid signing key.
    #[error("invalid key material: {0}")]
    InvalidKey(String),
    /// The unlocked key does not match the expected public key.
    #[error("keystore public key does not match expected identity")]
    IdentityMismatch,
}

/// Public half of a node identity: the stable id plus verification key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    /// Stable node identifier derived from the public key.
    pub node_id: NodeId,
    /// Ed25519 verification key.
    pub verifying_key: VerifyingKey,
}

impl NodeIdentity {
    /// Derive the identity for a verification key.
    pub fn from_verifying_key(verifying_key: VerifyingKey) -> Self {
        Self {
            node_id: node_id_for_key(&verifying_key),
            verifying_key,
        }
    }

    /// Hex encoding of the public key, as committed in genesis payloads.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.verifying_key.as_bytes())
    }
}

/// Convenience: generate a keystore if absent, otherwise unlock it.
pub fn load_or_generate(
    path: impl AsRef<Path>,
    passphrase: &str,
    options: &KeystoreOptions,
) -> Result<NodeSigner, IdentityError> {
    let path = path.as_ref();
    if path.exists() {
        Keystore::unlock(path, passphrase, options)
    } else {
        Keystore::generate(path, passphrase, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;

    #[test]
    fn identity_round_trip() {
        let key = SigningKey::from_bytes(&[5u8; 32]);
        let identity = NodeIdentity::from_verifying_key(key.verifying_key());
        assert_eq!(identity.public_key_hex().len(), 64);
        assert_eq!(identity.node_id.as_str().len(), 32);
    }
}
