//! Sealed on-disk keystore: Argon2id passphrase KDF over an AES-256-GCM
//! encrypted Ed25519 seed.
//!
//! File layout is a small JSON document carrying the KDF parameters, salt,
//! nonce and ciphertext, all base64. GCM authenticates the ciphertext, so a
//! wrong passphrase surfaces as a clean decryption failure rather than
//! garbage key material.

use std::fs;
use std::path::Path;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::{info, warn};
use zeroize::Zeroizing;

use blessed_store_core::Signer as _;

use crate::signer::NodeSigner;
use crate::IdentityError;

const KEYSTORE_VERSION: u32 = 1;
const KDF_NAME: &str = "argon2id";
const NONCE_LEN: usize = 12;

/// Keystore behaviour flags and KDF tuning.
#[derive(Debug, Clone)]
pub struct KeystoreOptions {
    /// Accept a plaintext hex seed file. Development only; defaults to off.
    pub allow_plaintext_dev: bool,
    /// Argon2id memory cost in KiB.
    pub kdf_memory_kib: u32,
    /// Argon2id iteration count.
    pub kdf_iterations: u32,
    /// Argon2id lane count.
    pub kdf_parallelism: u32,
}

impl Default for KeystoreOptions {
    fn default() -> Self {
        Self {
            allow_plaintext_dev: false,
            // OWASP-recommended interactive profile.
            kdf_memory_kib: 19_456,
            kdf_iterations: 2,
            kdf_parallelism: 1,
        }
    }
}

/// On-disk representation of a sealed key.
#[derive(Debug, Serialize, Deserialize)]
struct SealedKeyFile {
    version: u32,
    kdf: String,
    m_cost_kib: u32,
    t_cost: u32,
    p_cost: u32,
    salt: String,
    nonce: String,
    ciphertext: String,
}

/// Namespace for keystore operations.
pub struct Keystore;

impl Keystore {
    /// Generate a fresh identity, seal it at `path`, and return the
    /// unlocked signer.
    pub fn generate(
        path: &Path,
        passphrase: &str,
        options: &KeystoreOptions,
    ) -> Result<NodeSigner, IdentityError> {
        let mut seed = Zeroizing::new([0u8; 32]);
        OsRng.fill_bytes(seed.as_mut());

        let mut salt = [0u8; 16];
        OsRng.fill_bytes(&mut salt);
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);

        let kek = derive_key(passphrase, &salt, options)?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(kek.as_ref()));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), seed.as_ref() as &[u8])
            .map_err(|_| IdentityError::InvalidKey("seal failed".into()))?;

        let file = SealedKeyFile {
            version: KEYSTORE_VERSION,
            kdf: KDF_NAME.to_string(),
            m_cost_kib: options.kdf_memory_kib,
            t_cost: options.kdf_iterations,
            p_cost: options.kdf_parallelism,
            salt: BASE64.encode(salt),
            nonce: BASE64.encode(nonce_bytes),
            ciphertext: BASE64.encode(&ciphertext),
        };
        let body = serde_json::to_vec_pretty(&file)
            .map_err(|e| IdentityError::Malformed(e.to_string()))?;
        fs::write(path, body)?;

        let signer = NodeSigner::from_seed(&seed);
        info!(node_id = %signer.node_id(), path = %path.display(), "generated sealed keystore");
        Ok(signer)
    }

    /// Unlock the keystore at `path` with the operator passphrase.
    pub fn unlock(
        path: &Path,
        passphrase: &str,
        options: &KeystoreOptions,
    ) -> Result<NodeSigner, IdentityError> {
        let raw = fs::read(path)?;

        if let Ok(file) = serde_json::from_slice::<SealedKeyFile>(&raw) {
            return Self::unlock_sealed(&file, passphrase, options);
        }

        // Not a sealed file: maybe a bare hex seed left by provisioning
        // tooling. Refused unless development mode says otherwise.
        let text = String::from_utf8_lossy(&raw);
        let trimmed = text.trim();
        if trimmed.len() == 64 && trimmed.bytes().all(|b| b.is_ascii_hexdigit()) {
            if !options.allow_plaintext_dev {
                return Err(IdentityError::PlaintextRefused);
            }
            warn!(path = %path.display(), "loading plaintext development seed");
            let mut seed = Zeroizing::new([0u8; 32]);
            hex::decode_to_slice(trimmed, seed.as_mut())
                .map_err(|e| IdentityError::Malformed(format!("bad hex seed: {e}")))?;
            return Ok(NodeSigner::from_seed(&seed));
        }

        Err(IdentityError::Malformed(
            "neither a sealed keystore nor a hex seed".into(),
        ))
    }

    /// Unlock and additionally require the decrypted key to match an
    /// expected public key (hex). The comparison is constant-time.
    pub fn unlock_expecting(
        path: &Path,
        passphrase: &str,
        expected_public_key_hex: &str,
        options: &KeystoreOptions,
    ) -> Result<NodeSigner, IdentityError> {
        let signer = Self::unlock(path, passphrase, options)?;
        let actual = hex::encode(signer.verifying_key_bytes());
        if actual.as_bytes().ct_eq(expected_public_key_hex.as_bytes()).unwrap_u8() != 1 {
            return Err(IdentityError::IdentityMismatch);
        }
        Ok(signer)
    }

    fn unlock_sealed(
        file: &SealedKeyFile,
        passphrase: &str,
        options: &KeystoreOptions,
    ) -> Result<NodeSigner, IdentityError> {
        if file.version != KEYSTORE_VERSION || file.kdf != KDF_NAME {
            return Err(IdentityError::Malformed(format!(
                "unsupported keystore version {} / kdf {}",
                file.version, file.kdf
            )));
        }
        let salt = BASE64
            .decode(&file.salt)
            .map_err(|e| IdentityError::Malformed(format!("salt: {e}")))?;
        let nonce = BASE64
            .decode(&file.nonce)
            .map_err(|e| IdentityError::Malformed(format!("nonce: {e}")))?;
        if nonce.len() != NONCE_LEN {
            return Err(IdentityError::Malformed("nonce must be 12 bytes".into()));
        }
        let ciphertext = BASE64
            .decode(&file.ciphertext)
            .map_err(|e| IdentityError::Malformed(format!("ciphertext: {e}")))?;

        // KDF parameters come from the file so sealed keys survive option
        // changes; the options only tune newly generated keystores.
        let kdf_options = KeystoreOptions {
            allow_plaintext_dev: options.allow_plaintext_dev,
            kdf_memory_kib: file.m_cost_kib,
            kdf_iterations: file.t_cost,
            kdf_parallelism: file.p_cost,
        };
        let kek = derive_key(passphrase, &salt, &kdf_options)?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(kek.as_ref()));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_ref())
            .map_err(|_| IdentityError::Decrypt)?;
        let mut seed = Zeroizing::new([0u8; 32]);
        if plaintext.len() != seed.len() {
            return Err(IdentityError::InvalidKey(format!(
                "seed must be 32 bytes, found {}",
                plaintext.len()
            )));
        }
        seed.copy_from_slice(&plaintext);
        drop(Zeroizing::new(plaintext));
        Ok(NodeSigner::from_seed(&seed))
    }
}

fn derive_key(
    passphrase: &str,
    salt: &[u8],
    options: &KeystoreOptions,
) -> Result<Zeroizing<[u8; 32]>, IdentityError> {
    let params = Params::new(
        options.kdf_memory_kib,
        options.kdf_iterations,
        options.kdf_parallelism,
        Some(32),
    )
    .map_err(|e| IdentityError::Kdf(e.to_string()))?;
    let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut key = Zeroizing::new([0u8; 32]);
    argon
        .hash_password_into(passphrase.as_bytes(), salt, key.as_mut())
        .map_err(|e| IdentityError::Kdf(e.to_string()))?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fast_options() -> KeystoreOptions {
        // Keep test KDF cheap; production defaults are memory-hard.
        KeystoreOptions {
            allow_plaintext_dev: false,
            kdf_memory_kib: 64,
            kdf_iterations: 1,
            kdf_parallelism: 1,
        }
    }

    #[test]
    fn generate_then_unlock_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("node.key");
        let options = fast_options();

        let signer = Keystore::generate(&path, "correct horse", &options).unwrap();
        let reopened = Keystore::unlock(&path, "correct horse", &options).unwrap();
        assert_eq!(signer.node_id(), reopened.node_id());
        assert_eq!(signer.verifying_key_bytes(), reopened.verifying_key_bytes());
    }

    #[test]
    fn wrong_passphrase_fails_cleanly() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("node.key");
        let options = fast_options();

        Keystore::generate(&path, "correct horse", &options).unwrap();
        let err = Keystore::unlock(&path, "battery staple", &options).unwrap_err();
        assert!(matches!(err, IdentityError::Decrypt));
    }

    #[test]
    fn plaintext_seed_refused_without_dev_flag() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("node.key");
        fs::write(&path, hex::encode([9u8; 32])).unwrap();

        let err = Keystore::unlock(&path, "irrelevant", &fast_options()).unwrap_err();
        assert!(matches!(err, IdentityError::PlaintextRefused));

        let mut dev = fast_options();
        dev.allow_plaintext_dev = true;
        let signer = Keystore::unlock(&path, "irrelevant", &dev).unwrap();
        assert!(signer.try_sign(b"msg").is_ok());
    }

    #[test]
    fn unlock_expecting_checks_identity() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("node.key");
        let options = fast_options();

        let signer = Keystore::generate(&path, "pw", &options).unwrap();
        let pk_hex = hex::encode(signer.verifying_key_bytes());
        assert!(Keystore::unlock_expecting(&path, "pw", &pk_hex, &options).is_ok());

        let err =
            Keystore::unlock_expecting(&path, "pw", &hex::encode([0u8; 32]), &options).unwrap_err();
        assert!(matches!(err, IdentityError::IdentityMismatch));
    }

    #[test]
    fn garbage_file_is_malformed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("node.key");
        fs::write(&path, b"not a keystore").unwrap();
        let err = Keystore::unlock(&path, "pw", &fast_options()).unwrap_err();
        assert!(matches!(err, IdentityError::Malformed(_)));
    }
}
