//! Ed25519 (EdDSA) signature operations.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand_core::OsRng;

use crate::error::CryptoError;
use crate::signer::{CredentialSigner, CredentialVerifier};
use crate::types::CoseAlgorithm;

/// SubjectPublicKeyInfo prefix for an Ed25519 key (RFC 8410).
const SPKI_PREFIX: [u8; 12] = [
    0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x03, 0x21, 0x00,
];

/// Ed25519 signer.
pub struct Ed25519Signer {
    signing_key: SigningKey,
}

impl Ed25519Signer {
    /// Create a new signer with a random key.
    #[must_use]
    pub fn random() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Create a signer from seed bytes (32 bytes).
    ///
    /// # Errors
    ///
    /// Returns error if the seed is not exactly 32 bytes.
    pub fn from_seed(seed: &[u8]) -> Result<Self, CryptoError> {
        let seed_array: [u8; 32] = seed.try_into().map_err(|_| {
            CryptoError::invalid_private_key(format!(
                "Ed25519 seed must be 32 bytes, got {}",
                seed.len()
            ))
        })?;

        Ok(Self {
            signing_key: SigningKey::from_bytes(&seed_array),
        })
    }
}

impl CredentialSigner for Ed25519Signer {
    fn algorithm(&self) -> CoseAlgorithm {
        CoseAlgorithm::EdDsa
    }

    fn public_key(&self) -> Result<Vec<u8>, CryptoError> {
        Ok(self.signing_key.verifying_key().to_bytes().to_vec())
    }

    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let signature = self.signing_key.sign(data);
        Ok(signature.to_bytes().to_vec())
    }
}

/// Ed25519 verifier.
pub struct Ed25519Verifier;

impl Ed25519Verifier {
    /// Create a new verifier.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Default for Ed25519Verifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Ed25519Verifier {
    fn parse_key(public_key: &[u8]) -> Result<VerifyingKey, CryptoError> {
        let raw_key = match public_key.len() {
            32 => public_key,
            44 if public_key[..12] == SPKI_PREFIX => &public_key[12..],
            n => {
                return Err(CryptoError::invalid_public_key(format!(
                    "Ed25519 public key must be 32 bytes or SPKI, got {n} bytes"
                )))
            },
        };

        let mut pk_bytes = [0u8; 32];
        pk_bytes.copy_from_slice(raw_key);

        VerifyingKey::from_bytes(&pk_bytes)
            .map_err(|e| CryptoError::invalid_public_key(e.to_string()))
    }
}

impl CredentialVerifier for Ed25519Verifier {
    fn verify(&self, public_key: &[u8], data: &[u8], signature: &[u8]) -> Result<bool, CryptoError> {
        let vk = Self::parse_key(public_key)?;

        let sig_bytes: [u8; 64] = signature.try_into().map_err(|_| {
            CryptoError::invalid_signature(format!(
                "Ed25519 signature must be 64 bytes, got {}",
                signature.len()
            ))
        })?;

        let sig = Signature::from_bytes(&sig_bytes);

        match vk.verify(data, &sig) {
            Ok(()) => Ok(true),
            Err(_) => Ok(false),
        }
    }

    fn check_public_key(&self, public_key: &[u8]) -> Result<(), CryptoError> {
        Self::parse_key(public_key).map(|_| ())
    }
}
