//! ECDSA P-256 (ES256) signature operations.
//!
//! Authenticators emit ASN.1 DER signatures and browsers hand out public
//! keys as SubjectPublicKeyInfo DER, while raw tooling tends to use the
//! fixed 64-byte signature and SEC1 point encodings. The verifier accepts
//! both forms of each.

use p256::ecdsa::{
    signature::{Signer, Verifier},
    Signature, SigningKey, VerifyingKey,
};
use p256::elliptic_curve::rand_core::OsRng;
use p256::pkcs8::DecodePublicKey;

use crate::error::CryptoError;
use crate::signer::{CredentialSigner, CredentialVerifier};
use crate::types::CoseAlgorithm;

/// DER SEQUENCE tag, the first byte of both SPKI keys and DER signatures.
const DER_SEQUENCE: u8 = 0x30;

/// ECDSA P-256 signer.
pub struct P256Signer {
    signing_key: SigningKey,
}

impl P256Signer {
    /// Create a new signer with a random key.
    #[must_use]
    pub fn random() -> Self {
        Self {
            signing_key: SigningKey::random(&mut OsRng),
        }
    }

    /// Create a signer from an existing key.
    ///
    /// # Errors
    ///
    /// Returns error if the key bytes are invalid.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let signing_key = SigningKey::from_slice(bytes)
            .map_err(|e| CryptoError::invalid_private_key(e.to_string()))?;

        Ok(Self { signing_key })
    }

    /// Get the verifying key.
    #[must_use]
    pub fn verifying_key(&self) -> &VerifyingKey {
        self.signing_key.verifying_key()
    }
}

impl CredentialSigner for P256Signer {
    fn algorithm(&self) -> CoseAlgorithm {
        CoseAlgorithm::Es256
    }

    fn public_key(&self) -> Result<Vec<u8>, CryptoError> {
        let encoded = self.signing_key.verifying_key().to_encoded_point(false);
        Ok(encoded.as_bytes().to_vec())
    }

    /// Signs like an authenticator does: DER-encoded.
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let signature: Signature = self
            .signing_key
            .try_sign(data)
            .map_err(|e| CryptoError::signing_failed(e.to_string()))?;
        Ok(signature.to_der().as_bytes().to_vec())
    }
}

/// ECDSA P-256 verifier.
pub struct P256Verifier;

impl P256Verifier {
    /// Create a new verifier.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn parse_key(public_key: &[u8]) -> Result<VerifyingKey, CryptoError> {
        let parsed = if public_key.first() == Some(&DER_SEQUENCE) {
            VerifyingKey::from_public_key_der(public_key).map_err(|e| e.to_string())
        } else {
            VerifyingKey::from_sec1_bytes(public_key).map_err(|e| e.to_string())
        };
        parsed.map_err(CryptoError::invalid_public_key)
    }

    fn parse_signature(signature: &[u8]) -> Result<Signature, CryptoError> {
        let parsed = if signature.len() != 64 && signature.first() == Some(&DER_SEQUENCE) {
            Signature::from_der(signature)
        } else {
            Signature::from_slice(signature)
        };
        let sig = parsed.map_err(|e| CryptoError::invalid_signature(e.to_string()))?;
        // Authenticators are not required to produce low-S signatures.
        Ok(sig.normalize_s().unwrap_or(sig))
    }
}

impl Default for P256Verifier {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialVerifier for P256Verifier {
    fn verify(&self, public_key: &[u8], data: &[u8], signature: &[u8]) -> Result<bool, CryptoError> {
        let vk = Self::parse_key(public_key)?;
        let sig = Self::parse_signature(signature)?;

        match vk.verify(data, &sig) {
            Ok(()) => Ok(true),
            Err(_) => Ok(false),
        }
    }

    fn check_public_key(&self, public_key: &[u8]) -> Result<(), CryptoError> {
        Self::parse_key(public_key).map(|_| ())
    }
}
