//! Signer and verifier traits shared by all credential algorithms.

use crate::error::CryptoError;
use crate::types::CoseAlgorithm;

/// Produces signatures the way a platform authenticator does.
pub trait CredentialSigner {
    /// Get the algorithm used by this signer.
    fn algorithm(&self) -> CoseAlgorithm;

    /// Get the public key in the encoding the server stores.
    fn public_key(&self) -> Result<Vec<u8>, CryptoError>;

    /// Sign data and return the signature.
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

/// Verifies credential signatures.
pub trait CredentialVerifier: Send + Sync {
    /// Verify a signature against a public key.
    fn verify(&self, public_key: &[u8], data: &[u8], signature: &[u8])
        -> Result<bool, CryptoError>;

    /// Check that a public key decodes for this algorithm.
    ///
    /// Used when a credential is registered, so a bad key is refused then
    /// rather than on every later authentication.
    fn check_public_key(&self, public_key: &[u8]) -> Result<(), CryptoError>;
}
