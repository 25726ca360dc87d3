//! # presence-crypto
//!
//! Signature primitives for device-bound credentials.
//!
//! Platform authenticators register a public key with the server and later
//! prove possession of the matching private key by signing a server nonce.
//! This crate verifies those signatures for the algorithms the server offers
//! during registration:
//!
//! - **ES256**: ECDSA P-256 with SHA-256 (COSE `-7`), the algorithm every
//!   platform authenticator supports
//! - **EdDSA**: Ed25519 (COSE `-8`)
//!
//! Signers are included so tests and tooling can act as an authenticator.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod signer;
mod types;

#[cfg(feature = "ecdsa-p256")]
mod ecdsa;

#[cfg(feature = "ed25519")]
mod ed25519;

pub use error::CryptoError;
pub use signer::{CredentialSigner, CredentialVerifier};
pub use types::CoseAlgorithm;

#[cfg(feature = "ecdsa-p256")]
pub use ecdsa::{P256Signer, P256Verifier};

#[cfg(feature = "ed25519")]
pub use ed25519::{Ed25519Signer, Ed25519Verifier};

/// Constant-time byte comparison.
///
/// Compares two byte slices in constant time to prevent timing attacks.
/// Returns `true` if the slices are equal, `false` otherwise.
///
/// # Security
///
/// Use this for every comparison of secrets or secret-derived values
/// (device fingerprint hashes, relying party hashes, signatures).
/// The length check still returns early; length is not secret here.
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;

    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Get a verifier for a COSE algorithm.
///
/// # Errors
///
/// Returns [`CryptoError::UnsupportedAlgorithm`] when the algorithm's feature
/// is compiled out.
pub fn verifier_for(algorithm: CoseAlgorithm) -> Result<Box<dyn CredentialVerifier>, CryptoError> {
    match algorithm {
        #[cfg(feature = "ecdsa-p256")]
        CoseAlgorithm::Es256 => Ok(Box::new(P256Verifier::new())),
        #[cfg(feature = "ed25519")]
        CoseAlgorithm::EdDsa => Ok(Box::new(Ed25519Verifier::new())),
        #[allow(unreachable_patterns)]
        other => Err(CryptoError::UnsupportedAlgorithm {
            algorithm: other.name().to_string(),
        }),
    }
}

/// Verify `signature` over `data` with `public_key` using `algorithm`.
///
/// Returns `Ok(false)` for a well-formed signature that does not verify, and
/// an error for malformed keys or signatures.
pub fn verify_signature(
    algorithm: CoseAlgorithm,
    public_key: &[u8],
    data: &[u8],
    signature: &[u8],
) -> Result<bool, CryptoError> {
    verifier_for(algorithm)?.verify(public_key, data, signature)
}

/// Check that `public_key` decodes for `algorithm`.
pub fn check_public_key(algorithm: CoseAlgorithm, public_key: &[u8]) -> Result<(), CryptoError> {
    verifier_for(algorithm)?.check_public_key(public_key)
}
