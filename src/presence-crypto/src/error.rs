//! Cryptographic error types.

use thiserror::Error;

/// Errors that can occur during cryptographic operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Invalid signature format or length.
    #[error("Invalid signature: {reason}")]
    InvalidSignature {
        /// Reason the signature is invalid.
        reason: String,
    },

    /// Invalid public key format or length.
    #[error("Invalid public key: {reason}")]
    InvalidPublicKey {
        /// Reason the key is invalid.
        reason: String,
    },

    /// Invalid private key format or length.
    #[error("Invalid private key: {reason}")]
    InvalidPrivateKey {
        /// Reason the key is invalid.
        reason: String,
    },

    /// Signing operation failed.
    #[error("Signing failed: {reason}")]
    SigningFailed {
        /// Reason for the failure.
        reason: String,
    },

    /// Algorithm not supported.
    #[error("Algorithm not supported: {algorithm}")]
    UnsupportedAlgorithm {
        /// The unsupported algorithm.
        algorithm: String,
    },
}

impl CryptoError {
    /// Create an invalid signature error.
    #[must_use]
    pub fn invalid_signature(reason: impl Into<String>) -> Self {
        Self::InvalidSignature {
            reason: reason.into(),
        }
    }

    /// Create an invalid public key error.
    #[must_use]
    pub fn invalid_public_key(reason: impl Into<String>) -> Self {
        Self::InvalidPublicKey {
            reason: reason.into(),
        }
    }

    /// Create an invalid private key error.
    #[must_use]
    pub fn invalid_private_key(reason: impl Into<String>) -> Self {
        Self::InvalidPrivateKey {
            reason: reason.into(),
        }
    }

    /// Create a signing failed error.
    #[must_use]
    pub fn signing_failed(reason: impl Into<String>) -> Self {
        Self::SigningFailed {
            reason: reason.into(),
        }
    }
}
