//! Error types for presence verification.
//!
//! Four families, matching how each is handled:
//!
//! - [`ValidationError`]: deterministic, locally decided rejections (4xx)
//! - [`CeremonyError`]: terminal for one challenge-response ceremony (4xx)
//! - [`ProviderError`]: a vision provider failed; recovered by the fallback chain
//! - [`SystemError`]: storage or configuration unavailable (5xx)
//!
//! [`AttendanceError`] covers the per-day state machine conflicts.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Deterministic validation failures.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    /// Claimed position is outside every anchor's radius.
    #[error("Outside allowed radius by {:.0}m", .distance_m - .radius_m)]
    OutOfRange {
        /// Distance to the nearest anchor in meters.
        distance_m: f64,
        /// Radius of that anchor in meters.
        radius_m: f64,
        /// Name of the nearest anchor.
        anchor: String,
    },

    /// Reported GPS accuracy is worse than the policy requires.
    #[error("GPS accuracy {accuracy_m:.0}m is worse than the required {required_m:.0}m")]
    AccuracyTooLow {
        /// Reported accuracy radius in meters.
        accuracy_m: f64,
        /// Required accuracy radius in meters.
        required_m: f64,
    },

    /// Coordinates or accuracy are not usable numbers.
    #[error("Invalid coordinates: {reason}")]
    InvalidCoordinates {
        /// What was wrong.
        reason: String,
    },

    /// Declared network is not recognized.
    #[error("Network not recognized: {network_id}")]
    NetworkNotRecognized {
        /// Declared network identifier.
        network_id: String,
        /// How the decision was made (allow-list or oracle).
        method: String,
    },

    /// The presence oracle needs the device address and none was sent.
    #[error("A device address is required to confirm presence on {network_id}")]
    DeviceAddressRequired {
        /// Declared network identifier.
        network_id: String,
    },

    /// Device fingerprint does not match the enrolled one.
    #[error("This device is not the device enrolled for this account")]
    DeviceMismatch {
        /// User whose enrollment was checked.
        user_id: String,
    },

    /// User has no enrollment record.
    #[error("No enrolled device for user {user_id}")]
    NotEnrolled {
        /// User id.
        user_id: String,
    },

    /// User already has an enrollment; re-enrollment must be explicit.
    #[error("User {user_id} is already enrolled")]
    AlreadyEnrolled {
        /// User id.
        user_id: String,
    },

    /// A photo is required by the active policy.
    #[error("A photo is required for this check-in")]
    PhotoRequired,

    /// A signed assertion is required by configuration.
    #[error("A signed assertion from the authentication ceremony is required")]
    AssertionRequired,

    /// Anti-spoofing decision rejected the photo.
    #[error(
        "Liveness check failed: score {overall_score:.2} (required {threshold:.2}), \
         {passed_layers}/8 layers passed (required {min_layers}), recommendation {recommendation}"
    )]
    SpoofCheckFailed {
        /// Aggregate score.
        overall_score: f64,
        /// Policy threshold.
        threshold: f64,
        /// Layers that passed.
        passed_layers: u8,
        /// Policy minimum.
        min_layers: u8,
        /// Provider recommendation.
        recommendation: String,
    },

    /// Face match against the reference photo is too weak.
    #[error("Face match below required confidence ({confidence:.2} < {required:.2})")]
    FaceMatchTooLow {
        /// Reported confidence.
        confidence: f64,
        /// Required minimum.
        required: f64,
    },
}

impl ValidationError {
    /// Stable machine-readable reason code.
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::OutOfRange { .. } => "OUT_OF_RANGE",
            Self::AccuracyTooLow { .. } => "ACCURACY_TOO_LOW",
            Self::InvalidCoordinates { .. } => "INVALID_COORDINATES",
            Self::NetworkNotRecognized { .. } => "NETWORK_NOT_RECOGNIZED",
            Self::DeviceAddressRequired { .. } => "DEVICE_ADDRESS_REQUIRED",
            Self::DeviceMismatch { .. } => "DEVICE_MISMATCH",
            Self::NotEnrolled { .. } => "NOT_ENROLLED",
            Self::AlreadyEnrolled { .. } => "ALREADY_ENROLLED",
            Self::PhotoRequired => "PHOTO_REQUIRED",
            Self::AssertionRequired => "ASSERTION_REQUIRED",
            Self::SpoofCheckFailed { .. } => "SPOOF_CHECK_FAILED",
            Self::FaceMatchTooLow { .. } => "FACE_MATCH_TOO_LOW",
        }
    }

    /// Measured value and threshold, where the failure is numeric.
    #[must_use]
    pub fn measurement(&self) -> Option<(f64, f64)> {
        match self {
            Self::OutOfRange {
                distance_m,
                radius_m,
                ..
            } => Some((*distance_m, *radius_m)),
            Self::AccuracyTooLow {
                accuracy_m,
                required_m,
            } => Some((*accuracy_m, *required_m)),
            Self::SpoofCheckFailed {
                overall_score,
                threshold,
                ..
            } => Some((*overall_score, *threshold)),
            Self::FaceMatchTooLow {
                confidence,
                required,
            } => Some((*confidence, *required)),
            _ => None,
        }
    }
}

/// Per-day attendance state conflicts.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AttendanceError {
    /// An open check-in already exists for today.
    #[error("Already checked in today ({date})")]
    AlreadyCheckedIn {
        /// User id.
        user_id: String,
        /// Local calendar date.
        date: String,
    },

    /// Today's check-in and check-out are both recorded.
    #[error("Already completed attendance today ({date})")]
    AlreadyCompleted {
        /// User id.
        user_id: String,
        /// Local calendar date.
        date: String,
    },
}

impl AttendanceError {
    /// Stable machine-readable reason code.
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::AlreadyCheckedIn { .. } => "ALREADY_CHECKED_IN",
            Self::AlreadyCompleted { .. } => "ALREADY_COMPLETED",
        }
    }
}

/// Challenge-response ceremony failures. All are terminal for the attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CeremonyError {
    /// The user dismissed the platform prompt.
    #[error("Ceremony cancelled by the user")]
    Cancelled,

    /// The client or authenticator cannot perform the ceremony.
    #[error("Ceremony not supported by the client: {reason}")]
    Unsupported {
        /// Client-reported detail.
        reason: String,
    },

    /// The client timed out waiting for the authenticator.
    #[error("Ceremony timed out on the client")]
    Timeout,

    /// Challenge unknown, already consumed, expired, or issued for something else.
    #[error("Invalid or expired challenge")]
    InvalidOrExpiredChallenge,

    /// Signature counter did not increase: replay or cloned credential.
    #[error("Signature counter did not increase (stored {stored}, received {received})")]
    CounterNotIncreased {
        /// Counter on record.
        stored: u32,
        /// Counter in the assertion.
        received: u32,
    },

    /// No credential registered for the user, or the id does not match.
    #[error("Credential not found")]
    CredentialNotFound,

    /// A credential is already registered; replacing it requires re-enrollment.
    #[error("A credential is already registered for this user")]
    CredentialExists,

    /// Signature did not verify against the stored public key.
    #[error("Assertion signature is invalid")]
    SignatureInvalid,

    /// Client data origin is not allowed.
    #[error("Origin not allowed: {origin}")]
    OriginMismatch {
        /// Origin reported by the client.
        origin: String,
    },

    /// Authenticator data is scoped to another relying party.
    #[error("Relying party mismatch")]
    RelyingPartyMismatch,

    /// User-present flag not set.
    #[error("User presence was not confirmed by the authenticator")]
    UserNotPresent,

    /// User-verified flag not set while verification is required.
    #[error("User verification was not performed by the authenticator")]
    UserNotVerified,

    /// Response could not be decoded.
    #[error("Malformed ceremony response: {reason}")]
    MalformedResponse {
        /// What could not be decoded.
        reason: String,
    },
}

impl CeremonyError {
    /// Stable machine-readable reason code.
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Cancelled => "CEREMONY_CANCELLED",
            Self::Unsupported { .. } => "CEREMONY_UNSUPPORTED",
            Self::Timeout => "CEREMONY_TIMEOUT",
            Self::InvalidOrExpiredChallenge => "INVALID_OR_EXPIRED_CHALLENGE",
            Self::CounterNotIncreased { .. } => "COUNTER_NOT_INCREASED",
            Self::CredentialNotFound => "CREDENTIAL_NOT_FOUND",
            Self::CredentialExists => "CREDENTIAL_EXISTS",
            Self::SignatureInvalid => "SIGNATURE_INVALID",
            Self::OriginMismatch { .. } => "ORIGIN_MISMATCH",
            Self::RelyingPartyMismatch => "RELYING_PARTY_MISMATCH",
            Self::UserNotPresent => "USER_NOT_PRESENT",
            Self::UserNotVerified => "USER_NOT_VERIFIED",
            Self::MalformedResponse { .. } => "MALFORMED_RESPONSE",
        }
    }
}

/// Vision provider failures. Recovered by advancing to the next provider.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// Call exceeded its time budget.
    #[error("Provider {provider} timed out after {timeout_ms}ms")]
    Timeout {
        /// Provider name.
        provider: String,
        /// Budget in milliseconds.
        timeout_ms: u64,
    },

    /// Transport or HTTP status failure.
    #[error("Provider {provider} request failed: {message}")]
    Http {
        /// Provider name.
        provider: String,
        /// Error detail.
        message: String,
    },

    /// Provider rejected the call for quota or rate limits.
    #[error("Provider {provider} quota exhausted")]
    Quota {
        /// Provider name.
        provider: String,
    },

    /// Response did not match the score contract.
    #[error("Provider {provider} returned a malformed response: {reason}")]
    Malformed {
        /// Provider name.
        provider: String,
        /// What was wrong.
        reason: String,
    },

    /// No credentials configured for the provider.
    #[error("Provider {provider} is not configured")]
    NotConfigured {
        /// Provider name.
        provider: String,
    },

    /// Every provider, including the fallback, failed.
    #[error("All {attempts} vision providers failed")]
    ChainExhausted {
        /// Number of providers attempted.
        attempts: usize,
    },
}

/// Failures of the environment rather than of the claim.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SystemError {
    /// Backing store unavailable or failed.
    #[error("Storage error: {message}")]
    Storage {
        /// Error message.
        message: String,
    },

    /// No active location policy.
    #[error("No active location policy")]
    PolicyMissing,

    /// Policy failed validation.
    #[error("Invalid location policy: {reason}")]
    InvalidPolicy {
        /// Reason.
        reason: String,
    },

    /// Configuration or settings error.
    #[error("Configuration error: {message}")]
    Config {
        /// Error message.
        message: String,
    },
}

impl SystemError {
    /// Create a storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

/// Top-level error returned by verification operations.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum VerifyError {
    /// Validation failure.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Attendance state conflict.
    #[error(transparent)]
    Attendance(#[from] AttendanceError),

    /// Ceremony failure.
    #[error(transparent)]
    Ceremony(#[from] CeremonyError),

    /// Provider chain failure.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// System failure.
    #[error(transparent)]
    System(#[from] SystemError),
}

impl VerifyError {
    /// Stable machine-readable reason code.
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Validation(e) => e.reason_code(),
            Self::Attendance(e) => e.reason_code(),
            Self::Ceremony(e) => e.reason_code(),
            Self::Provider(_) => "PROVIDER_UNAVAILABLE",
            Self::System(SystemError::PolicyMissing) => "POLICY_MISSING",
            Self::System(_) => "SYSTEM_ERROR",
        }
    }

    /// HTTP status the error maps to.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation(ValidationError::DeviceMismatch { .. }) => 403,
            Self::Validation(ValidationError::NotEnrolled { .. }) => 404,
            Self::Validation(_) => 422,
            Self::Attendance(_) => 409,
            Self::Ceremony(_) => 401,
            Self::Provider(_) => 502,
            Self::System(SystemError::PolicyMissing) => 503,
            Self::System(_) => 500,
        }
    }

    /// Whether the error signals possible credential misuse and must be
    /// escalated rather than treated as a routine failure.
    #[must_use]
    pub fn is_security_event(&self) -> bool {
        matches!(
            self,
            Self::Validation(ValidationError::DeviceMismatch { .. })
                | Self::Ceremony(CeremonyError::CounterNotIncreased { .. })
        )
    }

    /// Whether the error is the caller's to fix (as opposed to a server fault).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        self.http_status() < 500
    }

    /// Caller-facing rejection payload.
    #[must_use]
    pub fn rejection(&self) -> Rejection {
        let (measured, threshold) = match self {
            Self::Validation(e) => e.measurement().map_or((None, None), |(m, t)| (Some(m), Some(t))),
            Self::Ceremony(CeremonyError::CounterNotIncreased { stored, received }) => {
                (Some(f64::from(*received)), Some(f64::from(*stored)))
            },
            _ => (None, None),
        };
        // Server faults keep their detail in the logs.
        let message = if self.is_client_error() {
            self.to_string()
        } else {
            "Verification is temporarily unavailable".to_string()
        };
        Rejection {
            reason_code: self.reason_code().to_string(),
            message,
            measured,
            threshold,
        }
    }
}

/// Structured rejection returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    /// Machine-readable reason code.
    pub reason_code: String,
    /// Human-readable, actionable message.
    pub message: String,
    /// Measured value, when the failure is numeric.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measured: Option<f64>,
    /// Threshold the measured value was compared with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
}
