//! Protocol types for presence verification requests and responses.

use serde::{Deserialize, Serialize};

use crate::attendance::{AttendanceRecord, Transition};
use crate::audit::RequestContext;
use crate::webauthn::AuthenticationResponse;

/// A WGS84 coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
}

impl GeoPoint {
    /// Create a point.
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// A captured photo, base64 encoded.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Photo {
    /// Base64 image bytes.
    pub data_base64: String,
    /// MIME type ("image/jpeg").
    #[serde(default = "default_mime")]
    pub mime_type: String,
}

fn default_mime() -> String {
    "image/jpeg".into()
}

impl std::fmt::Debug for Photo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Photo")
            .field("mime_type", &self.mime_type)
            .field("len", &self.data_base64.len())
            .finish()
    }
}

/// Signed assertion from a prior authentication ceremony.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssertionSubmission {
    /// Challenge returned by `authenticate/begin`.
    pub challenge: String,
    /// Authenticator response.
    pub response: AuthenticationResponse,
}

/// One attendance claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationRequest {
    /// Claimant.
    pub user_id: String,
    /// Claimed latitude.
    pub latitude: f64,
    /// Claimed longitude.
    pub longitude: f64,
    /// Reported GPS accuracy radius in meters (smaller is better).
    pub accuracy_m: f64,
    /// Declared network identifier (SSID).
    pub network_id: String,
    /// Device fingerprint hash.
    pub device_fingerprint: String,
    /// Device hardware address, used when a presence oracle is configured.
    #[serde(default)]
    pub device_address: Option<String>,
    /// Photo captured at claim time. Not required on check-out.
    #[serde(default)]
    pub photo: Option<Photo>,
    /// Signed assertion from the authentication ceremony.
    #[serde(default)]
    pub assertion: Option<AssertionSubmission>,
    /// Caller context for the audit trail.
    #[serde(default)]
    pub context: RequestContext,
}

impl VerificationRequest {
    /// The claimed position.
    #[must_use]
    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }
}

/// Accepted attendance transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationOutcome {
    /// Which transition was committed.
    pub transition: Transition,
    /// Stored record after the transition.
    pub record: AttendanceRecord,
}

/// Device and face enrollment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentRequest {
    /// User being enrolled.
    pub user_id: String,
    /// Device fingerprint hash to bind.
    pub device_fingerprint: String,
    /// Enrollment photo, checked by the anti-spoofing orchestrator.
    pub photo: Photo,
    /// Replace an existing enrollment.
    #[serde(default)]
    pub re_enrollment: bool,
    /// Caller context for the audit trail.
    #[serde(default)]
    pub context: RequestContext,
}
