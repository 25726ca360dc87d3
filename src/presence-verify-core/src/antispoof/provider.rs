//! Vision providers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, ClientBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::scores::{AcceptanceBar, LayerScores, Recommendation, SpoofScores};
use crate::error::{ProviderError, SystemError};
use crate::settings::SettingsService;
use crate::types::Photo;

/// Why a photo is being analyzed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisionPurpose {
    /// Enrollment or re-enrollment.
    Enrollment,
    /// Attendance check-in.
    Attendance,
}

/// Input to a provider.
#[derive(Debug, Clone, Serialize)]
pub struct VisionRequest {
    /// Subject.
    pub user_id: String,
    /// Enrollment or attendance.
    pub purpose: VisionPurpose,
    /// Captured photo.
    pub photo: Photo,
    /// Enrolled reference photo (base64), if one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_photo: Option<String>,
    /// Bar the result will be judged against.
    pub acceptance: AcceptanceBar,
}

impl VisionRequest {
    /// Whether a reference photo exists for the user.
    #[must_use]
    pub fn has_reference(&self) -> bool {
        self.reference_photo.is_some()
    }
}

/// A vision-AI capability: submit a photo, get normalized scores.
#[async_trait]
pub trait VisionProvider: Send + Sync {
    /// Provider name.
    fn name(&self) -> &str;

    /// Analyze a photo.
    async fn analyze(&self, request: &VisionRequest) -> Result<SpoofScores, ProviderError>;
}

#[derive(Serialize)]
struct AnalyzeBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    purpose: VisionPurpose,
    image: &'a str,
    mime_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reference_image: Option<&'a str>,
    has_reference: bool,
    score_threshold: f64,
    min_passed_layers: u8,
}

/// Provider reached over HTTPS.
///
/// Endpoint and credentials are read from the settings snapshot on every
/// call, so a rotated key takes effect once the snapshot refreshes.
pub struct HttpVisionProvider {
    name: String,
    client: Client,
    settings: Arc<SettingsService>,
}

impl HttpVisionProvider {
    /// Create a provider named `name`, matching a settings entry.
    pub fn new(
        name: impl Into<String>,
        settings: Arc<SettingsService>,
        timeout: Duration,
    ) -> Result<Self, SystemError> {
        let client = ClientBuilder::new()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(3)))
            .user_agent(format!("presence-verify/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SystemError::config(format!("Failed to create vision client: {e}")))?;
        Ok(Self {
            name: name.into(),
            client,
            settings,
        })
    }
}

#[async_trait]
impl VisionProvider for HttpVisionProvider {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self, request), fields(provider = %self.name, user_id = %request.user_id))]
    async fn analyze(&self, request: &VisionRequest) -> Result<SpoofScores, ProviderError> {
        let settings = self.settings.snapshot().await.map_err(|e| ProviderError::Http {
            provider: self.name.clone(),
            message: format!("settings unavailable: {e}"),
        })?;
        let credential = settings
            .provider(&self.name)
            .ok_or_else(|| ProviderError::NotConfigured {
                provider: self.name.clone(),
            })?;

        let body = AnalyzeBody {
            model: credential.model.as_deref(),
            purpose: request.purpose,
            image: &request.photo.data_base64,
            mime_type: &request.photo.mime_type,
            reference_image: request.reference_photo.as_deref(),
            has_reference: request.has_reference(),
            score_threshold: request.acceptance.score_threshold,
            min_passed_layers: request.acceptance.min_passed_layers,
        };

        let response = self
            .client
            .post(&credential.endpoint)
            .bearer_auth(&credential.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Http {
                provider: self.name.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        debug!(status = %status, "Vision provider responded");
        if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::PAYMENT_REQUIRED {
            return Err(ProviderError::Quota {
                provider: self.name.clone(),
            });
        }
        if !status.is_success() {
            return Err(ProviderError::Http {
                provider: self.name.clone(),
                message: format!("HTTP {status}"),
            });
        }

        response
            .json::<SpoofScores>()
            .await
            .map_err(|e| ProviderError::Malformed {
                provider: self.name.clone(),
                reason: e.to_string(),
            })
    }
}

/// Deterministic last resort.
///
/// Passes with every score just above the acceptance floor and flags the
/// result for manual review.
#[derive(Debug, Default, Clone, Copy)]
pub struct BasicValidationProvider;

/// Name reported by [`BasicValidationProvider`].
pub const BASIC_VALIDATION: &str = "basic-validation";

impl BasicValidationProvider {
    /// The fixed result for `bar`.
    #[must_use]
    pub fn scores_for(bar: &AcceptanceBar) -> SpoofScores {
        let score = (bar.score_threshold + 0.01).min(1.0);
        SpoofScores {
            layers: LayerScores::uniform(score, true),
            overall_score: score,
            passed_layers: super::scores::LAYER_COUNT as u8,
            recommendation: Recommendation::Approve,
            face_match_confidence: None,
            manual_review: true,
            notes: Some("all vision providers unavailable; basic validation only".into()),
        }
    }
}

#[async_trait]
impl VisionProvider for BasicValidationProvider {
    fn name(&self) -> &str {
        BASIC_VALIDATION
    }

    async fn analyze(&self, request: &VisionRequest) -> Result<SpoofScores, ProviderError> {
        Ok(Self::scores_for(&request.acceptance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::antispoof::scores::AntiSpoofPolicy;
    use crate::settings::{InMemorySettingsSource, RuntimeSettings};

    #[test]
    fn test_basic_validation_passes_just_above_floor() {
        for threshold in [0.0, 0.5, 0.9, 0.995, 1.0] {
            let bar = AcceptanceBar {
                score_threshold: threshold,
                min_passed_layers: 8,
            };
            let s = BasicValidationProvider::scores_for(&bar);
            assert!(s.manual_review);
            assert!(s.overall_score >= threshold);
            assert!(s.overall_score <= 1.0);
            assert!(AntiSpoofPolicy.evaluate(&s, &bar).accepted);
        }
    }

    #[tokio::test]
    async fn test_http_provider_without_credentials_is_not_configured() {
        let settings = Arc::new(SettingsService::new(
            Arc::new(InMemorySettingsSource::new(RuntimeSettings::default())),
            Duration::from_secs(30),
        ));
        let provider =
            HttpVisionProvider::new("vision-a", settings, Duration::from_secs(1)).unwrap();
        let request = VisionRequest {
            user_id: "u1".into(),
            purpose: VisionPurpose::Attendance,
            photo: Photo {
                data_base64: "aGVsbG8=".into(),
                mime_type: "image/jpeg".into(),
            },
            reference_photo: None,
            acceptance: AcceptanceBar {
                score_threshold: 0.9,
                min_passed_layers: 7,
            },
        };
        assert!(matches!(
            provider.analyze(&request).await,
            Err(ProviderError::NotConfigured { .. })
        ));
    }
}
