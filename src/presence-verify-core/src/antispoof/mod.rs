//! Anti-spoofing orchestration.
//!
//! Providers are tried in a fixed priority order, each with a bounded
//! timeout, through [`first_success`]. The deterministic
//! [`BasicValidationProvider`] sits at the end of every chain so the pipeline
//! always reaches a decision; its result is flagged for manual review.
//!
//! The decision itself is [`AntiSpoofPolicy::evaluate`] plus, when the
//! provider reports one and a reference photo exists, a face-match minimum.
//! Every invocation is audited with the full breakdown.

mod fallback;
mod provider;
mod scores;

pub use fallback::{first_success, FirstSuccess, ProviderAttempt};
pub use provider::{
    BasicValidationProvider, HttpVisionProvider, VisionProvider, VisionPurpose, VisionRequest,
    BASIC_VALIDATION,
};
pub use scores::{
    AcceptanceBar, AntiSpoofDecision, AntiSpoofPolicy, LayerScore, LayerScores, Recommendation,
    SpoofLayer, SpoofScores, LAYER_COUNT,
};

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, instrument, warn};

use crate::audit::{ActivityAuditLog, AntiSpoofAudit, AuditMetadata, AuditRecord, RequestContext};
use crate::error::{ProviderError, ValidationError, VerifyError};

/// Scores plus where they came from.
#[derive(Debug, Clone)]
pub struct Assessment {
    /// Normalized scores.
    pub scores: SpoofScores,
    /// Provider that produced them.
    pub provider: String,
    /// Every attempt, in order.
    pub attempts: Vec<ProviderAttempt>,
    /// Total time spent, milliseconds.
    pub duration_ms: u64,
}

/// Runs the provider chain and applies the acceptance policy.
pub struct AntiSpoofingOrchestrator {
    providers: Vec<Arc<dyn VisionProvider>>,
    fallback: Arc<dyn VisionProvider>,
    timeout: Duration,
    policy: AntiSpoofPolicy,
    audit: Arc<ActivityAuditLog>,
}

impl AntiSpoofingOrchestrator {
    /// Create an orchestrator over `providers` (highest priority first),
    /// ending with [`BasicValidationProvider`].
    pub fn new(
        providers: Vec<Arc<dyn VisionProvider>>,
        timeout: Duration,
        audit: Arc<ActivityAuditLog>,
    ) -> Self {
        Self {
            providers,
            fallback: Arc::new(BasicValidationProvider),
            timeout,
            policy: AntiSpoofPolicy,
            audit,
        }
    }

    /// Replace the last-resort provider.
    #[must_use]
    pub fn with_fallback(mut self, fallback: Arc<dyn VisionProvider>) -> Self {
        self.fallback = fallback;
        self
    }

    /// Names of the chain, in the order tried.
    #[must_use]
    pub fn chain(&self) -> Vec<String> {
        self.providers
            .iter()
            .chain(std::iter::once(&self.fallback))
            .map(|p| p.name().to_string())
            .collect()
    }

    /// Run the chain and return the first normalized result.
    pub async fn assess(&self, request: &VisionRequest) -> Result<Assessment, (ProviderError, Vec<ProviderAttempt>)> {
        let started = Instant::now();
        let strategies = self
            .providers
            .iter()
            .chain(std::iter::once(&self.fallback))
            .map(|provider| {
                let name = provider.name().to_string();
                let provider = Arc::clone(provider);
                (name.clone(), move || async move {
                    let scores = provider.analyze(request).await?;
                    scores
                        .normalized()
                        .map_err(|reason| ProviderError::Malformed {
                            provider: name,
                            reason,
                        })
                })
            })
            .collect::<Vec<_>>();

        match first_success(strategies, self.timeout).await {
            Ok(won) => Ok(Assessment {
                scores: won.value,
                provider: won.winner,
                attempts: won.attempts,
                duration_ms: started.elapsed().as_millis() as u64,
            }),
            Err(attempts) => Err((
                ProviderError::ChainExhausted {
                    attempts: attempts.len(),
                },
                attempts,
            )),
        }
    }

    /// Assess, decide and audit.
    ///
    /// `face_match_min` applies only when a reference photo exists and the
    /// provider reports a confidence.
    #[instrument(skip(self, request, context), fields(user_id = %request.user_id, purpose = ?request.purpose))]
    pub async fn verify(
        &self,
        request: &VisionRequest,
        face_match_min: f64,
        context: &RequestContext,
    ) -> Result<Assessment, VerifyError> {
        let started = Instant::now();

        let assessment = match self.assess(request).await {
            Ok(a) => a,
            Err((error, attempts)) => {
                let error = VerifyError::from(error);
                warn!(attempts = attempts.len(), "Anti-spoofing chain exhausted");
                self.audit
                    .record(AuditRecord::failure(
                        &request.user_id,
                        context,
                        &error,
                        AuditMetadata::AntiSpoofing(AntiSpoofAudit {
                            purpose: request.purpose,
                            provider: None,
                            attempts,
                            duration_ms: started.elapsed().as_millis() as u64,
                            scores: None,
                            decision: None,
                            face_match_min: None,
                        }),
                    ))
                    .await;
                return Err(error);
            },
        };

        let decision = self.policy.evaluate(&assessment.scores, &request.acceptance);
        let face_match_applies = request.has_reference();
        let result = if !decision.accepted {
            Err(ValidationError::SpoofCheckFailed {
                overall_score: assessment.scores.overall_score,
                threshold: request.acceptance.score_threshold,
                passed_layers: assessment.scores.passed_layers,
                min_layers: request.acceptance.min_passed_layers,
                recommendation: assessment.scores.recommendation.to_string(),
            })
        } else {
            match assessment.scores.face_match_confidence {
                Some(confidence) if face_match_applies && confidence < face_match_min => {
                    Err(ValidationError::FaceMatchTooLow {
                        confidence,
                        required: face_match_min,
                    })
                },
                _ => Ok(()),
            }
        };

        let metadata = AuditMetadata::AntiSpoofing(AntiSpoofAudit {
            purpose: request.purpose,
            provider: Some(assessment.provider.clone()),
            attempts: assessment.attempts.clone(),
            duration_ms: assessment.duration_ms,
            scores: Some(assessment.scores.clone()),
            decision: Some(decision),
            face_match_min: face_match_applies.then_some(face_match_min),
        });

        match result {
            Ok(()) => {
                info!(
                    provider = %assessment.provider,
                    overall_score = assessment.scores.overall_score,
                    passed_layers = assessment.scores.passed_layers,
                    manual_review = assessment.scores.manual_review,
                    "Anti-spoofing check passed"
                );
                self.audit
                    .record(AuditRecord::success(&request.user_id, context, metadata))
                    .await;
                Ok(assessment)
            },
            Err(e) => {
                let error = VerifyError::from(e);
                info!(
                    provider = %assessment.provider,
                    reason = %error,
                    "Anti-spoofing check rejected"
                );
                self.audit
                    .record(AuditRecord::failure(&request.user_id, context, &error, metadata))
                    .await;
                Err(error)
            },
        }
    }
}
