//! Attendance engine.
//!
//! This module implements the per-(user, day) state machine:
//! 1. Load the active location policy (fresh on every request)
//! 2. Resolve the day's state
//! 3. `NoRecord`: geofence, network, device binding, assertion, anti-spoofing,
//!    then insert the check-in
//! 4. `CheckedIn`: geofence and network, then close the record
//! 5. `CheckedOut`: rejected, nothing else runs
//!
//! Validators run cheapest first and the chain stops at the first failure, so
//! no provider budget is spent on a claim that would be rejected anyway. Every
//! rejection is audited with the metadata of the step that failed.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use crate::antispoof::{
    AntiSpoofingOrchestrator, Assessment, VisionProvider, VisionPurpose, VisionRequest,
};
use crate::attendance::{
    AttendanceRecord, AttendanceStatus, AttendanceStore, CloseOutcome, DayState,
    InMemoryAttendanceStore, InsertOutcome, Transition, VerificationSummary,
};
use crate::audit::{
    ActivityAuditLog, AntiSpoofAudit, AttendanceAudit, AuditMetadata, AuditRecord, CeremonyAudit,
    DeviceBindingAudit, EnrollmentAudit, GeofenceAudit, RequestContext,
};
use crate::challenge::{CeremonyPurpose, ChallengeStore, InMemoryChallengeStore};
use crate::config::{Clock, SystemClock, VerifyConfig};
use crate::enrollment::{
    fingerprint_prefix, DeviceBinding, EnrollOutcome, EnrolledBiometric, EnrollmentStore,
    InMemoryEnrollmentStore,
};
use crate::error::{AttendanceError, SystemError, ValidationError, VerifyError};
use crate::geofence::{GeofenceMatch, GeofenceValidator};
use crate::network::{NetworkEvidence, NetworkPresenceValidator};
use crate::policy::{LocationPolicy, PolicyStore};
use crate::settings::{RuntimeSettings, SettingsService};
use crate::types::{EnrollmentRequest, VerificationOutcome, VerificationRequest};
use crate::webauthn::{ChallengeResponseAuthenticator, ClientResult};

/// A user's state for the current local day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DayStatus {
    /// User id.
    pub user_id: String,
    /// Local calendar date.
    pub date: NaiveDate,
    /// State.
    pub state: DayState,
    /// Record, once checked in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<AttendanceRecord>,
}

/// Assembles an [`AttendanceEngine`].
///
/// Stores default to the in-memory implementations, the clock to the wall
/// clock and the network validator to allow-list only.
pub struct EngineBuilder {
    config: VerifyConfig,
    policies: Arc<dyn PolicyStore>,
    settings: Arc<SettingsService>,
    audit: Arc<ActivityAuditLog>,
    clock: Arc<dyn Clock>,
    attendance: Arc<dyn AttendanceStore>,
    enrollments: Arc<dyn EnrollmentStore>,
    challenges: Arc<dyn ChallengeStore>,
    network: NetworkPresenceValidator,
    providers: Vec<Arc<dyn VisionProvider>>,
    fallback: Option<Arc<dyn VisionProvider>>,
}

impl EngineBuilder {
    /// Start from the required parts.
    pub fn new(
        config: VerifyConfig,
        policies: Arc<dyn PolicyStore>,
        settings: Arc<SettingsService>,
        audit: Arc<ActivityAuditLog>,
    ) -> Self {
        Self {
            config,
            policies,
            settings,
            audit,
            clock: Arc::new(SystemClock),
            attendance: Arc::new(InMemoryAttendanceStore::new()),
            enrollments: Arc::new(InMemoryEnrollmentStore::new()),
            challenges: Arc::new(InMemoryChallengeStore::new()),
            network: NetworkPresenceValidator::allow_list_only(),
            providers: Vec::new(),
            fallback: None,
        }
    }

    /// Use `clock` for all timestamps and day boundaries.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Attendance persistence.
    #[must_use]
    pub fn attendance_store(mut self, store: Arc<dyn AttendanceStore>) -> Self {
        self.attendance = store;
        self
    }

    /// Enrollment persistence.
    #[must_use]
    pub fn enrollment_store(mut self, store: Arc<dyn EnrollmentStore>) -> Self {
        self.enrollments = store;
        self
    }

    /// Challenge persistence.
    #[must_use]
    pub fn challenge_store(mut self, store: Arc<dyn ChallengeStore>) -> Self {
        self.challenges = store;
        self
    }

    /// Network presence validator.
    #[must_use]
    pub fn network(mut self, network: NetworkPresenceValidator) -> Self {
        self.network = network;
        self
    }

    /// Vision providers, highest priority first.
    #[must_use]
    pub fn providers(mut self, providers: Vec<Arc<dyn VisionProvider>>) -> Self {
        self.providers = providers;
        self
    }

    /// Replace the last-resort provider.
    #[must_use]
    pub fn fallback_provider(mut self, provider: Arc<dyn VisionProvider>) -> Self {
        self.fallback = Some(provider);
        self
    }

    /// Validate the configuration and build the engine.
    pub fn build(self) -> Result<AttendanceEngine, SystemError> {
        self.config.validate()?;
        let config = Arc::new(self.config);

        info!(
            rp_id = %config.rp_id,
            providers = self.providers.len(),
            require_assertion = config.require_assertion,
            utc_offset_minutes = config.utc_offset_minutes,
            "AttendanceEngine: initializing"
        );

        let authenticator = Arc::new(ChallengeResponseAuthenticator::new(
            Arc::clone(&config),
            self.challenges,
            Arc::clone(&self.enrollments),
            Arc::clone(&self.audit),
            Arc::clone(&self.clock),
        ));

        let mut orchestrator = AntiSpoofingOrchestrator::new(
            self.providers,
            config.provider_timeout,
            Arc::clone(&self.audit),
        );
        if let Some(fallback) = self.fallback {
            orchestrator = orchestrator.with_fallback(fallback);
        }
        info!(chain = ?orchestrator.chain(), "AttendanceEngine: anti-spoofing chain");

        Ok(AttendanceEngine {
            config,
            clock: self.clock,
            policies: self.policies,
            attendance: self.attendance,
            enrollments: self.enrollments,
            geofence: GeofenceValidator,
            network: self.network,
            device_binding: DeviceBinding,
            authenticator,
            orchestrator,
            settings: self.settings,
            audit: self.audit,
        })
    }
}

/// The attendance verification engine.
///
/// Shared across requests behind an `Arc`; requests are independent.
pub struct AttendanceEngine {
    config: Arc<VerifyConfig>,
    clock: Arc<dyn Clock>,
    policies: Arc<dyn PolicyStore>,
    attendance: Arc<dyn AttendanceStore>,
    enrollments: Arc<dyn EnrollmentStore>,
    geofence: GeofenceValidator,
    network: NetworkPresenceValidator,
    device_binding: DeviceBinding,
    authenticator: Arc<ChallengeResponseAuthenticator>,
    orchestrator: AntiSpoofingOrchestrator,
    settings: Arc<SettingsService>,
    audit: Arc<ActivityAuditLog>,
}

impl AttendanceEngine {
    /// Configuration.
    pub fn config(&self) -> &VerifyConfig {
        &self.config
    }

    /// Challenge-response authenticator sharing this engine's stores.
    pub fn authenticator(&self) -> &Arc<ChallengeResponseAuthenticator> {
        &self.authenticator
    }

    /// Runtime settings service.
    pub fn settings(&self) -> &Arc<SettingsService> {
        &self.settings
    }

    /// Audit log.
    pub fn audit(&self) -> &Arc<ActivityAuditLog> {
        &self.audit
    }

    /// Submit an attendance claim.
    ///
    /// Commits a check-in or a check-out depending on the day's state, or
    /// returns the first failing check.
    #[instrument(skip(self, request), fields(user_id = %request.user_id))]
    pub async fn submit(
        &self,
        request: VerificationRequest,
    ) -> Result<VerificationOutcome, VerifyError> {
        let user_id = request.user_id.as_str();
        let context = &request.context;
        let policy = self.load_policy(user_id, context).await?;

        let now = self.clock.now();
        let date = self.config.local_date(now);
        let existing = match self.attendance.find(user_id, date).await {
            Ok(r) => r,
            Err(e) => return Err(self.system_failure(user_id, context, "attendance_store", e).await),
        };

        match existing {
            None => self.check_in(&request, &policy, now, date).await,
            Some(record) if record.state() == DayState::CheckedIn => {
                self.check_out(&request, &policy, now, date).await
            },
            Some(record) => {
                let error = AttendanceError::AlreadyCompleted {
                    user_id: user_id.to_string(),
                    date: date.to_string(),
                };
                Err(self
                    .reject(user_id, context, error, conflict_metadata(&record, Transition::CheckIn))
                    .await)
            },
        }
    }

    /// The user's state for the current local day.
    pub async fn status(&self, user_id: &str) -> Result<DayStatus, VerifyError> {
        let date = self.config.local_date(self.clock.now());
        let record = self.attendance.find(user_id, date).await?;
        Ok(DayStatus {
            user_id: user_id.to_string(),
            date,
            state: record.as_ref().map_or(DayState::NoRecord, AttendanceRecord::state),
            record,
        })
    }

    /// Bind a device and reference photo to a user.
    ///
    /// The photo is vetted by the anti-spoofing chain against the enrollment
    /// face-match minimum. A first enrollment never replaces an existing one;
    /// set `re_enrollment` (or call [`Self::re_enroll`]) for that.
    #[instrument(skip(self, request), fields(user_id = %request.user_id, re_enrollment = request.re_enrollment))]
    pub async fn enroll(
        &self,
        request: EnrollmentRequest,
    ) -> Result<EnrolledBiometric, VerifyError> {
        let user_id = request.user_id.as_str();
        let context = &request.context;
        let metadata = || {
            AuditMetadata::Enrollment(EnrollmentAudit {
                re_enrollment: request.re_enrollment,
                fingerprint_prefix: fingerprint_prefix(&request.device_fingerprint),
            })
        };

        let existing = match self.enrollments.get(user_id).await {
            Ok(e) => e,
            Err(e) => return Err(self.system_failure(user_id, context, "enrollment_store", e).await),
        };
        match (&existing, request.re_enrollment) {
            (Some(_), false) => {
                let error = ValidationError::AlreadyEnrolled {
                    user_id: user_id.to_string(),
                };
                return Err(self.reject(user_id, context, error, metadata()).await);
            },
            (None, true) => {
                let error = ValidationError::NotEnrolled {
                    user_id: user_id.to_string(),
                };
                return Err(self.reject(user_id, context, error, metadata()).await);
            },
            _ => {},
        }

        let policy = self.load_policy(user_id, context).await?;
        let settings = self.load_settings(user_id, context).await?;
        let vision = VisionRequest {
            user_id: user_id.to_string(),
            purpose: VisionPurpose::Enrollment,
            photo: request.photo.clone(),
            reference_photo: existing.as_ref().and_then(|e| e.reference_photo.clone()),
            acceptance: policy.acceptance_bar(),
        };
        let assessment = self
            .orchestrator
            .verify(&vision, settings.enrollment_face_match_min, context)
            .await?;

        let record = EnrolledBiometric {
            user_id: user_id.to_string(),
            fingerprint_hash: request.device_fingerprint.clone(),
            reference_photo: Some(request.photo.data_base64.clone()),
            credential: None,
            enrolled_at: self.clock.now(),
        };

        let stored = if request.re_enrollment {
            self.enrollments.re_enroll(record.clone()).await.map(|()| true)
        } else {
            self.enrollments
                .enroll(record.clone())
                .await
                .map(|o| o == EnrollOutcome::Created)
        };
        match stored {
            Ok(true) => {},
            // Lost a race with a concurrent first enrollment.
            Ok(false) => {
                let error = ValidationError::AlreadyEnrolled {
                    user_id: user_id.to_string(),
                };
                return Err(self.reject(user_id, context, error, metadata()).await);
            },
            Err(e) => return Err(self.system_failure(user_id, context, "enrollment_store", e).await),
        }

        info!(
            user_id = %user_id,
            re_enrollment = request.re_enrollment,
            spoof_provider = %assessment.provider,
            manual_review = assessment.scores.manual_review,
            "Enrollment stored"
        );
        self.audit
            .record(AuditRecord::success(user_id, context, metadata()))
            .await;
        Ok(record)
    }

    /// Replace an existing enrollment. Any registered credential is dropped.
    pub async fn re_enroll(
        &self,
        mut request: EnrollmentRequest,
    ) -> Result<EnrolledBiometric, VerifyError> {
        request.re_enrollment = true;
        self.enroll(request).await
    }

    /// Replace the active location policy.
    #[instrument(skip(self, policy, context), fields(policy_id = %policy.id))]
    pub async fn replace_policy(
        &self,
        policy: LocationPolicy,
        context: &RequestContext,
    ) -> Result<(), VerifyError> {
        let id = policy.id.clone();
        match self.policies.replace_active(policy).await {
            Ok(()) => {
                self.audit
                    .record(AuditRecord::success(
                        "admin",
                        context,
                        AuditMetadata::System {
                            component: format!("policy:{id}"),
                        },
                    ))
                    .await;
                Ok(())
            },
            Err(e) => Err(self.system_failure("admin", context, "policy_store", e).await),
        }
    }

    /// Update runtime settings and invalidate the cached snapshot.
    pub async fn update_settings(
        &self,
        settings: RuntimeSettings,
        context: &RequestContext,
    ) -> Result<Arc<RuntimeSettings>, VerifyError> {
        match self.settings.update(settings).await {
            Ok(updated) => {
                self.audit
                    .record(AuditRecord::success(
                        "admin",
                        context,
                        AuditMetadata::System {
                            component: format!("settings:r{}", updated.revision),
                        },
                    ))
                    .await;
                Ok(updated)
            },
            Err(e) => Err(self.system_failure("admin", context, "settings", e).await),
        }
    }

    async fn check_in(
        &self,
        request: &VerificationRequest,
        policy: &LocationPolicy,
        now: DateTime<Utc>,
        date: NaiveDate,
    ) -> Result<VerificationOutcome, VerifyError> {
        let user_id = request.user_id.as_str();
        let context = &request.context;

        let matched = self.check_geofence(request, policy).await?;
        let evidence = self.check_network(request, policy).await?;

        // Device binding
        let enrolled = match self.enrollments.get(user_id).await {
            Ok(e) => e,
            Err(e) => return Err(self.system_failure(user_id, context, "enrollment_store", e).await),
        };
        let binding_metadata = |enrolled: Option<&EnrolledBiometric>| {
            AuditMetadata::DeviceBinding(DeviceBindingAudit {
                supplied_prefix: fingerprint_prefix(&request.device_fingerprint),
                enrolled_prefix: enrolled.map(|e| fingerprint_prefix(&e.fingerprint_hash)),
            })
        };
        let Some(enrolled) = enrolled else {
            let error = ValidationError::NotEnrolled {
                user_id: user_id.to_string(),
            };
            return Err(self.reject(user_id, context, error, binding_metadata(None)).await);
        };
        if let Err(e) = self
            .device_binding
            .verify(&enrolled, &request.device_fingerprint)
        {
            return Err(self
                .reject(user_id, context, e, binding_metadata(Some(&enrolled)))
                .await);
        }

        // Assertion
        let assertion_verified = match &request.assertion {
            Some(submission) => {
                self.authenticator
                    .finish_authentication(
                        user_id,
                        &submission.challenge,
                        ClientResult::Completed(submission.response.clone()),
                        context,
                    )
                    .await?;
                true
            },
            None if self.config.require_assertion => {
                let metadata = AuditMetadata::Ceremony(CeremonyAudit {
                    purpose: CeremonyPurpose::Authenticate,
                    stage: "verify".into(),
                    credential_id: enrolled.credential.as_ref().map(|c| c.credential_id.clone()),
                    stored_counter: None,
                    received_counter: None,
                });
                return Err(self
                    .reject(user_id, context, ValidationError::AssertionRequired, metadata)
                    .await);
            },
            None => false,
        };

        // Anti-spoofing
        let assessment = if policy.require_liveness {
            Some(self.check_liveness(request, policy, &enrolled).await?)
        } else {
            None
        };

        let status = match policy.late_after {
            Some(cutoff) if now.with_timezone(&self.config.local_offset()).naive_local().time() > cutoff => {
                AttendanceStatus::Late
            },
            _ => AttendanceStatus::Present,
        };
        let record = AttendanceRecord {
            user_id: user_id.to_string(),
            date,
            check_in: now,
            check_out: None,
            location: request.point(),
            accuracy_m: request.accuracy_m,
            network_id: request.network_id.clone(),
            verification: summary(&matched, &evidence, assertion_verified, assessment.as_ref()),
            check_out_verification: None,
            status,
        };

        match self.attendance.insert_check_in(record.clone()).await {
            Ok(InsertOutcome::Inserted) => {},
            Ok(InsertOutcome::Conflict(existing)) => {
                let error = AttendanceError::AlreadyCheckedIn {
                    user_id: user_id.to_string(),
                    date: date.to_string(),
                };
                return Err(self
                    .reject(user_id, context, error, conflict_metadata(&existing, Transition::CheckIn))
                    .await);
            },
            Err(e) => return Err(self.system_failure(user_id, context, "attendance_store", e).await),
        }

        self.committed(&record, Transition::CheckIn, context).await;
        Ok(VerificationOutcome {
            transition: Transition::CheckIn,
            record,
        })
    }

    async fn check_out(
        &self,
        request: &VerificationRequest,
        policy: &LocationPolicy,
        now: DateTime<Utc>,
        date: NaiveDate,
    ) -> Result<VerificationOutcome, VerifyError> {
        let user_id = request.user_id.as_str();
        let context = &request.context;

        let matched = self.check_geofence(request, policy).await?;
        let evidence = self.check_network(request, policy).await?;

        let verification = summary(&matched, &evidence, false, None);
        let record = match self
            .attendance
            .close_check_out(user_id, date, now, verification)
            .await
        {
            Ok(CloseOutcome::Closed(record)) => record,
            // Closed by a concurrent request.
            Ok(CloseOutcome::NotOpen) => {
                let error = AttendanceError::AlreadyCompleted {
                    user_id: user_id.to_string(),
                    date: date.to_string(),
                };
                let metadata = AuditMetadata::Attendance(AttendanceAudit {
                    transition: Transition::CheckOut,
                    date,
                    status: AttendanceStatus::Present,
                    anchor: matched.anchor.clone(),
                    distance_m: matched.distance_m,
                    network_method: evidence.method.as_str().to_string(),
                    manual_review: false,
                });
                return Err(self.reject(user_id, context, error, metadata).await);
            },
            Err(e) => return Err(self.system_failure(user_id, context, "attendance_store", e).await),
        };

        self.committed(&record, Transition::CheckOut, context).await;
        Ok(VerificationOutcome {
            transition: Transition::CheckOut,
            record,
        })
    }

    async fn check_geofence(
        &self,
        request: &VerificationRequest,
        policy: &LocationPolicy,
    ) -> Result<GeofenceMatch, VerifyError> {
        match self
            .geofence
            .validate(request.point(), request.accuracy_m, policy)
        {
            Ok(m) => Ok(m),
            Err(e) => {
                let (anchor, distance_m, radius_m) = match &e {
                    ValidationError::OutOfRange {
                        distance_m,
                        radius_m,
                        anchor,
                    } => (Some(anchor.clone()), Some(*distance_m), Some(*radius_m)),
                    _ => (None, None, None),
                };
                let metadata = AuditMetadata::Geofence(GeofenceAudit {
                    latitude: request.latitude,
                    longitude: request.longitude,
                    accuracy_m: request.accuracy_m,
                    required_accuracy_m: policy.required_accuracy_m,
                    anchor,
                    distance_m,
                    radius_m,
                });
                Err(self.reject(&request.user_id, &request.context, e, metadata).await)
            },
        }
    }

    async fn check_network(
        &self,
        request: &VerificationRequest,
        policy: &LocationPolicy,
    ) -> Result<NetworkEvidence, VerifyError> {
        let evidence = self
            .network
            .evaluate(&request.network_id, request.device_address.as_deref(), policy)
            .await;
        match evidence.rejection() {
            None => Ok(evidence),
            Some(e) => Err(self
                .reject(&request.user_id, &request.context, e, AuditMetadata::Network(evidence))
                .await),
        }
    }

    async fn check_liveness(
        &self,
        request: &VerificationRequest,
        policy: &LocationPolicy,
        enrolled: &EnrolledBiometric,
    ) -> Result<Assessment, VerifyError> {
        let user_id = request.user_id.as_str();
        let context = &request.context;

        let Some(photo) = request.photo.clone() else {
            let metadata = AuditMetadata::AntiSpoofing(AntiSpoofAudit {
                purpose: VisionPurpose::Attendance,
                provider: None,
                attempts: Vec::new(),
                duration_ms: 0,
                scores: None,
                decision: None,
                face_match_min: None,
            });
            return Err(self
                .reject(user_id, context, ValidationError::PhotoRequired, metadata)
                .await);
        };

        let settings = self.load_settings(user_id, context).await?;
        let vision = VisionRequest {
            user_id: user_id.to_string(),
            purpose: VisionPurpose::Attendance,
            photo,
            reference_photo: enrolled.reference_photo.clone(),
            acceptance: policy.acceptance_bar(),
        };
        self.orchestrator
            .verify(&vision, settings.attendance_face_match_min, context)
            .await
    }

    async fn load_policy(
        &self,
        user_id: &str,
        context: &RequestContext,
    ) -> Result<LocationPolicy, VerifyError> {
        match self.policies.active_policy().await {
            Ok(Some(policy)) => Ok(policy),
            Ok(None) => Err(self
                .system_failure(user_id, context, "policy_store", SystemError::PolicyMissing)
                .await),
            Err(e) => Err(self.system_failure(user_id, context, "policy_store", e).await),
        }
    }

    async fn load_settings(
        &self,
        user_id: &str,
        context: &RequestContext,
    ) -> Result<Arc<RuntimeSettings>, VerifyError> {
        match self.settings.snapshot().await {
            Ok(s) => Ok(s),
            Err(e) => Err(self.system_failure(user_id, context, "settings", e).await),
        }
    }

    async fn committed(
        &self,
        record: &AttendanceRecord,
        transition: Transition,
        context: &RequestContext,
    ) {
        let verification = match transition {
            Transition::CheckIn => &record.verification,
            Transition::CheckOut => record
                .check_out_verification
                .as_ref()
                .unwrap_or(&record.verification),
        };
        info!(
            user_id = %record.user_id,
            transition = ?transition,
            date = %record.date,
            status = ?record.status,
            anchor = %verification.anchor,
            manual_review = verification.manual_review,
            "Attendance transition committed"
        );
        let metadata = AuditMetadata::Attendance(AttendanceAudit {
            transition,
            date: record.date,
            status: record.status,
            anchor: verification.anchor.clone(),
            distance_m: verification.distance_m,
            network_method: verification.network_method.clone(),
            manual_review: verification.manual_review,
        });
        self.audit
            .record(AuditRecord::success(&record.user_id, context, metadata))
            .await;
    }

    async fn reject(
        &self,
        user_id: &str,
        context: &RequestContext,
        error: impl Into<VerifyError>,
        metadata: AuditMetadata,
    ) -> VerifyError {
        let error = error.into();
        if error.is_security_event() {
            error!(
                security_event = true,
                user_id = %user_id,
                reason_code = error.reason_code(),
                error = %error,
                "Attendance claim rejected"
            );
        } else {
            info!(
                user_id = %user_id,
                reason_code = error.reason_code(),
                step = metadata.event_type(),
                "Attendance claim rejected"
            );
        }
        self.audit
            .record(AuditRecord::failure(user_id, context, &error, metadata))
            .await;
        error
    }

    async fn system_failure(
        &self,
        user_id: &str,
        context: &RequestContext,
        component: &str,
        error: SystemError,
    ) -> VerifyError {
        warn!(component, error = %error, "System failure during verification");
        self.reject(
            user_id,
            context,
            error,
            AuditMetadata::System {
                component: component.to_string(),
            },
        )
        .await
    }
}

fn summary(
    matched: &GeofenceMatch,
    evidence: &NetworkEvidence,
    assertion_verified: bool,
    assessment: Option<&Assessment>,
) -> VerificationSummary {
    VerificationSummary {
        anchor: matched.anchor.clone(),
        distance_m: matched.distance_m,
        network_method: evidence.method.as_str().to_string(),
        assertion_verified,
        spoof_provider: assessment.map(|a| a.provider.clone()),
        overall_score: assessment.map(|a| a.scores.overall_score),
        passed_layers: assessment.map(|a| a.scores.passed_layers),
        manual_review: assessment.map_or(false, |a| a.scores.manual_review),
    }
}

fn conflict_metadata(existing: &AttendanceRecord, attempted: Transition) -> AuditMetadata {
    AuditMetadata::Attendance(AttendanceAudit {
        transition: attempted,
        date: existing.date,
        status: existing.status,
        anchor: existing.verification.anchor.clone(),
        distance_m: existing.verification.distance_m,
        network_method: existing.verification.network_method.clone(),
        manual_review: existing.verification.manual_review,
    })
}
