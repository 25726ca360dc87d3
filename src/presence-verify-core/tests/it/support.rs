//! Shared fixtures.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use presence_verify_core::antispoof::{
    LayerScores, Recommendation, SpoofLayer, SpoofScores, VisionProvider, VisionRequest,
};
use presence_verify_core::audit::{ActivityAuditLog, MemoryAuditSink, RequestContext};
use presence_verify_core::config::ManualClock;
use presence_verify_core::enrollment::{EnrolledBiometric, EnrollmentStore, InMemoryEnrollmentStore};
use presence_verify_core::error::ProviderError;
use presence_verify_core::geofence::destination_point;
use presence_verify_core::policy::{Anchor, InMemoryPolicyStore, LocationPolicy};
use presence_verify_core::settings::{InMemorySettingsSource, SettingsService};
use presence_verify_core::{AttendanceEngine, EngineBuilder, GeoPoint, Photo, VerificationRequest, VerifyConfig};

pub const HQ: GeoPoint = GeoPoint::new(-6.2, 106.8);
pub const USER: &str = "emp-0042";
pub const FINGERPRINT: &str = "9c1e4f0a7b3d5e2f";
pub const NETWORK: &str = "HQ-Staff";
pub const ORIGIN: &str = "https://attend.example.com";
pub const RP_ID: &str = "attend.example.com";

/// Scores with the first `passed` layers passing.
pub fn scores(overall: f64, passed: usize, recommendation: Recommendation) -> SpoofScores {
    let mut layers = LayerScores::uniform(overall, false);
    for layer in SpoofLayer::ALL.iter().take(passed) {
        layers.get_mut(*layer).passed = true;
    }
    SpoofScores {
        layers,
        overall_score: overall,
        passed_layers: passed as u8,
        recommendation,
        face_match_confidence: None,
        manual_review: false,
        notes: None,
    }
}

/// Provider returning a fixed result and counting calls.
pub struct CountingProvider {
    name: String,
    result: Result<SpoofScores, ProviderError>,
    calls: AtomicUsize,
}

impl CountingProvider {
    pub fn returning(name: &str, scores: SpoofScores) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            result: Ok(scores),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing(name: &str, error: ProviderError) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            result: Err(error),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VisionProvider for CountingProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn analyze(&self, _request: &VisionRequest) -> Result<SpoofScores, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone()
    }
}

/// Radius 100 m around HQ, threshold 0.90, 7 layers, accuracy 20 m.
pub fn scenario_policy() -> LocationPolicy {
    LocationPolicy {
        id: "hq".into(),
        name: "Head office".into(),
        anchors: vec![Anchor {
            name: "HQ".into(),
            latitude: HQ.latitude,
            longitude: HQ.longitude,
            radius_m: 100.0,
        }],
        allowed_networks: vec![NETWORK.into()],
        score_threshold: 0.90,
        min_passed_layers: 7,
        required_accuracy_m: 20.0,
        require_liveness: true,
        late_after: None,
        updated_at: Utc::now(),
    }
}

pub fn config() -> VerifyConfig {
    VerifyConfig {
        rp_id: RP_ID.into(),
        allowed_origins: vec![ORIGIN.into()],
        // Jakarta
        utc_offset_minutes: 7 * 60,
        ..VerifyConfig::default()
    }
}

pub fn photo() -> Photo {
    Photo {
        data_base64: "/9j/4AAQSkZJRgABAQAAAQABAAD/".into(),
        mime_type: "image/jpeg".into(),
    }
}

/// A claim `distance_m` from HQ with good accuracy, network and device.
pub fn claim(distance_m: f64) -> VerificationRequest {
    let at = destination_point(HQ, 30.0, distance_m);
    VerificationRequest {
        user_id: USER.into(),
        latitude: at.latitude,
        longitude: at.longitude,
        accuracy_m: 15.0,
        network_id: NETWORK.into(),
        device_fingerprint: FINGERPRINT.into(),
        device_address: None,
        photo: Some(photo()),
        assertion: None,
        context: RequestContext {
            ip: Some("10.0.4.17".into()),
            user_agent: Some("integration-test".into()),
            device_info: None,
        },
    }
}

pub struct Harness {
    pub engine: Arc<AttendanceEngine>,
    pub sink: Arc<MemoryAuditSink>,
    pub provider: Arc<CountingProvider>,
    pub enrollments: Arc<InMemoryEnrollmentStore>,
    pub clock: Arc<ManualClock>,
}

/// Engine with `USER` enrolled on `FINGERPRINT`, one provider returning
/// `provider_scores`, at 08:00 Jakarta time.
pub async fn harness(provider_scores: SpoofScores) -> Harness {
    harness_with(config(), provider_scores).await
}

pub async fn harness_with(config: VerifyConfig, provider_scores: SpoofScores) -> Harness {
    harness_with_provider(config, CountingProvider::returning("primary", provider_scores)).await
}

/// Engine whose only vision provider is `provider`.
pub async fn harness_with_provider(config: VerifyConfig, provider: Arc<CountingProvider>) -> Harness {
    let sink = Arc::new(MemoryAuditSink::new());
    let audit = Arc::new(ActivityAuditLog::new(sink.clone()));
    let enrollments = Arc::new(InMemoryEnrollmentStore::new());
    enrollments
        .enroll(EnrolledBiometric {
            user_id: USER.into(),
            fingerprint_hash: FINGERPRINT.into(),
            reference_photo: None,
            credential: None,
            enrolled_at: Utc::now(),
        })
        .await
        .unwrap();

    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 3, 10, 1, 0, 0).unwrap(),
    ));
    let chain: Vec<Arc<dyn VisionProvider>> = vec![provider.clone()];
    let settings = Arc::new(SettingsService::new(
        Arc::new(InMemorySettingsSource::default()),
        Duration::from_secs(30),
    ));

    let engine = EngineBuilder::new(
        config,
        Arc::new(InMemoryPolicyStore::with_policy(scenario_policy())),
        settings,
        audit,
    )
    .clock(clock.clone())
    .enrollment_store(enrollments.clone())
    .providers(chain)
    .build()
    .unwrap();

    Harness {
        engine: Arc::new(engine),
        sink,
        provider,
        enrollments,
        clock,
    }
}
