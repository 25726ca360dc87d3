//! Anti-spoofing acceptance and provider fallback.

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;

use presence_verify_core::antispoof::{
    AcceptanceBar, AntiSpoofPolicy, AntiSpoofingOrchestrator, Recommendation, VisionProvider,
    VisionPurpose, VisionRequest, BASIC_VALIDATION,
};
use presence_verify_core::audit::{ActivityAuditLog, AuditMetadata, MemoryAuditSink, RequestContext};
use presence_verify_core::error::{ProviderError, VerifyError};

use crate::support::{config, harness_with_provider, photo, scores, CountingProvider, USER};

fn recommendation() -> impl Strategy<Value = Recommendation> {
    prop_oneof![
        Just(Recommendation::Approve),
        Just(Recommendation::Review),
        Just(Recommendation::Reject),
    ]
}

fn request() -> VisionRequest {
    VisionRequest {
        user_id: USER.into(),
        purpose: VisionPurpose::Attendance,
        photo: photo(),
        reference_photo: None,
        acceptance: AcceptanceBar {
            score_threshold: 0.90,
            min_passed_layers: 7,
        },
    }
}

fn http_down(name: &str) -> Arc<CountingProvider> {
    CountingProvider::failing(
        name,
        ProviderError::Http {
            provider: name.into(),
            message: "503 Service Unavailable".into(),
        },
    )
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        max_shrink_iters: 1000,
        ..ProptestConfig::default()
    })]

    /// Lowering either threshold never turns an acceptance into a rejection.
    #[test]
    fn acceptance_monotone_in_thresholds(
        overall in 0.0f64..=1.0,
        passed in 0usize..=8,
        rec in recommendation(),
        threshold in 0.0f64..=1.0,
        min_layers in 0u8..=8,
        lower_threshold_by in 0.0f64..=1.0,
        lower_layers_by in 0u8..=8
    ) {
        let policy = AntiSpoofPolicy;
        let s = scores(overall, passed, rec);
        let strict = AcceptanceBar { score_threshold: threshold, min_passed_layers: min_layers };
        let lenient = AcceptanceBar {
            score_threshold: (threshold - lower_threshold_by).max(0.0),
            min_passed_layers: min_layers.saturating_sub(lower_layers_by),
        };
        if policy.evaluate(&s, &strict).accepted {
            prop_assert!(policy.evaluate(&s, &lenient).accepted);
        }
    }

    /// Only an approval that meets both thresholds is accepted.
    #[test]
    fn acceptance_requires_all_conditions(
        overall in 0.0f64..=1.0,
        passed in 0usize..=8,
        rec in recommendation()
    ) {
        let bar = AcceptanceBar { score_threshold: 0.90, min_passed_layers: 7 };
        let decision = AntiSpoofPolicy.evaluate(&scores(overall, passed, rec), &bar);
        let expected = overall >= 0.90 && passed >= 7 && rec == Recommendation::Approve;
        prop_assert_eq!(decision.accepted, expected);
        prop_assert_eq!(decision.failures.is_empty(), expected);
    }
}

#[tokio::test]
async fn test_all_providers_down_still_decides() {
    let first = http_down("primary");
    let second = CountingProvider::failing(
        "secondary",
        ProviderError::Quota {
            provider: "secondary".into(),
        },
    );
    let sink = Arc::new(MemoryAuditSink::new());
    let chain: Vec<Arc<dyn VisionProvider>> = vec![first.clone(), second.clone()];
    let orchestrator = AntiSpoofingOrchestrator::new(
        chain,
        Duration::from_secs(1),
        Arc::new(ActivityAuditLog::new(sink.clone())),
    );
    assert_eq!(orchestrator.chain(), ["primary", "secondary", BASIC_VALIDATION]);

    let assessment = orchestrator
        .verify(&request(), 0.75, &RequestContext::default())
        .await
        .unwrap();
    assert_eq!(assessment.provider, BASIC_VALIDATION);
    assert!(assessment.scores.manual_review);
    assert_eq!(first.calls(), 1);
    assert_eq!(second.calls(), 1);

    let attempts: Vec<_> = assessment.attempts.iter().map(|a| a.succeeded).collect();
    assert_eq!(attempts, [false, false, true]);

    let events = sink.events();
    assert_eq!(events.len(), 1);
    let AuditMetadata::AntiSpoofing(meta) = &events[0].metadata else {
        panic!("expected anti-spoofing metadata");
    };
    assert_eq!(meta.attempts.len(), 3);
    assert!(meta.scores.as_ref().unwrap().manual_review);
}

#[tokio::test]
async fn test_broken_fallback_exhausts_chain() {
    let primary = http_down("primary");
    let chain: Vec<Arc<dyn VisionProvider>> = vec![primary.clone()];
    let orchestrator = AntiSpoofingOrchestrator::new(
        chain,
        Duration::from_secs(1),
        Arc::new(ActivityAuditLog::new(Arc::new(MemoryAuditSink::new()))),
    )
    .with_fallback(http_down("last-resort") as Arc<dyn VisionProvider>);

    let err = orchestrator
        .verify(&request(), 0.75, &RequestContext::default())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        VerifyError::Provider(ProviderError::ChainExhausted { attempts: 2 })
    );
    assert_eq!(err.http_status(), 502);
    assert_eq!(primary.calls(), 1);
}

#[tokio::test]
async fn test_check_in_on_basic_validation_is_flagged() {
    let h = harness_with_provider(config(), http_down("primary")).await;

    let outcome = h.engine.submit(crate::support::claim(50.0)).await.unwrap();
    let verification = &outcome.record.verification;
    assert_eq!(verification.spoof_provider.as_deref(), Some(BASIC_VALIDATION));
    assert!(verification.manual_review);
    assert_eq!(h.provider.calls(), 1);
}

#[tokio::test]
async fn test_rejected_photo_blocks_check_in() {
    let h = crate::support::harness(scores(0.85, 8, Recommendation::Approve)).await;

    let err = h.engine.submit(crate::support::claim(50.0)).await.unwrap_err();
    assert_eq!(err.reason_code(), "SPOOF_CHECK_FAILED");
    let rejection = err.rejection();
    assert_eq!(rejection.measured, Some(0.85));
    assert_eq!(rejection.threshold, Some(0.90));

    let today = h.engine.status(USER).await.unwrap();
    assert!(today.record.is_none());
}
