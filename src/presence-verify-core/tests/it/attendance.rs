//! End-to-end attendance flows through the engine.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use proptest::prelude::*;

use presence_verify_core::antispoof::{Recommendation, VisionProvider};
use presence_verify_core::attendance::{AttendanceStatus, DayState, Transition};
use presence_verify_core::audit::{
    verify_audit_jsonl, ActivityAuditLog, AuditMetadata, AuditOutcome, JsonlAuditSink,
};
use presence_verify_core::policy::InMemoryPolicyStore;
use presence_verify_core::settings::{InMemorySettingsSource, SettingsService};
use presence_verify_core::types::EnrollmentRequest;
use presence_verify_core::EngineBuilder;

use crate::support::{
    claim, config, harness, photo, scenario_policy, scores, CountingProvider, FINGERPRINT, USER,
};

fn approving() -> presence_verify_core::antispoof::SpoofScores {
    scores(0.92, 8, Recommendation::Approve)
}

#[tokio::test]
async fn test_check_in_within_radius() {
    let h = harness(approving()).await;

    let outcome = h.engine.submit(claim(80.0)).await.unwrap();
    assert_eq!(outcome.transition, Transition::CheckIn);
    assert_eq!(outcome.record.status, AttendanceStatus::Present);
    assert_eq!(outcome.record.verification.anchor, "HQ");
    assert!((outcome.record.verification.distance_m - 80.0).abs() < 0.5);
    assert_eq!(h.provider.calls(), 1);

    let events = h.sink.events();
    let last = events.last().unwrap();
    assert_eq!(last.outcome, AuditOutcome::Success);
    assert_eq!(last.event_type(), "attendance");
}

#[tokio::test]
async fn test_out_of_range_stops_before_provider() {
    let h = harness(approving()).await;

    let err = h.engine.submit(claim(120.0)).await.unwrap_err();
    assert_eq!(err.reason_code(), "OUT_OF_RANGE");
    assert_eq!(err.http_status(), 422);
    let rejection = err.rejection();
    assert!((rejection.measured.unwrap() - 120.0).abs() < 0.5);
    assert_eq!(rejection.threshold, Some(100.0));
    assert_eq!(h.provider.calls(), 0);

    let events = h.sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].reason_code.as_deref(), Some("OUT_OF_RANGE"));
    let AuditMetadata::Geofence(meta) = &events[0].metadata else {
        panic!("expected geofence metadata");
    };
    assert_eq!(meta.radius_m, Some(100.0));
}

#[tokio::test]
async fn test_poor_accuracy_rejected() {
    let h = harness(approving()).await;
    let mut request = claim(10.0);
    request.accuracy_m = 45.0;

    let err = h.engine.submit(request).await.unwrap_err();
    assert_eq!(err.reason_code(), "ACCURACY_TOO_LOW");
    assert_eq!(err.rejection().threshold, Some(20.0));
}

#[tokio::test]
async fn test_unknown_network_rejected() {
    let h = harness(approving()).await;
    let mut request = claim(10.0);
    request.network_id = "CoffeeShop-Guest".into();

    let err = h.engine.submit(request).await.unwrap_err();
    assert_eq!(err.reason_code(), "NETWORK_NOT_RECOGNIZED");
    assert_eq!(h.provider.calls(), 0);
    assert!(matches!(
        h.sink.events().last().unwrap().metadata,
        AuditMetadata::Network(_)
    ));
}

#[tokio::test]
async fn test_device_mismatch_is_security_event() {
    let h = harness(approving()).await;
    let mut request = claim(10.0);
    request.device_fingerprint = "0000aaaa1111bbbb".into();

    let err = h.engine.submit(request).await.unwrap_err();
    assert_eq!(err.reason_code(), "DEVICE_MISMATCH");
    assert_eq!(err.http_status(), 403);
    assert!(err.is_security_event());
    assert_eq!(h.provider.calls(), 0);

    let last = h.sink.events().pop().unwrap();
    assert_eq!(last.outcome, AuditOutcome::SecurityAlert);
    let AuditMetadata::DeviceBinding(meta) = &last.metadata else {
        panic!("expected device binding metadata");
    };
    assert_eq!(meta.supplied_prefix, "0000aaaa");
    assert_eq!(meta.enrolled_prefix.as_deref(), Some(&FINGERPRINT[..8]));

    let today = h.engine.status(USER).await.unwrap();
    assert_eq!(today.state, DayState::NoRecord);
}

#[tokio::test]
async fn test_day_cycle() {
    let h = harness(approving()).await;

    let first = h.engine.submit(claim(20.0)).await.unwrap();
    assert_eq!(first.transition, Transition::CheckIn);

    h.clock.advance(Duration::from_secs(9 * 3600));
    let mut leaving = claim(30.0);
    // Check-out needs no photo.
    leaving.photo = None;
    let second = h.engine.submit(leaving).await.unwrap();
    assert_eq!(second.transition, Transition::CheckOut);
    assert_eq!(second.record.check_in, first.record.check_in);
    assert!(second.record.check_out.unwrap() > second.record.check_in);
    assert_eq!(h.provider.calls(), 1);

    let today = h.engine.status(USER).await.unwrap();
    assert_eq!(today.state, DayState::CheckedOut);

    // A new local day starts from no record.
    h.clock.advance(Duration::from_secs(15 * 3600));
    let next_day = h.engine.status(USER).await.unwrap();
    assert_eq!(next_day.state, DayState::NoRecord);
    assert_ne!(next_day.date, today.date);
}

#[tokio::test]
async fn test_concurrent_check_ins_commit_once() {
    let h = harness(approving()).await;

    let tasks: Vec<_> = (0..2)
        .map(|_| {
            let engine = Arc::clone(&h.engine);
            tokio::spawn(async move { engine.submit(claim(20.0)).await })
        })
        .collect();

    let mut check_ins = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(outcome) if outcome.transition == Transition::CheckIn => check_ins += 1,
            Ok(_) => {},
            Err(e) => assert_eq!(e.reason_code(), "ALREADY_CHECKED_IN"),
        }
    }
    assert_eq!(check_ins, 1);
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 24,
        max_shrink_iters: 100,
        ..ProptestConfig::default()
    })]

    /// Once the day is complete, every further claim is rejected with the
    /// same reason and the stored record does not change.
    #[test]
    fn completed_day_is_terminal(
        distances in prop::collection::vec(0.0f64..500.0, 1..5),
        with_photo in any::<bool>()
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let (codes, before, after) = runtime.block_on(async move {
            let h = harness(approving()).await;
            h.engine.submit(claim(10.0)).await.unwrap();
            h.engine.submit(claim(10.0)).await.unwrap();
            let before = h.engine.status(USER).await.unwrap().record;

            let mut codes = Vec::new();
            for distance in distances {
                let mut request = claim(distance);
                if !with_photo {
                    request.photo = None;
                }
                codes.push(h.engine.submit(request).await.unwrap_err().reason_code());
            }
            let after = h.engine.status(USER).await.unwrap().record;
            (codes, before, after)
        });

        prop_assert!(codes.iter().all(|c| *c == "ALREADY_COMPLETED"));
        prop_assert!(before.is_some());
        prop_assert_eq!(before, after);
    }
}

#[tokio::test]
async fn test_audit_file_verifies_and_detects_tampering() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.jsonl");

    let audit = Arc::new(ActivityAuditLog::new(Arc::new(JsonlAuditSink::new(&path))));
    let provider = CountingProvider::returning("primary", approving());
    let chain: Vec<Arc<dyn VisionProvider>> = vec![provider];
    let engine = EngineBuilder::new(
        config(),
        Arc::new(InMemoryPolicyStore::with_policy(scenario_policy())),
        Arc::new(SettingsService::new(
            Arc::new(InMemorySettingsSource::default()),
            Duration::from_secs(30),
        )),
        audit.clone(),
    )
    .providers(chain)
    .build()
    .unwrap();

    engine
        .enroll(EnrollmentRequest {
            user_id: USER.into(),
            device_fingerprint: FINGERPRINT.into(),
            photo: photo(),
            re_enrollment: false,
            context: Default::default(),
        })
        .await
        .unwrap();
    engine.submit(claim(20.0)).await.unwrap();
    engine.submit(claim(500.0)).await.unwrap_err();

    let report = verify_audit_jsonl(&path).unwrap();
    assert!(report.valid, "{:?}", report.errors);
    assert!(report.genesis_valid);
    assert!(report.total_entries >= 4);
    assert_eq!(audit.write_failures(), 0);

    // Resuming continues the same chain.
    let resumed = ActivityAuditLog::resume(Arc::new(JsonlAuditSink::new(&path)))
        .await
        .unwrap();
    let next = resumed
        .record(presence_verify_core::audit::AuditRecord::success(
            USER,
            &Default::default(),
            AuditMetadata::System {
                component: "test".into(),
            },
        ))
        .await
        .unwrap();
    assert_eq!(next.sequence, report.total_entries + 1);
    assert!(verify_audit_jsonl(&path).unwrap().valid);

    // Rewrite the subject of the second entry.
    let data = std::fs::read_to_string(&path).unwrap();
    let mut lines: Vec<String> = data.lines().map(String::from).collect();
    let mut entry: serde_json::Value = serde_json::from_str(&lines[1]).unwrap();
    entry["timestamp"] = serde_json::json!(Utc::now());
    entry["user_id"] = serde_json::json!("someone-else");
    lines[1] = entry.to_string();
    std::fs::write(&path, lines.join("\n") + "\n").unwrap();

    let report = verify_audit_jsonl(&path).unwrap();
    assert!(!report.valid);
    assert!(!report.hash_chain_valid);
    assert_eq!(report.first_tampered_sequence, Some(2));
}
