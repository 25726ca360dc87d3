//! Challenge-response ceremony properties.
//!
//! A challenge is accepted at most once, and a credential's signature counter
//! never moves backwards.

use std::sync::Arc;

use proptest::prelude::*;

use presence_verify_core::audit::{AuditMetadata, AuditOutcome, RequestContext};
use presence_verify_core::error::{CeremonyError, VerifyError};
use presence_verify_core::webauthn::{ClientResult, SoftwareAuthenticator};
use presence_verify_core::{AttendanceEngine, EnrollmentStore};

use crate::support::{harness, scores, Harness, ORIGIN, USER};
use presence_verify_core::antispoof::Recommendation;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

async fn register(engine: &AttendanceEngine, device: &mut SoftwareAuthenticator) {
    let auth = engine.authenticator();
    let options = auth.begin_registration(USER, Some("Employee 42")).await.unwrap();
    let response = device.register(&options).unwrap();
    auth.finish_registration(
        USER,
        &options.challenge,
        ClientResult::Completed(response),
        &RequestContext::default(),
    )
    .await
    .unwrap();
}

async fn approved_harness() -> Harness {
    harness(scores(0.95, 8, Recommendation::Approve)).await
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 16,
        max_shrink_iters: 100,
        ..ProptestConfig::default()
    })]

    /// However many valid assertions race on one challenge, exactly one wins.
    #[test]
    fn challenge_accepted_at_most_once(contenders in 2usize..8) {
        let successes = runtime().block_on(async move {
            let h = approved_harness().await;
            let mut device = SoftwareAuthenticator::es256(ORIGIN);
            register(&h.engine, &mut device).await;

            let options = h.engine.authenticator().begin_authentication(USER).await.unwrap();
            let mut tasks = Vec::new();
            for i in 0..contenders {
                let assertion = device
                    .assert_with_counter(&options.rp_id, &options.challenge, i as u32 + 1)
                    .unwrap();
                let engine = Arc::clone(&h.engine);
                let challenge = options.challenge.clone();
                tasks.push(tokio::spawn(async move {
                    engine
                        .authenticator()
                        .finish_authentication(
                            USER,
                            &challenge,
                            ClientResult::Completed(assertion),
                            &RequestContext::default(),
                        )
                        .await
                }));
            }

            let mut successes = 0;
            for task in tasks {
                match task.await.unwrap() {
                    Ok(_) => successes += 1,
                    Err(e) => assert_eq!(
                        e,
                        VerifyError::Ceremony(CeremonyError::InvalidOrExpiredChallenge)
                    ),
                }
            }
            successes
        });
        prop_assert_eq!(successes, 1);
    }

    /// A counter at or below the stored value is rejected as a security
    /// event and leaves the stored value unchanged.
    #[test]
    fn counter_never_regresses(
        rounds in 1usize..5,
        step in 1u32..1000,
        replay_back in 0u32..1000
    ) {
        let (error, stored, alert) = runtime().block_on(async move {
            let h = approved_harness().await;
            let mut device = SoftwareAuthenticator::ed25519(ORIGIN);
            device.counter_step = step;
            register(&h.engine, &mut device).await;
            let auth = h.engine.authenticator();

            for _ in 0..rounds {
                let options = auth.begin_authentication(USER).await.unwrap();
                let assertion = device.authenticate(&options).unwrap();
                auth.finish_authentication(
                    USER,
                    &options.challenge,
                    ClientResult::Completed(assertion),
                    &RequestContext::default(),
                )
                .await
                .unwrap();
            }

            let current = device.counter;
            let replayed = current.saturating_sub(replay_back % (current + 1));
            let options = auth.begin_authentication(USER).await.unwrap();
            let stale = device
                .assert_with_counter(&options.rp_id, &options.challenge, replayed)
                .unwrap();
            let error = auth
                .finish_authentication(
                    USER,
                    &options.challenge,
                    ClientResult::Completed(stale),
                    &RequestContext::default(),
                )
                .await
                .unwrap_err();

            let stored = h
                .enrollments
                .get(USER)
                .await
                .unwrap()
                .and_then(|e| e.credential)
                .map(|c| c.sign_count);
            let last = h.sink.events().pop().unwrap();
            let alert = last.outcome == AuditOutcome::SecurityAlert
                && matches!(last.metadata, AuditMetadata::Ceremony(_));
            (error, stored.map(|s| (s, current, replayed)), alert)
        });

        let (stored, current, replayed) = stored.unwrap();
        prop_assert_eq!(
            error,
            VerifyError::Ceremony(CeremonyError::CounterNotIncreased { stored: current, received: replayed })
        );
        prop_assert_eq!(stored, current);
        prop_assert!(alert);
    }
}

#[tokio::test]
async fn test_assertion_on_check_in() {
    let h = approved_harness().await;
    let mut device = SoftwareAuthenticator::es256(ORIGIN);
    register(&h.engine, &mut device).await;

    let options = h.engine.authenticator().begin_authentication(USER).await.unwrap();
    let assertion = device.authenticate(&options).unwrap();

    let mut claim = crate::support::claim(40.0);
    claim.assertion = Some(presence_verify_core::types::AssertionSubmission {
        challenge: options.challenge.clone(),
        response: assertion.clone(),
    });
    let outcome = h.engine.submit(claim).await.unwrap();
    assert!(outcome.record.verification.assertion_verified);

    // The same assertion cannot be replayed on another claim.
    let err = h
        .engine
        .authenticator()
        .finish_authentication(
            USER,
            &options.challenge,
            ClientResult::Completed(assertion),
            &RequestContext::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(err, VerifyError::Ceremony(CeremonyError::InvalidOrExpiredChallenge));
}

#[tokio::test]
async fn test_failed_assertion_stops_check_in_before_provider() {
    let h = approved_harness().await;
    let mut device = SoftwareAuthenticator::es256(ORIGIN);
    register(&h.engine, &mut device).await;

    let options = h.engine.authenticator().begin_authentication(USER).await.unwrap();
    let mut claim = crate::support::claim(40.0);
    claim.assertion = Some(presence_verify_core::types::AssertionSubmission {
        challenge: options.challenge.clone(),
        // Signed over a different challenge.
        response: device
            .assert_with_counter(&options.rp_id, "another-challenge", 5)
            .unwrap(),
    });

    let err = h.engine.submit(claim).await.unwrap_err();
    assert_eq!(err, VerifyError::Ceremony(CeremonyError::InvalidOrExpiredChallenge));
    assert_eq!(h.provider.calls(), 0);
}
