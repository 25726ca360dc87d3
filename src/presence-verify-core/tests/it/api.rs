//! HTTP surface, driven through the router without a socket.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tower::ServiceExt;

use presence_verify_core::antispoof::Recommendation;
use presence_verify_core::attendance::DayState;
use presence_verify_core::http::{router, AppState};
use presence_verify_core::webauthn::{
    AuthenticationOptions, RegistrationOptions, SoftwareAuthenticator, VerifiedAssertion,
};
use presence_verify_core::http::EnrollmentSummary;
use presence_verify_core::types::EnrollmentRequest;
use presence_verify_core::{DayStatus, EnrollmentStore, Rejection, VerificationOutcome};

use crate::support::{claim, harness, photo, scores, Harness, FINGERPRINT, ORIGIN, USER};

const ADMIN_TOKEN: &str = "s3cret-admin-token";

async fn app() -> (Router, Harness) {
    let h = harness(scores(0.95, 8, Recommendation::Approve)).await;
    let app = router(AppState {
        engine: h.engine.clone(),
        admin_token: Some(ADMIN_TOKEN.into()),
    });
    (app, h)
}

fn post(uri: &str, body: &impl serde::Serialize) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::USER_AGENT, "api-test/1.0")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send<T: DeserializeOwned>(app: &Router, request: Request<Body>) -> (StatusCode, T) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_healthz() {
    let (app, _h) = app().await;
    let (status, body): (_, Value) = send(&app, get("/healthz")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["audit_write_failures"], 0);
}

#[tokio::test]
async fn test_attendance_accept_then_status() {
    let (app, h) = app().await;

    let (status, outcome): (_, VerificationOutcome) =
        send(&app, post("/v1/attendance", &claim(40.0))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome.record.user_id, USER);

    let (status, today): (_, DayStatus) =
        send(&app, get(&format!("/v1/attendance/{USER}/today"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(today.state, DayState::CheckedIn);

    // Context supplied in the body wins over headers.
    let events = h.sink.events();
    let last = events.last().unwrap();
    assert_eq!(last.context.user_agent.as_deref(), Some("integration-test"));
}

#[tokio::test]
async fn test_attendance_rejection_body() {
    let (app, h) = app().await;

    let (status, rejection): (_, Rejection) =
        send(&app, post("/v1/attendance", &claim(120.0))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(rejection.reason_code, "OUT_OF_RANGE");
    assert!((rejection.measured.unwrap() - 120.0).abs() < 0.5);
    assert_eq!(rejection.threshold, Some(100.0));
    assert_eq!(h.provider.calls(), 0);

    let mut wrong_device = claim(10.0);
    wrong_device.device_fingerprint = "ffffffffffffffff".into();
    wrong_device.context = Default::default();
    let (status, rejection): (_, Rejection) =
        send(&app, post("/v1/attendance", &wrong_device)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(rejection.reason_code, "DEVICE_MISMATCH");
    assert_eq!(
        h.sink.events().last().unwrap().context.user_agent.as_deref(),
        Some("api-test/1.0")
    );
}

#[tokio::test]
async fn test_admin_routes_require_token() {
    let (app, _h) = app().await;

    let (status, rejection): (_, Rejection) = send(&app, get("/v1/admin/audit/verify")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(rejection.reason_code, "UNAUTHORIZED");

    let wrong = Request::builder()
        .uri("/v1/admin/audit/verify")
        .header(header::AUTHORIZATION, "Bearer not-the-token")
        .body(Body::empty())
        .unwrap();
    let (status, _): (_, Rejection) = send(&app, wrong).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let authorized = Request::builder()
        .uri("/v1/admin/audit/verify")
        .header(header::AUTHORIZATION, format!("Bearer {ADMIN_TOKEN}"))
        .body(Body::empty())
        .unwrap();
    let (status, report): (_, Value) = send(&app, authorized).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["valid"], true);
}

#[tokio::test]
async fn test_admin_routes_closed_without_configured_token() {
    let h = harness(scores(0.95, 8, Recommendation::Approve)).await;
    let app = router(AppState {
        engine: h.engine.clone(),
        admin_token: None,
    });

    let (status, rejection): (_, Rejection) = send(&app, get("/v1/admin/audit/verify")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(rejection.reason_code, "UNAUTHORIZED");

    // Any bearer value is refused, including an empty one.
    let guessed = Request::builder()
        .uri("/v1/admin/audit/verify")
        .header(header::AUTHORIZATION, "Bearer ")
        .body(Body::empty())
        .unwrap();
    let (status, _): (_, Rejection) = send(&app, guessed).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let mut request = post(
        "/v1/admin/settings",
        &json!({ "attendance_face_match_min": 0.1, "enrollment_face_match_min": 0.1 }),
    );
    request
        .headers_mut()
        .insert(header::AUTHORIZATION, "Bearer anything".parse().unwrap());
    let (status, _): (_, Rejection) = send(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let current = h.engine.settings().snapshot().await.unwrap();
    assert_ne!(current.attendance_face_match_min, 0.1);
}

fn re_enrollment(fingerprint: &str) -> EnrollmentRequest {
    EnrollmentRequest {
        user_id: USER.into(),
        device_fingerprint: fingerprint.into(),
        photo: photo(),
        re_enrollment: true,
        context: Default::default(),
    }
}

#[tokio::test]
async fn test_re_enrollment_requires_admin_token() {
    let (app, h) = app().await;
    let other_device = "ffff0000ffff0000";

    let (status, rejection): (_, Rejection) =
        send(&app, post("/v1/enrollment", &re_enrollment(other_device))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(rejection.reason_code, "UNAUTHORIZED");

    let stored = h.enrollments.get(USER).await.unwrap().unwrap();
    assert_eq!(stored.fingerprint_hash, FINGERPRINT);

    let mut from_other_device = claim(10.0);
    from_other_device.device_fingerprint = other_device.into();
    let (status, rejection): (_, Rejection) =
        send(&app, post("/v1/attendance", &from_other_device)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(rejection.reason_code, "DEVICE_MISMATCH");

    let mut authorized = post("/v1/enrollment", &re_enrollment(other_device));
    authorized.headers_mut().insert(
        header::AUTHORIZATION,
        format!("Bearer {ADMIN_TOKEN}").parse().unwrap(),
    );
    let (status, summary): (_, EnrollmentSummary) = send(&app, authorized).await;
    assert_eq!(status, StatusCode::OK);
    assert!(summary.re_enrollment);
    let stored = h.enrollments.get(USER).await.unwrap().unwrap();
    assert_eq!(stored.fingerprint_hash, other_device);
}

#[tokio::test]
async fn test_settings_update_bumps_revision() {
    let (app, h) = app().await;

    let mut request = post(
        "/v1/admin/settings",
        &json!({ "attendance_face_match_min": 0.8, "enrollment_face_match_min": 0.9 }),
    );
    request.headers_mut().insert(
        header::AUTHORIZATION,
        format!("Bearer {ADMIN_TOKEN}").parse().unwrap(),
    );
    let (status, body): (_, Value) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["revision"], 1);

    let current = h.engine.settings().snapshot().await.unwrap();
    assert_eq!(current.attendance_face_match_min, 0.8);
}

#[tokio::test]
async fn test_ceremony_over_http() {
    let (app, _h) = app().await;
    let mut device = SoftwareAuthenticator::es256(ORIGIN);

    let (status, options): (_, RegistrationOptions) = send(
        &app,
        post("/v1/webauthn/register/begin", &json!({ "user_id": USER })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let response = device.register(&options).unwrap();
    let (status, _): (_, Value) = send(
        &app,
        post(
            "/v1/webauthn/register/verify",
            &json!({
                "user_id": USER,
                "challenge": options.challenge,
                "result": { "completed": response },
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, options): (_, AuthenticationOptions) = send(
        &app,
        post("/v1/webauthn/authenticate/begin", &json!({ "user_id": USER })),
    )
    .await;
    let assertion = device.authenticate(&options).unwrap();
    let body = json!({
        "user_id": USER,
        "challenge": options.challenge,
        "result": { "completed": assertion },
    });
    let (status, verified): (_, VerifiedAssertion) =
        send(&app, post("/v1/webauthn/authenticate/verify", &body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(verified.sign_count, device.counter);

    // Replaying the same body hits a spent challenge.
    let (status, rejection): (_, Rejection) =
        send(&app, post("/v1/webauthn/authenticate/verify", &body)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(rejection.reason_code, "INVALID_OR_EXPIRED_CHALLENGE");

    // A cancelled prompt is reported as such.
    let (_, options): (_, AuthenticationOptions) = send(
        &app,
        post("/v1/webauthn/authenticate/begin", &json!({ "user_id": USER })),
    )
    .await;
    let (status, rejection): (_, Rejection) = send(
        &app,
        post(
            "/v1/webauthn/authenticate/verify",
            &json!({
                "user_id": USER,
                "challenge": options.challenge,
                "result": { "failed": { "name": "NotAllowedError" } },
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(rejection.reason_code, "CEREMONY_CANCELLED");
}

#[tokio::test]
async fn test_policy_replacement_applies_to_next_claim() {
    let (app, _h) = app().await;

    let mut policy = crate::support::scenario_policy();
    policy.anchors[0].radius_m = 200.0;
    let mut request = post("/v1/admin/policy", &policy);
    request.headers_mut().insert(
        header::AUTHORIZATION,
        format!("Bearer {ADMIN_TOKEN}").parse().unwrap(),
    );
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let (status, _): (_, VerificationOutcome) =
        send(&app, post("/v1/attendance", &claim(120.0))).await;
    assert_eq!(status, StatusCode::OK);

    // A policy without anchors is refused and the active one stays.
    policy.anchors.clear();
    let mut request = post("/v1/admin/policy", &policy);
    request.headers_mut().insert(
        header::AUTHORIZATION,
        format!("Bearer {ADMIN_TOKEN}").parse().unwrap(),
    );
    let (status, rejection): (_, Rejection) = send(&app, request).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(rejection.reason_code, "SYSTEM_ERROR");
}
