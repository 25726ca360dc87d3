//! HTTP surface.
//!
//! Thin axum handlers over [`AttendanceEngine`]. Every rejection is a
//! [`Rejection`] body with the status from [`VerifyError::http_status`].
//! Admin routes, and enrollment with `re_enrollment` set, require
//! `Authorization: Bearer <token>`. Without a configured admin token they are
//! refused.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::audit::{AuditVerificationResult, RequestContext};
use crate::engine::{AttendanceEngine, DayStatus};
use crate::error::{Rejection, VerifyError};
use crate::policy::LocationPolicy;
use crate::settings::RuntimeSettings;
use crate::types::{EnrollmentRequest, VerificationOutcome, VerificationRequest};
use crate::webauthn::{
    AuthenticationOptions, AuthenticationResponse, ClientResult, RegisteredCredential,
    RegistrationOptions, RegistrationResponse, VerifiedAssertion,
};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    /// Engine.
    pub engine: Arc<AttendanceEngine>,
    /// Bearer token for `/v1/admin/*` and re-enrollment. `None` disables them.
    pub admin_token: Option<String>,
}

/// Error returned by handlers.
#[derive(Debug)]
pub enum ApiError {
    /// Verification failure.
    Verify(VerifyError),
    /// Missing or wrong admin token.
    Unauthorized,
}

impl From<VerifyError> for ApiError {
    fn from(e: VerifyError) -> Self {
        Self::Verify(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Verify(e) => {
                let status = StatusCode::from_u16(e.http_status())
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                (status, Json(e.rejection())).into_response()
            },
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                Json(Rejection {
                    reason_code: "UNAUTHORIZED".into(),
                    message: "Admin token missing or invalid".into(),
                    measured: None,
                    threshold: None,
                }),
            )
                .into_response(),
        }
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Build the router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/attendance", post(submit_attendance))
        .route("/v1/attendance/:user_id/today", get(today))
        .route("/v1/enrollment", post(enroll))
        .route("/v1/webauthn/register/begin", post(register_begin))
        .route("/v1/webauthn/register/verify", post(register_verify))
        .route("/v1/webauthn/authenticate/begin", post(authenticate_begin))
        .route("/v1/webauthn/authenticate/verify", post(authenticate_verify))
        .route("/v1/admin/settings", post(update_settings))
        .route("/v1/admin/policy", post(replace_policy))
        .route("/v1/admin/audit/verify", get(verify_audit))
        .with_state(state)
}

/// Fill context fields the client left out from the request headers.
fn with_headers(mut context: RequestContext, headers: &HeaderMap) -> RequestContext {
    let value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    if context.user_agent.is_none() {
        context.user_agent = value(header::USER_AGENT.as_str());
    }
    if context.ip.is_none() {
        context.ip = value("x-forwarded-for")
            .and_then(|v| v.split(',').next().map(|ip| ip.trim().to_string()));
    }
    context
}

fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = &state.admin_token else {
        warn!("Rejected admin request: no admin token configured");
        return Err(ApiError::Unauthorized);
    };
    let supplied = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    match supplied {
        Some(token) if presence_crypto::constant_time_eq(token.as_bytes(), expected.as_bytes()) => {
            Ok(())
        },
        _ => {
            warn!("Rejected admin request without a valid token");
            Err(ApiError::Unauthorized)
        },
    }
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    audit_write_failures: u64,
}

async fn healthz(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "ok",
        audit_write_failures: state.engine.audit().write_failures(),
    })
}

async fn submit_attendance(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut request): Json<VerificationRequest>,
) -> ApiResult<VerificationOutcome> {
    request.context = with_headers(request.context, &headers);
    Ok(Json(state.engine.submit(request).await?))
}

async fn today(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<DayStatus> {
    Ok(Json(state.engine.status(&user_id).await?))
}

/// Enrollment result. The reference photo is not echoed back.
#[derive(Debug, Serialize, Deserialize)]
pub struct EnrollmentSummary {
    /// User id.
    pub user_id: String,
    /// When the enrollment was stored.
    pub enrolled_at: DateTime<Utc>,
    /// Whether it replaced a previous one.
    pub re_enrollment: bool,
}

async fn enroll(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut request): Json<EnrollmentRequest>,
) -> ApiResult<EnrollmentSummary> {
    // Replacing a binding clears the registered credential.
    if request.re_enrollment {
        require_admin(&state, &headers)?;
    }
    request.context = with_headers(request.context, &headers);
    let re_enrollment = request.re_enrollment;
    let enrolled = state.engine.enroll(request).await?;
    Ok(Json(EnrollmentSummary {
        user_id: enrolled.user_id,
        enrolled_at: enrolled.enrolled_at,
        re_enrollment,
    }))
}

/// `register/begin` body.
#[derive(Debug, Deserialize)]
pub struct RegisterBeginBody {
    /// User id.
    pub user_id: String,
    /// Display name shown by the authenticator.
    #[serde(default)]
    pub display_name: Option<String>,
}

/// `authenticate/begin` body.
#[derive(Debug, Deserialize)]
pub struct AuthenticateBeginBody {
    /// User id.
    pub user_id: String,
}

/// `*/verify` body.
#[derive(Debug, Deserialize)]
pub struct CeremonyVerifyBody<T> {
    /// User id.
    pub user_id: String,
    /// Challenge returned by `begin`.
    pub challenge: String,
    /// Client response or failure.
    pub result: ClientResult<T>,
    /// Caller context.
    #[serde(default)]
    pub context: RequestContext,
}

async fn register_begin(
    State(state): State<AppState>,
    Json(body): Json<RegisterBeginBody>,
) -> ApiResult<RegistrationOptions> {
    let options = state
        .engine
        .authenticator()
        .begin_registration(&body.user_id, body.display_name.as_deref())
        .await?;
    Ok(Json(options))
}

async fn register_verify(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CeremonyVerifyBody<RegistrationResponse>>,
) -> ApiResult<RegisteredCredential> {
    let context = with_headers(body.context, &headers);
    let registered = state
        .engine
        .authenticator()
        .finish_registration(&body.user_id, &body.challenge, body.result, &context)
        .await?;
    Ok(Json(registered))
}

async fn authenticate_begin(
    State(state): State<AppState>,
    Json(body): Json<AuthenticateBeginBody>,
) -> ApiResult<AuthenticationOptions> {
    let options = state
        .engine
        .authenticator()
        .begin_authentication(&body.user_id)
        .await?;
    Ok(Json(options))
}

async fn authenticate_verify(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CeremonyVerifyBody<AuthenticationResponse>>,
) -> ApiResult<VerifiedAssertion> {
    let context = with_headers(body.context, &headers);
    let verified = state
        .engine
        .authenticator()
        .finish_authentication(&body.user_id, &body.challenge, body.result, &context)
        .await?;
    Ok(Json(verified))
}

#[derive(Debug, Serialize)]
struct SettingsUpdated {
    revision: u64,
    providers: usize,
}

async fn update_settings(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(settings): Json<RuntimeSettings>,
) -> ApiResult<SettingsUpdated> {
    require_admin(&state, &headers)?;
    let context = with_headers(RequestContext::default(), &headers);
    let updated = state.engine.update_settings(settings, &context).await?;
    Ok(Json(SettingsUpdated {
        revision: updated.revision,
        providers: updated.providers.len(),
    }))
}

async fn replace_policy(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(policy): Json<LocationPolicy>,
) -> Result<StatusCode, ApiError> {
    require_admin(&state, &headers)?;
    let context = with_headers(RequestContext::default(), &headers);
    state.engine.replace_policy(policy, &context).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn verify_audit(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<AuditVerificationResult> {
    require_admin(&state, &headers)?;
    let result = state
        .engine
        .audit()
        .verify_chain()
        .await
        .map_err(VerifyError::from)?;
    Ok(Json(result))
}
