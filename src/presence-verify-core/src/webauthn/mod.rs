//! Challenge-response authentication (WebAuthn-style).
//!
//! Two ceremonies, registration and authentication, each split into a
//! `begin` call that issues a single-use challenge and a `finish` call that
//! verifies the client's signed result.
//!
//! ## Verification
//!
//! `finish_*` consumes the challenge before anything else, so a challenge is
//! spent whether or not verification succeeds. Then, in order:
//!
//! 1. Client-reported failures map to `Cancelled`, `Unsupported` or `Timeout`
//! 2. The challenge must be unexpired and bound to this user, purpose and RP
//! 3. `clientDataJSON`: type, challenge and origin
//! 4. Authenticator data: RP id hash, user-present and user-verified flags
//! 5. Authentication only: the signature over
//!    `authenticatorData || SHA-256(clientDataJSON)` with the stored key, then
//!    a strictly increasing signature counter
//!
//! A counter that fails to increase is treated as a cloned or replayed
//! credential: the attempt fails closed and is escalated as a security event.
//! Nothing here retries; the caller restarts from `begin`.

mod data;
mod software;

pub use data::{
    AttestedCredential, AuthenticationOptions, AuthenticationResponse, AuthenticatorData,
    AuthenticatorSelection, ClientData, ClientFailure, ClientResult, CredentialDescriptor,
    PubKeyCredParam, RegistrationOptions, RegistrationResponse, RelyingParty, UserEntity, FLAG_AT,
    FLAG_UP, FLAG_UV,
};
pub use software::SoftwareAuthenticator;

use std::sync::Arc;

use presence_crypto::{constant_time_eq, CoseAlgorithm};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, instrument};

use crate::audit::{ActivityAuditLog, AuditMetadata, AuditRecord, CeremonyAudit, RequestContext};
use crate::challenge::{generate_nonce, CeremonyPurpose, Challenge, ChallengeStore};
use crate::config::{Clock, VerifyConfig};
use crate::enrollment::{AttachOutcome, CounterAdvance, EnrollmentStore, StoredCredential};
use crate::error::{CeremonyError, SystemError, ValidationError, VerifyError};
use data::{decode_b64url, encode_b64url};

/// Registered credential summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredCredential {
    /// Credential id, base64url.
    pub credential_id: String,
    /// Algorithm.
    pub algorithm: CoseAlgorithm,
}

/// Verified assertion summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedAssertion {
    /// Credential id, base64url.
    pub credential_id: String,
    /// New signature counter.
    pub sign_count: u32,
    /// Whether the authenticator verified the user.
    pub user_verified: bool,
}

/// Details gathered while verifying, for the audit trail.
#[derive(Debug, Default)]
struct CeremonyTrace {
    credential_id: Option<String>,
    stored_counter: Option<u32>,
    received_counter: Option<u32>,
}

/// Challenge-response authenticator.
pub struct ChallengeResponseAuthenticator {
    config: Arc<VerifyConfig>,
    challenges: Arc<dyn ChallengeStore>,
    enrollments: Arc<dyn EnrollmentStore>,
    audit: Arc<ActivityAuditLog>,
    clock: Arc<dyn Clock>,
}

impl ChallengeResponseAuthenticator {
    /// Create an authenticator.
    pub fn new(
        config: Arc<VerifyConfig>,
        challenges: Arc<dyn ChallengeStore>,
        enrollments: Arc<dyn EnrollmentStore>,
        audit: Arc<ActivityAuditLog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            challenges,
            enrollments,
            audit,
            clock,
        }
    }

    fn user_verification(&self) -> String {
        if self.config.require_user_verification {
            "required".into()
        } else {
            "preferred".into()
        }
    }

    fn timeout_ms(&self) -> u64 {
        self.config.ceremony_timeout.as_millis() as u64
    }

    async fn issue(&self, user_id: &str, purpose: CeremonyPurpose) -> Result<String, SystemError> {
        let now = self.clock.now();
        let ttl = chrono::Duration::from_std(self.config.challenge_ttl)
            .map_err(|e| SystemError::config(format!("challenge_ttl: {e}")))?;
        let nonce = generate_nonce();
        self.challenges
            .insert(Challenge {
                nonce: nonce.clone(),
                user_id: user_id.to_string(),
                purpose,
                rp_id: self.config.rp_id.clone(),
                issued_at: now,
                expires_at: now + ttl,
                consumed: false,
            })
            .await?;
        debug!(user_id = %user_id, purpose = ?purpose, "Challenge issued");
        Ok(nonce)
    }

    /// Start registration for an enrolled user.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn begin_registration(
        &self,
        user_id: &str,
        display_name: Option<&str>,
    ) -> Result<RegistrationOptions, VerifyError> {
        let enrolled = self
            .enrollments
            .get(user_id)
            .await?
            .ok_or_else(|| ValidationError::NotEnrolled {
                user_id: user_id.to_string(),
            })?;

        let challenge = self.issue(user_id, CeremonyPurpose::Register).await?;
        Ok(RegistrationOptions {
            challenge,
            rp: RelyingParty {
                id: self.config.rp_id.clone(),
                name: self.config.rp_name.clone(),
            },
            user: UserEntity {
                id: encode_b64url(user_id.as_bytes()),
                name: user_id.to_string(),
                display_name: display_name.unwrap_or(user_id).to_string(),
            },
            pub_key_cred_params: CoseAlgorithm::PREFERRED
                .iter()
                .map(|alg| PubKeyCredParam {
                    kind: "public-key".into(),
                    alg: alg.cose_id(),
                })
                .collect(),
            timeout: self.timeout_ms(),
            exclude_credentials: enrolled
                .credential
                .iter()
                .map(|c| CredentialDescriptor::public_key(&c.credential_id))
                .collect(),
            authenticator_selection: AuthenticatorSelection {
                authenticator_attachment: "platform".into(),
                user_verification: self.user_verification(),
                resident_key: "discouraged".into(),
            },
            attestation: "none".into(),
        })
    }

    /// Start authentication. Fails with `CredentialNotFound` when the user
    /// has no registered credential.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn begin_authentication(
        &self,
        user_id: &str,
    ) -> Result<AuthenticationOptions, VerifyError> {
        let credential = self
            .enrollments
            .get(user_id)
            .await?
            .and_then(|e| e.credential)
            .ok_or(CeremonyError::CredentialNotFound)?;

        let challenge = self.issue(user_id, CeremonyPurpose::Authenticate).await?;
        Ok(AuthenticationOptions {
            challenge,
            rp_id: self.config.rp_id.clone(),
            allow_credentials: vec![CredentialDescriptor::public_key(&credential.credential_id)],
            timeout: self.timeout_ms(),
            user_verification: self.user_verification(),
        })
    }

    /// Verify a registration result and store the credential.
    #[instrument(skip(self, result, context), fields(user_id = %user_id))]
    pub async fn finish_registration(
        &self,
        user_id: &str,
        challenge: &str,
        result: ClientResult<RegistrationResponse>,
        context: &RequestContext,
    ) -> Result<RegisteredCredential, VerifyError> {
        let mut trace = CeremonyTrace::default();
        let outcome = self
            .verify_registration(user_id, challenge, result, &mut trace)
            .await;
        self.audit_outcome(user_id, CeremonyPurpose::Register, trace, &outcome, context)
            .await;
        outcome
    }

    /// Verify an authentication assertion and advance the counter.
    #[instrument(skip(self, result, context), fields(user_id = %user_id))]
    pub async fn finish_authentication(
        &self,
        user_id: &str,
        challenge: &str,
        result: ClientResult<AuthenticationResponse>,
        context: &RequestContext,
    ) -> Result<VerifiedAssertion, VerifyError> {
        let mut trace = CeremonyTrace::default();
        let outcome = self
            .verify_authentication(user_id, challenge, result, &mut trace)
            .await;
        self.audit_outcome(user_id, CeremonyPurpose::Authenticate, trace, &outcome, context)
            .await;
        outcome
    }

    /// Drop expired and consumed challenges.
    pub async fn sweep_expired_challenges(&self) -> Result<usize, SystemError> {
        self.challenges.sweep_expired(self.clock.now()).await
    }

    async fn take_challenge(
        &self,
        user_id: &str,
        nonce: &str,
        purpose: CeremonyPurpose,
    ) -> Result<Challenge, VerifyError> {
        let challenge = self
            .challenges
            .consume(nonce)
            .await?
            .ok_or(CeremonyError::InvalidOrExpiredChallenge)?;
        if !challenge.is_usable_for(user_id, purpose, &self.config.rp_id, self.clock.now()) {
            return Err(CeremonyError::InvalidOrExpiredChallenge.into());
        }
        Ok(challenge)
    }

    fn check_client_data(
        &self,
        raw: &[u8],
        purpose: CeremonyPurpose,
        challenge: &Challenge,
    ) -> Result<(), CeremonyError> {
        let client_data = ClientData::parse(raw)?;
        if client_data.kind != purpose.client_data_type() {
            return Err(CeremonyError::MalformedResponse {
                reason: format!("unexpected clientData type {}", client_data.kind),
            });
        }
        if !constant_time_eq(
            client_data.challenge.trim_end_matches('=').as_bytes(),
            challenge.nonce.as_bytes(),
        ) {
            return Err(CeremonyError::InvalidOrExpiredChallenge);
        }
        if !self
            .config
            .allowed_origins
            .iter()
            .any(|o| o == &client_data.origin)
        {
            return Err(CeremonyError::OriginMismatch {
                origin: client_data.origin,
            });
        }
        Ok(())
    }

    fn check_authenticator_data(&self, auth_data: &AuthenticatorData) -> Result<(), CeremonyError> {
        let expected = Sha256::digest(self.config.rp_id.as_bytes());
        if !constant_time_eq(&auth_data.rp_id_hash, &expected) {
            return Err(CeremonyError::RelyingPartyMismatch);
        }
        if !auth_data.user_present() {
            return Err(CeremonyError::UserNotPresent);
        }
        if self.config.require_user_verification && !auth_data.user_verified() {
            return Err(CeremonyError::UserNotVerified);
        }
        Ok(())
    }

    async fn verify_registration(
        &self,
        user_id: &str,
        nonce: &str,
        result: ClientResult<RegistrationResponse>,
        trace: &mut CeremonyTrace,
    ) -> Result<RegisteredCredential, VerifyError> {
        let challenge = self
            .take_challenge(user_id, nonce, CeremonyPurpose::Register)
            .await;
        let response = match result {
            ClientResult::Completed(r) => r,
            ClientResult::Failed(failure) => return Err(failure.to_error().into()),
        };
        let challenge = challenge?;
        trace.credential_id = Some(response.id.clone());

        let client_data = decode_b64url("clientDataJSON", &response.client_data_json)?;
        self.check_client_data(&client_data, CeremonyPurpose::Register, &challenge)?;

        let auth_data =
            AuthenticatorData::parse(&decode_b64url("authenticatorData", &response.authenticator_data)?)?;
        self.check_authenticator_data(&auth_data)?;

        let credential_id = decode_b64url("id", &response.id)?;
        match &auth_data.attested {
            Some(attested) if constant_time_eq(&attested.credential_id, &credential_id) => {},
            Some(_) => {
                return Err(CeremonyError::MalformedResponse {
                    reason: "credential id does not match authenticator data".into(),
                }
                .into())
            },
            None => {
                return Err(CeremonyError::MalformedResponse {
                    reason: "authenticator data carries no credential".into(),
                }
                .into())
            },
        }

        let algorithm = CoseAlgorithm::from_cose_id(response.public_key_algorithm).ok_or_else(|| {
            CeremonyError::Unsupported {
                reason: format!("COSE algorithm {}", response.public_key_algorithm),
            }
        })?;
        let public_key = decode_b64url("publicKey", &response.public_key)?;
        presence_crypto::check_public_key(algorithm, &public_key).map_err(|e| {
            CeremonyError::MalformedResponse {
                reason: e.to_string(),
            }
        })?;

        let stored = StoredCredential {
            credential_id: encode_b64url(&credential_id),
            public_key,
            algorithm,
            sign_count: auth_data.sign_count,
            registered_at: self.clock.now(),
        };
        trace.received_counter = Some(stored.sign_count);
        match self.enrollments.attach_credential(user_id, stored.clone()).await? {
            AttachOutcome::Attached => {},
            AttachOutcome::NotEnrolled => {
                return Err(ValidationError::NotEnrolled {
                    user_id: user_id.to_string(),
                }
                .into())
            },
            AttachOutcome::AlreadyRegistered => return Err(CeremonyError::CredentialExists.into()),
        }

        info!(
            user_id = %user_id,
            algorithm = %algorithm,
            "Credential registered"
        );
        Ok(RegisteredCredential {
            credential_id: stored.credential_id,
            algorithm,
        })
    }

    async fn verify_authentication(
        &self,
        user_id: &str,
        nonce: &str,
        result: ClientResult<AuthenticationResponse>,
        trace: &mut CeremonyTrace,
    ) -> Result<VerifiedAssertion, VerifyError> {
        let challenge = self
            .take_challenge(user_id, nonce, CeremonyPurpose::Authenticate)
            .await;
        let response = match result {
            ClientResult::Completed(r) => r,
            ClientResult::Failed(failure) => return Err(failure.to_error().into()),
        };
        let challenge = challenge?;
        trace.credential_id = Some(response.id.clone());

        let credential = self
            .enrollments
            .get(user_id)
            .await?
            .and_then(|e| e.credential)
            .ok_or(CeremonyError::CredentialNotFound)?;
        if !constant_time_eq(
            response.id.trim_end_matches('=').as_bytes(),
            credential.credential_id.as_bytes(),
        ) {
            return Err(CeremonyError::CredentialNotFound.into());
        }
        trace.stored_counter = Some(credential.sign_count);

        let client_data = decode_b64url("clientDataJSON", &response.client_data_json)?;
        self.check_client_data(&client_data, CeremonyPurpose::Authenticate, &challenge)?;

        let raw_auth_data = decode_b64url("authenticatorData", &response.authenticator_data)?;
        let auth_data = AuthenticatorData::parse(&raw_auth_data)?;
        self.check_authenticator_data(&auth_data)?;

        let mut signed = raw_auth_data;
        signed.extend_from_slice(&Sha256::digest(&client_data));
        let signature = decode_b64url("signature", &response.signature)?;
        match presence_crypto::verify_signature(
            credential.algorithm,
            &credential.public_key,
            &signed,
            &signature,
        ) {
            Ok(true) => {},
            Ok(false) | Err(_) => return Err(CeremonyError::SignatureInvalid.into()),
        }

        let received = auth_data.sign_count;
        trace.received_counter = Some(received);
        let stored = credential.sign_count;
        let zero_tolerated = self.config.allow_zero_counter && stored == 0 && received == 0;
        if received <= stored && !zero_tolerated {
            return Err(CeremonyError::CounterNotIncreased { stored, received }.into());
        }

        match self
            .enrollments
            .advance_counter(
                user_id,
                &credential.credential_id,
                received,
                self.config.allow_zero_counter,
            )
            .await?
        {
            CounterAdvance::Advanced => {},
            // A concurrent assertion got there first.
            CounterAdvance::Regressed { stored } => {
                return Err(CeremonyError::CounterNotIncreased { stored, received }.into())
            },
            CounterAdvance::NotFound => return Err(CeremonyError::CredentialNotFound.into()),
        }

        Ok(VerifiedAssertion {
            credential_id: credential.credential_id,
            sign_count: received,
            user_verified: auth_data.user_verified(),
        })
    }

    async fn audit_outcome<T>(
        &self,
        user_id: &str,
        purpose: CeremonyPurpose,
        trace: CeremonyTrace,
        outcome: &Result<T, VerifyError>,
        context: &RequestContext,
    ) {
        let metadata = AuditMetadata::Ceremony(CeremonyAudit {
            purpose,
            stage: "verify".into(),
            credential_id: trace.credential_id,
            stored_counter: trace.stored_counter,
            received_counter: trace.received_counter,
        });

        let record = match outcome {
            Ok(_) => AuditRecord::success(user_id, context, metadata),
            Err(e) => {
                if e.is_security_event() {
                    error!(
                        security_event = true,
                        user_id = %user_id,
                        reason_code = e.reason_code(),
                        error = %e,
                        "Possible cloned or replayed credential"
                    );
                } else {
                    info!(
                        user_id = %user_id,
                        purpose = ?purpose,
                        reason_code = e.reason_code(),
                        "Ceremony rejected"
                    );
                }
                AuditRecord::failure(user_id, context, e, metadata)
            },
        };
        self.audit.record(record).await;
    }
}
