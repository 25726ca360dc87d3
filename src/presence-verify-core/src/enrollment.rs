//! Device binding and enrolled credentials.
//!
//! One [`EnrolledBiometric`] per user: the device fingerprint hash bound at
//! enrollment, the reference photo, and the public-key credential registered
//! through the challenge-response ceremony. The fingerprint only changes
//! through [`EnrollmentStore::re_enroll`]; the signature counter only moves
//! forward through [`EnrollmentStore::advance_counter`].

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use presence_crypto::{constant_time_eq, CoseAlgorithm};
use serde::{Deserialize, Serialize};

use crate::error::{SystemError, ValidationError};

/// A registered public-key credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredCredential {
    /// Credential id, base64url.
    pub credential_id: String,
    /// Public key (SPKI DER, SEC1 point, or raw Ed25519).
    pub public_key: Vec<u8>,
    /// Signature algorithm.
    pub algorithm: CoseAlgorithm,
    /// Last accepted signature counter.
    pub sign_count: u32,
    /// Registration time.
    pub registered_at: DateTime<Utc>,
}

/// A user's enrollment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrolledBiometric {
    /// User id.
    pub user_id: String,
    /// Device fingerprint hash.
    pub fingerprint_hash: String,
    /// Reference photo (base64), used for face matching.
    pub reference_photo: Option<String>,
    /// Registered credential, once the registration ceremony completes.
    pub credential: Option<StoredCredential>,
    /// Enrollment time.
    pub enrolled_at: DateTime<Utc>,
}

/// Result of [`EnrollmentStore::enroll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollOutcome {
    /// New record stored.
    Created,
    /// A record already exists; nothing changed.
    AlreadyEnrolled,
}

/// Result of [`EnrollmentStore::attach_credential`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    /// Credential stored.
    Attached,
    /// The user has no enrollment.
    NotEnrolled,
    /// A credential is already registered.
    AlreadyRegistered,
}

/// Result of [`EnrollmentStore::advance_counter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterAdvance {
    /// Counter stored.
    Advanced,
    /// The stored counter is already at or above the new value.
    Regressed {
        /// Stored value.
        stored: u32,
    },
    /// No such credential.
    NotFound,
}

/// Enrollment persistence.
#[async_trait]
pub trait EnrollmentStore: Send + Sync {
    /// Enrollment for a user.
    async fn get(&self, user_id: &str) -> Result<Option<EnrolledBiometric>, SystemError>;

    /// Store a first enrollment. Never replaces an existing one.
    async fn enroll(&self, record: EnrolledBiometric) -> Result<EnrollOutcome, SystemError>;

    /// Replace an enrollment, clearing any registered credential.
    async fn re_enroll(&self, record: EnrolledBiometric) -> Result<(), SystemError>;

    /// Attach a newly registered credential.
    async fn attach_credential(
        &self,
        user_id: &str,
        credential: StoredCredential,
    ) -> Result<AttachOutcome, SystemError>;

    /// Compare-and-set the signature counter. Only strictly greater values
    /// are stored (equal values are accepted when `allow_equal_zero` and
    /// both are zero).
    async fn advance_counter(
        &self,
        user_id: &str,
        credential_id: &str,
        new_count: u32,
        allow_equal_zero: bool,
    ) -> Result<CounterAdvance, SystemError>;
}

/// Enrollments held in memory.
#[derive(Debug, Default)]
pub struct InMemoryEnrollmentStore {
    records: Mutex<HashMap<String, EnrolledBiometric>>,
}

impl InMemoryEnrollmentStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, EnrolledBiometric>>, SystemError> {
        self.records
            .lock()
            .map_err(|_| SystemError::storage("enrollment lock poisoned"))
    }
}

#[async_trait]
impl EnrollmentStore for InMemoryEnrollmentStore {
    async fn get(&self, user_id: &str) -> Result<Option<EnrolledBiometric>, SystemError> {
        Ok(self.lock()?.get(user_id).cloned())
    }

    async fn enroll(&self, record: EnrolledBiometric) -> Result<EnrollOutcome, SystemError> {
        let mut records = self.lock()?;
        if records.contains_key(&record.user_id) {
            return Ok(EnrollOutcome::AlreadyEnrolled);
        }
        records.insert(record.user_id.clone(), record);
        Ok(EnrollOutcome::Created)
    }

    async fn re_enroll(&self, mut record: EnrolledBiometric) -> Result<(), SystemError> {
        record.credential = None;
        self.lock()?.insert(record.user_id.clone(), record);
        Ok(())
    }

    async fn attach_credential(
        &self,
        user_id: &str,
        credential: StoredCredential,
    ) -> Result<AttachOutcome, SystemError> {
        let mut records = self.lock()?;
        let Some(record) = records.get_mut(user_id) else {
            return Ok(AttachOutcome::NotEnrolled);
        };
        if record.credential.is_some() {
            return Ok(AttachOutcome::AlreadyRegistered);
        }
        record.credential = Some(credential);
        Ok(AttachOutcome::Attached)
    }

    async fn advance_counter(
        &self,
        user_id: &str,
        credential_id: &str,
        new_count: u32,
        allow_equal_zero: bool,
    ) -> Result<CounterAdvance, SystemError> {
        let mut records = self.lock()?;
        let Some(credential) = records
            .get_mut(user_id)
            .and_then(|r| r.credential.as_mut())
            .filter(|c| c.credential_id == credential_id)
        else {
            return Ok(CounterAdvance::NotFound);
        };

        let stored = credential.sign_count;
        if new_count > stored || (allow_equal_zero && stored == 0 && new_count == 0) {
            credential.sign_count = new_count;
            Ok(CounterAdvance::Advanced)
        } else {
            Ok(CounterAdvance::Regressed { stored })
        }
    }
}

/// Device fingerprint matching.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeviceBinding;

impl DeviceBinding {
    /// Check a supplied fingerprint against the enrolled one. Exact match
    /// only.
    pub fn verify(
        &self,
        enrolled: &EnrolledBiometric,
        supplied_fingerprint: &str,
    ) -> Result<(), ValidationError> {
        if constant_time_eq(
            enrolled.fingerprint_hash.as_bytes(),
            supplied_fingerprint.as_bytes(),
        ) {
            Ok(())
        } else {
            Err(ValidationError::DeviceMismatch {
                user_id: enrolled.user_id.clone(),
            })
        }
    }
}

/// Short prefix of a fingerprint hash, safe to log.
#[must_use]
pub fn fingerprint_prefix(fingerprint: &str) -> String {
    fingerprint.chars().take(8).collect()
}
