//! Single-use ceremony challenges.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::SystemError;

/// Nonce size in bytes.
pub const NONCE_LEN: usize = 32;

/// What a challenge was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CeremonyPurpose {
    /// Credential registration.
    Register,
    /// Authentication assertion.
    Authenticate,
}

impl CeremonyPurpose {
    /// Expected `clientDataJSON.type`.
    #[must_use]
    pub fn client_data_type(self) -> &'static str {
        match self {
            Self::Register => "webauthn.create",
            Self::Authenticate => "webauthn.get",
        }
    }
}

/// A server-issued challenge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Challenge {
    /// Random nonce, base64url without padding.
    pub nonce: String,
    /// User it was issued to.
    pub user_id: String,
    /// Ceremony it belongs to.
    pub purpose: CeremonyPurpose,
    /// Relying party it is bound to.
    pub rp_id: String,
    /// Issue time.
    pub issued_at: DateTime<Utc>,
    /// Expiry.
    pub expires_at: DateTime<Utc>,
    /// Set once a verify call has used it.
    pub consumed: bool,
}

impl Challenge {
    /// Whether the challenge is past its expiry at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether the challenge can verify a `purpose` ceremony for `user_id`
    /// on `rp_id` at `now`.
    #[must_use]
    pub fn is_usable_for(
        &self,
        user_id: &str,
        purpose: CeremonyPurpose,
        rp_id: &str,
        now: DateTime<Utc>,
    ) -> bool {
        !self.consumed
            && !self.is_expired(now)
            && self.purpose == purpose
            && self.user_id == user_id
            && self.rp_id == rp_id
    }
}

/// Generate a fresh nonce.
#[must_use]
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Challenge persistence.
#[async_trait]
pub trait ChallengeStore: Send + Sync {
    /// Store a new challenge.
    async fn insert(&self, challenge: Challenge) -> Result<(), SystemError>;

    /// Mark a challenge consumed and return its state from before the call.
    ///
    /// Exactly one caller observes `consumed == false` for a given nonce.
    async fn consume(&self, nonce: &str) -> Result<Option<Challenge>, SystemError>;

    /// Remove challenges that are expired or consumed. Returns how many.
    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize, SystemError>;
}

/// Challenges held in memory.
#[derive(Debug, Default)]
pub struct InMemoryChallengeStore {
    challenges: Mutex<HashMap<String, Challenge>>,
}

impl InMemoryChallengeStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored challenges.
    #[must_use]
    pub fn len(&self) -> usize {
        self.challenges.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ChallengeStore for InMemoryChallengeStore {
    async fn insert(&self, challenge: Challenge) -> Result<(), SystemError> {
        let mut challenges = self
            .challenges
            .lock()
            .map_err(|_| SystemError::storage("challenge lock poisoned"))?;
        challenges.insert(challenge.nonce.clone(), challenge);
        Ok(())
    }

    async fn consume(&self, nonce: &str) -> Result<Option<Challenge>, SystemError> {
        let mut challenges = self
            .challenges
            .lock()
            .map_err(|_| SystemError::storage("challenge lock poisoned"))?;
        Ok(challenges.get_mut(nonce).map(|c| {
            let before = c.clone();
            c.consumed = true;
            before
        }))
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize, SystemError> {
        let mut challenges = self
            .challenges
            .lock()
            .map_err(|_| SystemError::storage("challenge lock poisoned"))?;
        let before = challenges.len();
        challenges.retain(|_, c| !c.consumed && !c.is_expired(now));
        Ok(before - challenges.len())
    }
}
