//! Static configuration for the verification engine.
//!
//! Values here are fixed for the life of the process. Anything an
//! administrator can change at runtime lives in [`crate::settings`] (cached,
//! invalidated on update) or in the [`crate::policy::LocationPolicy`]
//! (read fresh on every request).

use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};

use crate::error::SystemError;

/// Configuration for the verification engine.
#[derive(Debug, Clone)]
pub struct VerifyConfig {
    /// Relying party id credentials are scoped to (a registrable domain).
    pub rp_id: String,
    /// Relying party display name.
    pub rp_name: String,
    /// Origins accepted in client data.
    pub allowed_origins: Vec<String>,
    /// Lifetime of a ceremony challenge.
    pub challenge_ttl: Duration,
    /// Ceremony timeout hint sent to the client.
    pub ceremony_timeout: Duration,
    /// Time budget for one vision provider call.
    pub provider_timeout: Duration,
    /// Time budget for one network-presence oracle query.
    pub oracle_timeout: Duration,
    /// How long a runtime settings snapshot is served before refresh.
    pub settings_ttl: Duration,
    /// Require the user-verified flag on ceremonies.
    pub require_user_verification: bool,
    /// Tolerate authenticators that never implement a signature counter
    /// (always 0). Off by default: a non-increasing counter fails closed.
    pub allow_zero_counter: bool,
    /// Require a signed assertion on every check-in.
    pub require_assertion: bool,
    /// Offset from UTC used to decide the attendance calendar day.
    pub utc_offset_minutes: i32,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            rp_id: "localhost".into(),
            rp_name: "Presence Verify".into(),
            allowed_origins: vec!["https://localhost".into()],
            challenge_ttl: Duration::from_secs(120),
            ceremony_timeout: Duration::from_secs(60),
            provider_timeout: Duration::from_secs(8),
            oracle_timeout: Duration::from_secs(3),
            settings_ttl: Duration::from_secs(30),
            require_user_verification: true,
            allow_zero_counter: false,
            require_assertion: false,
            utc_offset_minutes: 0,
        }
    }
}

impl VerifyConfig {
    /// Check the configuration is usable.
    pub fn validate(&self) -> Result<(), SystemError> {
        if self.rp_id.trim().is_empty() {
            return Err(SystemError::config("rp_id must not be empty"));
        }
        if self.allowed_origins.is_empty() {
            return Err(SystemError::config("at least one allowed origin is required"));
        }
        if self.challenge_ttl.is_zero() || self.challenge_ttl > Duration::from_secs(600) {
            return Err(SystemError::config(
                "challenge_ttl must be between 1s and 10 minutes",
            ));
        }
        if self.provider_timeout.is_zero() {
            return Err(SystemError::config("provider_timeout must be positive"));
        }
        if FixedOffset::east_opt(self.utc_offset_minutes * 60).is_none() {
            return Err(SystemError::config(format!(
                "utc_offset_minutes out of range: {}",
                self.utc_offset_minutes
            )));
        }
        Ok(())
    }

    /// The attendance time zone.
    #[must_use]
    pub fn local_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }

    /// Calendar day an instant falls on in the attendance time zone.
    #[must_use]
    pub fn local_date(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.local_offset()).date_naive()
    }
}

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a clock fixed at `start`.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.write() {
            *now += chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
        }
    }

    /// Jump to a specific instant.
    pub fn set(&self, at: DateTime<Utc>) {
        if let Ok(mut now) = self.now.write() {
            *now = at;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.read().map(|n| *n).unwrap_or_else(|_| Utc::now())
    }
}
