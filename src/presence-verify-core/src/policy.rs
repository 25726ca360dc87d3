//! Location policy: where, on which networks, and how strictly.
//!
//! The active policy is read from the [`PolicyStore`] at the start of every
//! verification and never cached across requests, so administrative changes
//! apply to the next attempt.

use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::antispoof::AcceptanceBar;
use crate::antispoof::LAYER_COUNT;
use crate::error::SystemError;

/// One geofence center.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anchor {
    /// Display name ("HQ", "Warehouse B").
    pub name: String,
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Allowed radius in meters.
    pub radius_m: f64,
}

/// The active location policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationPolicy {
    /// Policy id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Anchors, OR-combined.
    pub anchors: Vec<Anchor>,
    /// Allowed network identifiers (SSIDs).
    pub allowed_networks: Vec<String>,
    /// Minimum anti-spoofing overall score.
    pub score_threshold: f64,
    /// Minimum number of anti-spoofing layers that must pass.
    pub min_passed_layers: u8,
    /// Worst acceptable GPS accuracy radius, in meters.
    pub required_accuracy_m: f64,
    /// Whether a photo and anti-spoofing check are required on check-in.
    #[serde(default = "default_true")]
    pub require_liveness: bool,
    /// Local time after which a check-in is recorded as late.
    #[serde(default)]
    pub late_after: Option<NaiveTime>,
    /// Last administrative change.
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

impl LocationPolicy {
    /// Check the policy is coherent.
    pub fn validate(&self) -> Result<(), SystemError> {
        let invalid = |reason: String| Err(SystemError::InvalidPolicy { reason });

        if self.anchors.is_empty() {
            return invalid("at least one anchor is required".into());
        }
        for anchor in &self.anchors {
            if !(-90.0..=90.0).contains(&anchor.latitude)
                || !(-180.0..=180.0).contains(&anchor.longitude)
            {
                return invalid(format!("anchor {} has invalid coordinates", anchor.name));
            }
            if !(anchor.radius_m.is_finite() && anchor.radius_m > 0.0) {
                return invalid(format!("anchor {} needs a positive radius", anchor.name));
            }
        }
        if !(0.0..=1.0).contains(&self.score_threshold) {
            return invalid(format!(
                "score_threshold must be within [0, 1], got {}",
                self.score_threshold
            ));
        }
        if usize::from(self.min_passed_layers) > LAYER_COUNT {
            return invalid(format!(
                "min_passed_layers must be at most {LAYER_COUNT}, got {}",
                self.min_passed_layers
            ));
        }
        if !(self.required_accuracy_m.is_finite() && self.required_accuracy_m > 0.0) {
            return invalid("required_accuracy_m must be positive".into());
        }
        Ok(())
    }

    /// Anti-spoofing bar derived from this policy.
    #[must_use]
    pub fn acceptance_bar(&self) -> AcceptanceBar {
        AcceptanceBar {
            score_threshold: self.score_threshold,
            min_passed_layers: self.min_passed_layers,
        }
    }

    /// Whether a network identifier is on the allow-list.
    ///
    /// SSIDs are compared exactly; they are case sensitive.
    #[must_use]
    pub fn is_network_allowed(&self, network_id: &str) -> bool {
        self.allowed_networks.iter().any(|n| n == network_id)
    }
}

/// Source of the active location policy.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// The active policy, if one is configured.
    async fn active_policy(&self) -> Result<Option<LocationPolicy>, SystemError>;

    /// Replace the active policy.
    async fn replace_active(&self, policy: LocationPolicy) -> Result<(), SystemError>;
}

/// Policy held in memory.
#[derive(Debug, Default)]
pub struct InMemoryPolicyStore {
    active: RwLock<Option<LocationPolicy>>,
}

impl InMemoryPolicyStore {
    /// Create a store with `policy` active.
    #[must_use]
    pub fn with_policy(policy: LocationPolicy) -> Self {
        Self {
            active: RwLock::new(Some(policy)),
        }
    }
}

#[async_trait]
impl PolicyStore for InMemoryPolicyStore {
    async fn active_policy(&self) -> Result<Option<LocationPolicy>, SystemError> {
        self.active
            .read()
            .map(|p| p.clone())
            .map_err(|_| SystemError::storage("policy lock poisoned"))
    }

    async fn replace_active(&self, mut policy: LocationPolicy) -> Result<(), SystemError> {
        policy.validate()?;
        policy.updated_at = Utc::now();
        info!(
            policy_id = %policy.id,
            anchors = policy.anchors.len(),
            networks = policy.allowed_networks.len(),
            score_threshold = policy.score_threshold,
            min_passed_layers = policy.min_passed_layers,
            "Active location policy replaced"
        );
        let mut active = self
            .active
            .write()
            .map_err(|_| SystemError::storage("policy lock poisoned"))?;
        *active = Some(policy);
        Ok(())
    }
}
