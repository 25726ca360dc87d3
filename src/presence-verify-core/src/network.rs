//! Network presence validation.
//!
//! Two ways to confirm the claimant is on the site network:
//!
//! - **Allow-list**: the declared network identifier (SSID) must be one the
//!   policy lists.
//! - **Oracle**: a LAN controller reports the devices currently associated
//!   with the site network; the claimant's device address must be among them.
//!
//! When an oracle is configured it decides, and a request without a device
//! address is rejected. If the oracle is unavailable (error or timeout) the
//! allow-list decides. Unavailability never passes a claim by itself.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::error::{SystemError, ValidationError};
use crate::policy::LocationPolicy;

/// A device the oracle reports as associated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociatedDevice {
    /// Hardware address.
    pub address: String,
    /// Friendly name, if the controller knows one.
    #[serde(default)]
    pub name: Option<String>,
}

/// Oracle failures. All mean "fall back to the allow-list".
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OracleError {
    /// The oracle could not answer.
    #[error("Presence oracle unavailable: {0}")]
    Unavailable(String),
}

/// External network-presence oracle.
#[async_trait]
pub trait PresenceOracle: Send + Sync {
    /// Oracle name, for the audit trail.
    fn name(&self) -> &str;

    /// Devices currently associated with the site network, filtered to
    /// `device_address` where the oracle supports it.
    async fn associated_devices(
        &self,
        device_address: &str,
    ) -> Result<Vec<AssociatedDevice>, OracleError>;
}

/// How a network decision was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceMethod {
    /// SSID allow-list.
    AllowList,
    /// Live association reported by the oracle.
    Oracle,
}

impl PresenceMethod {
    /// Label used in errors and logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AllowList => "allow_list",
            Self::Oracle => "oracle",
        }
    }
}

/// Evidence behind a network decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkEvidence {
    /// Declared network identifier.
    pub network_id: String,
    /// Method that decided.
    pub method: PresenceMethod,
    /// Whether the request carried a device address.
    #[serde(default)]
    pub device_address_supplied: bool,
    /// Whether the oracle was queried.
    pub oracle_consulted: bool,
    /// Whether the oracle answered.
    pub oracle_available: bool,
    /// Matching device reported by the oracle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_device: Option<AssociatedDevice>,
    /// Final decision.
    pub accepted: bool,
}

impl NetworkEvidence {
    /// The rejection this evidence implies, if any.
    #[must_use]
    pub fn rejection(&self) -> Option<ValidationError> {
        if self.accepted {
            return None;
        }
        if self.method == PresenceMethod::Oracle && !self.device_address_supplied {
            return Some(ValidationError::DeviceAddressRequired {
                network_id: self.network_id.clone(),
            });
        }
        Some(ValidationError::NetworkNotRecognized {
            network_id: self.network_id.clone(),
            method: self.method.as_str().to_string(),
        })
    }
}

/// Network presence validator.
pub struct NetworkPresenceValidator {
    oracle: Option<Arc<dyn PresenceOracle>>,
    oracle_timeout: Duration,
}

impl NetworkPresenceValidator {
    /// Allow-list only.
    #[must_use]
    pub fn allow_list_only() -> Self {
        Self {
            oracle: None,
            oracle_timeout: Duration::from_secs(3),
        }
    }

    /// Oracle first, allow-list fallback.
    #[must_use]
    pub fn with_oracle(oracle: Arc<dyn PresenceOracle>, oracle_timeout: Duration) -> Self {
        Self {
            oracle: Some(oracle),
            oracle_timeout,
        }
    }

    /// Decide whether the claimant is on the site network.
    ///
    /// Always returns evidence; [`NetworkEvidence::rejection`] turns a
    /// negative decision into an error.
    #[instrument(skip(self, policy), fields(network_id = %network_id))]
    pub async fn evaluate(
        &self,
        network_id: &str,
        device_address: Option<&str>,
        policy: &LocationPolicy,
    ) -> NetworkEvidence {
        let mut evidence = NetworkEvidence {
            network_id: network_id.to_string(),
            method: PresenceMethod::AllowList,
            device_address_supplied: device_address.is_some(),
            oracle_consulted: false,
            oracle_available: false,
            matched_device: None,
            accepted: false,
        };

        if let Some(oracle) = &self.oracle {
            let Some(address) = device_address else {
                warn!(oracle = oracle.name(), "Rejected claim without a device address");
                evidence.method = PresenceMethod::Oracle;
                return evidence;
            };
            evidence.oracle_consulted = true;
            match tokio::time::timeout(self.oracle_timeout, oracle.associated_devices(address))
                .await
            {
                Ok(Ok(devices)) => {
                    evidence.oracle_available = true;
                    evidence.method = PresenceMethod::Oracle;
                    evidence.matched_device = devices
                        .into_iter()
                        .find(|d| same_address(&d.address, address));
                    evidence.accepted = evidence.matched_device.is_some();
                    debug!(
                        oracle = oracle.name(),
                        accepted = evidence.accepted,
                        "Presence oracle answered"
                    );
                    return evidence;
                },
                Ok(Err(e)) => {
                    warn!(oracle = oracle.name(), error = %e, "Falling back to allow-list");
                },
                Err(_) => {
                    warn!(
                        oracle = oracle.name(),
                        timeout_ms = self.oracle_timeout.as_millis() as u64,
                        "Presence oracle timed out, falling back to allow-list"
                    );
                },
            }
        }

        evidence.accepted = policy.is_network_allowed(network_id);
        evidence
    }
}

/// Hardware addresses compare case-insensitively with `:` and `-` separators
/// treated alike.
fn same_address(a: &str, b: &str) -> bool {
    let norm = |s: &str| {
        s.chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect::<String>()
    };
    norm(a) == norm(b)
}

#[derive(Debug, Deserialize)]
struct ClientListResponse {
    clients: Vec<AssociatedDevice>,
}

/// Oracle backed by a LAN controller's management API.
///
/// Queries `GET {base}/api/v1/clients?site={site}&address={address}` with a
/// bearer token and expects `{"clients": [{"address": .., "name": ..}]}`.
pub struct HttpPresenceOracle {
    client: Client,
    base_url: String,
    site: String,
    token: String,
}

impl HttpPresenceOracle {
    /// Create an oracle client.
    pub fn new(
        base_url: &str,
        site: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SystemError> {
        let client = ClientBuilder::new()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(2)))
            .user_agent(format!("presence-verify/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SystemError::config(format!("Failed to create oracle client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            site: site.into(),
            token: token.into(),
        })
    }
}

#[async_trait]
impl PresenceOracle for HttpPresenceOracle {
    fn name(&self) -> &str {
        "lan-controller"
    }

    async fn associated_devices(
        &self,
        device_address: &str,
    ) -> Result<Vec<AssociatedDevice>, OracleError> {
        let url = format!("{}/api/v1/clients", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .query(&[("site", self.site.as_str()), ("address", device_address)])
            .send()
            .await
            .map_err(|e| OracleError::Unavailable(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(OracleError::Unavailable(format!("HTTP {status} from {url}")));
        }

        response
            .json::<ClientListResponse>()
            .await
            .map(|r| r.clients)
            .map_err(|e| OracleError::Unavailable(format!("unparseable response: {e}")))
    }
}
