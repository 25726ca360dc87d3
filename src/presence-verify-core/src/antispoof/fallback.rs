//! "First success wins" over an ordered list of strategies.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::ProviderError;

/// One strategy attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderAttempt {
    /// Strategy name.
    pub provider: String,
    /// Whether it produced the result.
    pub succeeded: bool,
    /// Time spent, milliseconds.
    pub duration_ms: u64,
    /// Failure, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Winning result and the attempts leading to it.
#[derive(Debug, Clone)]
pub struct FirstSuccess<T> {
    /// Winning strategy.
    pub winner: String,
    /// Its result.
    pub value: T,
    /// Every attempt in order, the winner last.
    pub attempts: Vec<ProviderAttempt>,
}

/// Run `strategies` in order until one succeeds.
///
/// Each attempt is bounded by `timeout`. A strategy is not started until the
/// previous one has failed. If all fail the attempts are returned as the
/// error.
pub async fn first_success<T, F, Fut, I>(
    strategies: I,
    timeout: Duration,
) -> Result<FirstSuccess<T>, Vec<ProviderAttempt>>
where
    I: IntoIterator<Item = (String, F)>,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempts = Vec::new();

    for (name, strategy) in strategies {
        let started = Instant::now();
        let result = match tokio::time::timeout(timeout, strategy()).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout {
                provider: name.clone(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(value) => {
                debug!(provider = %name, duration_ms, "Strategy succeeded");
                attempts.push(ProviderAttempt {
                    provider: name.clone(),
                    succeeded: true,
                    duration_ms,
                    error: None,
                });
                return Ok(FirstSuccess {
                    winner: name,
                    value,
                    attempts,
                });
            },
            Err(e) => {
                warn!(provider = %name, duration_ms, error = %e, "Strategy failed, trying next");
                attempts.push(ProviderAttempt {
                    provider: name,
                    succeeded: false,
                    duration_ms,
                    error: Some(e.to_string()),
                });
            },
        }
    }

    Err(attempts)
}
