//! Runtime settings with a short-TTL, process-wide snapshot cache.
//!
//! Settings that administrators change at runtime (vision provider
//! credentials, face-match minimums) are read through [`SettingsService`].
//! Readers get an immutable [`Arc<RuntimeSettings>`] snapshot; the snapshot
//! is refreshed from the [`SettingsSource`] once it is older than the TTL and
//! dropped immediately by [`SettingsService::invalidate`], which the
//! administrative update path calls.
//!
//! Readers tolerate bounded staleness: if a refresh fails while a snapshot is
//! held, the old snapshot keeps being served up to `max_staleness`.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::SystemError;

/// Credentials and endpoint for one vision provider.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderCredential {
    /// Provider name; matches [`crate::antispoof::VisionProvider::name`].
    pub name: String,
    /// Scoring endpoint URL.
    pub endpoint: String,
    /// Bearer token.
    pub api_key: String,
    /// Model identifier passed through to the provider.
    #[serde(default)]
    pub model: Option<String>,
}

impl std::fmt::Debug for ProviderCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderCredential")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .finish()
    }
}

/// Administrator-managed runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Provider credentials.
    pub providers: Vec<ProviderCredential>,
    /// Minimum face-match confidence on the attendance path.
    pub attendance_face_match_min: f64,
    /// Minimum face-match confidence on the enrollment path.
    pub enrollment_face_match_min: f64,
    /// Monotonic revision, bumped by each administrative update.
    pub revision: u64,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            attendance_face_match_min: 0.75,
            enrollment_face_match_min: 0.85,
            revision: 0,
        }
    }
}

impl RuntimeSettings {
    /// Credentials for a provider, by name.
    #[must_use]
    pub fn provider(&self, name: &str) -> Option<&ProviderCredential> {
        self.providers.iter().find(|p| p.name == name)
    }

    /// Check the settings are usable.
    pub fn validate(&self) -> Result<(), SystemError> {
        for (label, value) in [
            ("attendance_face_match_min", self.attendance_face_match_min),
            ("enrollment_face_match_min", self.enrollment_face_match_min),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(SystemError::config(format!(
                    "{label} must be within [0, 1], got {value}"
                )));
            }
        }
        for p in &self.providers {
            if p.name.trim().is_empty() || p.endpoint.trim().is_empty() {
                return Err(SystemError::config(
                    "provider entries need a name and an endpoint",
                ));
            }
        }
        Ok(())
    }
}

/// Where runtime settings are persisted.
#[async_trait]
pub trait SettingsSource: Send + Sync {
    /// Load the current settings.
    async fn load(&self) -> Result<RuntimeSettings, SystemError>;

    /// Persist new settings.
    async fn store(&self, settings: &RuntimeSettings) -> Result<(), SystemError>;
}

/// Settings held in memory.
#[derive(Debug, Default)]
pub struct InMemorySettingsSource {
    settings: RwLock<RuntimeSettings>,
}

impl InMemorySettingsSource {
    /// Create a source holding `settings`.
    #[must_use]
    pub fn new(settings: RuntimeSettings) -> Self {
        Self {
            settings: RwLock::new(settings),
        }
    }
}

#[async_trait]
impl SettingsSource for InMemorySettingsSource {
    async fn load(&self) -> Result<RuntimeSettings, SystemError> {
        self.settings
            .read()
            .map(|s| s.clone())
            .map_err(|_| SystemError::storage("settings lock poisoned"))
    }

    async fn store(&self, settings: &RuntimeSettings) -> Result<(), SystemError> {
        let mut current = self
            .settings
            .write()
            .map_err(|_| SystemError::storage("settings lock poisoned"))?;
        *current = settings.clone();
        Ok(())
    }
}

/// Settings persisted as a JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileSettingsSource {
    path: PathBuf,
}

impl JsonFileSettingsSource {
    /// Create a source backed by `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SettingsSource for JsonFileSettingsSource {
    async fn load(&self) -> Result<RuntimeSettings, SystemError> {
        let data = tokio::fs::read(&self.path).await.map_err(|e| {
            SystemError::storage(format!("read {}: {}", self.path.display(), e))
        })?;
        serde_json::from_slice(&data).map_err(|e| {
            SystemError::config(format!("parse {}: {}", self.path.display(), e))
        })
    }

    async fn store(&self, settings: &RuntimeSettings) -> Result<(), SystemError> {
        let data = serde_json::to_vec_pretty(settings)
            .map_err(|e| SystemError::config(format!("serialize settings: {e}")))?;
        // Write-then-rename so readers never see a half-written file.
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data)
            .await
            .map_err(|e| SystemError::storage(format!("write {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| SystemError::storage(format!("rename {}: {}", tmp.display(), e)))
    }
}

struct Snapshot {
    settings: Arc<RuntimeSettings>,
    fetched_at: Instant,
}

/// Read-mostly settings cache with explicit invalidation.
pub struct SettingsService {
    source: Arc<dyn SettingsSource>,
    cached: RwLock<Option<Snapshot>>,
    ttl: Duration,
    max_staleness: Duration,
}

impl SettingsService {
    /// Create a service over `source`, refreshing snapshots older than `ttl`.
    pub fn new(source: Arc<dyn SettingsSource>, ttl: Duration) -> Self {
        Self {
            source,
            cached: RwLock::new(None),
            ttl,
            max_staleness: ttl * 4,
        }
    }

    /// Override how long a stale snapshot may be served when refresh fails.
    #[must_use]
    pub fn with_max_staleness(mut self, max_staleness: Duration) -> Self {
        self.max_staleness = max_staleness.max(self.ttl);
        self
    }

    /// Current settings snapshot.
    pub async fn snapshot(&self) -> Result<Arc<RuntimeSettings>, SystemError> {
        let held = self.held();
        if let Some((settings, age)) = &held {
            if *age < self.ttl {
                return Ok(Arc::clone(settings));
            }
        }

        match self.refresh().await {
            Ok(settings) => Ok(settings),
            Err(e) => match held {
                Some((settings, age)) if age < self.max_staleness => {
                    warn!(
                        error = %e,
                        age_ms = age.as_millis() as u64,
                        "Settings refresh failed, serving stale snapshot"
                    );
                    Ok(settings)
                },
                _ => Err(e),
            },
        }
    }

    /// Drop the cached snapshot; the next reader reloads.
    pub fn invalidate(&self) {
        if let Ok(mut cached) = self.cached.write() {
            *cached = None;
        }
        debug!("Settings snapshot invalidated");
    }

    /// Administrative update: persist, then invalidate.
    ///
    /// The stored revision is bumped past the current one.
    pub async fn update(&self, mut settings: RuntimeSettings) -> Result<Arc<RuntimeSettings>, SystemError> {
        settings.validate()?;
        let current = self.source.load().await.map(|s| s.revision).unwrap_or(0);
        settings.revision = settings.revision.max(current + 1);
        self.source.store(&settings).await?;
        self.invalidate();
        info!(
            revision = settings.revision,
            providers = settings.providers.len(),
            "Runtime settings updated"
        );
        self.snapshot().await
    }

    fn held(&self) -> Option<(Arc<RuntimeSettings>, Duration)> {
        let cached = self.cached.read().ok()?;
        cached
            .as_ref()
            .map(|s| (Arc::clone(&s.settings), s.fetched_at.elapsed()))
    }

    async fn refresh(&self) -> Result<Arc<RuntimeSettings>, SystemError> {
        let loaded = self.source.load().await?;
        loaded.validate()?;
        let settings = Arc::new(loaded);
        if let Ok(mut cached) = self.cached.write() {
            *cached = Some(Snapshot {
                settings: Arc::clone(&settings),
                fetched_at: Instant::now(),
            });
        }
        debug!(revision = settings.revision, "Settings snapshot refreshed");
        Ok(settings)
    }
}
