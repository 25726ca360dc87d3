//! # presence-verify-core
//!
//! Presence verification for attendance claims: is this person physically at
//! the site, on the site network, on their enrolled device, and live?
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    AttendanceEngine                          │
//! │                                                              │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐      │
//! │  │  Geofence    │─▶│   Network    │─▶│ DeviceBinding│      │
//! │  │ (haversine)  │  │ (oracle/SSID)│  │ (const-time) │      │
//! │  └──────────────┘  └──────────────┘  └──────────────┘      │
//! │                           │                                  │
//! │                           ▼                                  │
//! │  ┌──────────────────────────────────────────────────┐      │
//! │  │        ChallengeResponseAuthenticator             │      │
//! │  │   (single-use challenges, monotonic counters)    │      │
//! │  └──────────────────────────────────────────────────┘      │
//! │                           │                                  │
//! │                           ▼                                  │
//! │  ┌──────────────────────────────────────────────────┐      │
//! │  │         AntiSpoofingOrchestrator                  │      │
//! │  │  (provider chain, deterministic last resort)     │      │
//! │  └──────────────────────────────────────────────────┘      │
//! │                           │                                  │
//! │                           ▼                                  │
//! │  ┌──────────────────────────────────────────────────┐      │
//! │  │   AttendanceStore: NoRecord → CheckedIn → Out     │      │
//! │  └──────────────────────────────────────────────────┘      │
//! │                                                              │
//! │  every step ──▶ ActivityAuditLog (hash-chained)              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Properties
//!
//! - **Fail-fast**: cheap deterministic checks run before any provider call
//! - **Fail-closed**: a non-increasing signature counter rejects the attempt
//! - **Idempotent**: at most one record per (user, day), closed at most once
//! - **Audited**: every rejection carries the metadata of the failing step

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::pedantic)] // Too strict for production code
#![allow(clippy::missing_errors_doc)] // Error documentation not required
#![allow(clippy::module_name_repetitions)] // Allow Type in module::Type
#![allow(clippy::must_use_candidate)] // Not all functions need must_use

pub mod antispoof;
pub mod attendance;
pub mod audit;
pub mod challenge;
pub mod config;
pub mod engine;
pub mod enrollment;
pub mod error;
pub mod geofence;
#[cfg(feature = "server")]
pub mod http;
pub mod network;
pub mod policy;
pub mod settings;
pub mod types;
pub mod webauthn;

pub use antispoof::{
    AntiSpoofingOrchestrator, BasicValidationProvider, HttpVisionProvider, Recommendation,
    SpoofScores, VisionProvider,
};
pub use attendance::{AttendanceRecord, AttendanceStatus, AttendanceStore, DayState, Transition};
pub use audit::{
    verify_audit_jsonl, ActivityAuditLog, AuditEvent, AuditMetadata, AuditVerificationResult,
    AuditVerifier, JsonlAuditSink, MemoryAuditSink, RequestContext,
};
pub use config::{Clock, SystemClock, VerifyConfig};
pub use engine::{AttendanceEngine, DayStatus, EngineBuilder};
pub use enrollment::{EnrolledBiometric, EnrollmentStore};
pub use error::{Rejection, VerifyError};
pub use geofence::{haversine_distance_m, GeofenceValidator};
pub use network::{HttpPresenceOracle, NetworkPresenceValidator, PresenceOracle};
pub use policy::{InMemoryPolicyStore, LocationPolicy, PolicyStore};
pub use settings::{JsonFileSettingsSource, RuntimeSettings, SettingsService};
pub use types::{EnrollmentRequest, GeoPoint, Photo, VerificationOutcome, VerificationRequest};
pub use webauthn::ChallengeResponseAuthenticator;
