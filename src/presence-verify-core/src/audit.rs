//! Activity and security audit log.
//!
//! Every verification attempt, ceremony and anti-spoofing invocation is
//! appended to the log with enough structured metadata to reconstruct the
//! decision later. Entries are hash-chained: each carries the SHA-256 of its
//! canonical JSON form and the hash of the entry before it (`"genesis"` for
//! the first), so [`AuditVerifier`] can tell whether the log was edited.
//!
//! Writing never overturns a decision and is bounded in time. A sink failure,
//! a stalled sink or an unhashable entry is reported through `tracing` and
//! counted, and the caller carries on.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};

use crate::antispoof::{AntiSpoofDecision, ProviderAttempt, SpoofScores, VisionPurpose};
use crate::attendance::{AttendanceStatus, Transition};
use crate::challenge::CeremonyPurpose;
use crate::error::{SystemError, VerifyError};
use crate::network::NetworkEvidence;

/// Previous-hash value of the first entry.
pub const GENESIS: &str = "genesis";

/// Time budget for one sink append.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// How an attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    /// Accepted.
    Success,
    /// Rejected for an ordinary reason.
    Failure,
    /// Rejected for a reason that suggests credential misuse.
    SecurityAlert,
}

/// Caller context captured at the edge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    /// Client IP address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    /// User agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Client-reported device description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_info: Option<String>,
}

/// Geofence check payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeofenceAudit {
    /// Claimed latitude.
    pub latitude: f64,
    /// Claimed longitude.
    pub longitude: f64,
    /// Reported accuracy, meters.
    pub accuracy_m: f64,
    /// Required accuracy, meters.
    pub required_accuracy_m: f64,
    /// Nearest anchor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor: Option<String>,
    /// Distance to it, meters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_m: Option<f64>,
    /// Its radius, meters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius_m: Option<f64>,
}

/// Device binding payload. Only hash prefixes are kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceBindingAudit {
    /// Prefix of the supplied fingerprint hash.
    pub supplied_prefix: String,
    /// Prefix of the enrolled fingerprint hash.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrolled_prefix: Option<String>,
}

/// Challenge-response ceremony payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CeremonyAudit {
    /// Registration or authentication.
    pub purpose: CeremonyPurpose,
    /// `begin` or `verify`.
    pub stage: String,
    /// Credential involved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_id: Option<String>,
    /// Counter on record before the attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stored_counter: Option<u32>,
    /// Counter in the assertion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_counter: Option<u32>,
}

/// Anti-spoofing invocation payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AntiSpoofAudit {
    /// Enrollment or attendance.
    pub purpose: VisionPurpose,
    /// Provider whose result was used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Every attempt, in order.
    pub attempts: Vec<ProviderAttempt>,
    /// Total time spent, milliseconds.
    pub duration_ms: u64,
    /// Score breakdown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scores: Option<SpoofScores>,
    /// Policy decision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<AntiSpoofDecision>,
    /// Face-match minimum applied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face_match_min: Option<f64>,
}

/// Committed attendance transition payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceAudit {
    /// Check-in or check-out.
    pub transition: Transition,
    /// Local calendar date.
    pub date: NaiveDate,
    /// Recorded status.
    pub status: AttendanceStatus,
    /// Anchor matched.
    pub anchor: String,
    /// Distance to it, meters.
    pub distance_m: f64,
    /// Network decision method.
    pub network_method: String,
    /// Whether the anti-spoofing result needs human review.
    pub manual_review: bool,
}

/// Enrollment payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentAudit {
    /// Whether this replaced a previous enrollment.
    pub re_enrollment: bool,
    /// Prefix of the bound fingerprint hash.
    pub fingerprint_prefix: String,
}

/// Structured metadata, one schema per event type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AuditMetadata {
    /// Geofence check.
    Geofence(GeofenceAudit),
    /// Network presence check.
    Network(NetworkEvidence),
    /// Device fingerprint check.
    DeviceBinding(DeviceBindingAudit),
    /// Challenge-response ceremony.
    Ceremony(CeremonyAudit),
    /// Anti-spoofing invocation.
    AntiSpoofing(AntiSpoofAudit),
    /// Committed attendance transition, or a state conflict.
    Attendance(AttendanceAudit),
    /// Enrollment or re-enrollment.
    Enrollment(EnrollmentAudit),
    /// Environment failure.
    System {
        /// Component that failed.
        component: String,
    },
}

impl AuditMetadata {
    /// Event type name.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Geofence(_) => "geofence",
            Self::Network(_) => "network",
            Self::DeviceBinding(_) => "device_binding",
            Self::Ceremony(_) => "ceremony",
            Self::AntiSpoofing(_) => "anti_spoofing",
            Self::Attendance(_) => "attendance",
            Self::Enrollment(_) => "enrollment",
            Self::System { .. } => "system",
        }
    }
}

/// What a caller asks to be recorded.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    /// Subject user.
    pub user_id: String,
    /// Outcome.
    pub outcome: AuditOutcome,
    /// Reason code, on failure.
    pub reason_code: Option<String>,
    /// Human-readable detail.
    pub message: Option<String>,
    /// Caller context.
    pub context: RequestContext,
    /// Structured metadata.
    pub metadata: AuditMetadata,
}

impl AuditRecord {
    /// An accepted attempt.
    #[must_use]
    pub fn success(user_id: &str, context: &RequestContext, metadata: AuditMetadata) -> Self {
        Self {
            user_id: user_id.to_string(),
            outcome: AuditOutcome::Success,
            reason_code: None,
            message: None,
            context: context.clone(),
            metadata,
        }
    }

    /// A rejected attempt. Security events are recorded as alerts.
    #[must_use]
    pub fn failure(
        user_id: &str,
        context: &RequestContext,
        error: &VerifyError,
        metadata: AuditMetadata,
    ) -> Self {
        Self {
            user_id: user_id.to_string(),
            outcome: if error.is_security_event() {
                AuditOutcome::SecurityAlert
            } else {
                AuditOutcome::Failure
            },
            reason_code: Some(error.reason_code().to_string()),
            message: Some(error.to_string()),
            context: context.clone(),
            metadata,
        }
    }
}

/// A written audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Position in the chain, starting at 1.
    pub sequence: u64,
    /// Random event id.
    pub event_id: String,
    /// Write time.
    pub timestamp: DateTime<Utc>,
    /// Subject user.
    pub user_id: String,
    /// Outcome.
    pub outcome: AuditOutcome,
    /// Reason code, on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<String>,
    /// Human-readable detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Caller context.
    #[serde(default)]
    pub context: RequestContext,
    /// Structured metadata.
    pub metadata: AuditMetadata,
    /// Hash of the previous entry, or [`GENESIS`].
    pub previous_hash: String,
    /// Hash of this entry.
    pub entry_hash: String,
}

impl AuditEvent {
    /// Event type name.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        self.metadata.event_type()
    }

    /// Compute the expected hash for this entry.
    ///
    /// SHA-256 over the canonical JSON of every field except `entry_hash`
    /// (object keys sorted).
    pub fn compute_hash(&self) -> Result<String, SystemError> {
        let mut value = serde_json::to_value(self)
            .map_err(|e| SystemError::storage(format!("audit entry not serializable: {e}")))?;
        if let Some(map) = value.as_object_mut() {
            map.remove("entry_hash");
        }
        let canonical = serde_json::to_string(&value)
            .map_err(|e| SystemError::storage(format!("audit entry not serializable: {e}")))?;
        Ok(hex::encode(Sha256::digest(canonical.as_bytes())))
    }

    /// Verify this entry's hash is correct. An entry that cannot be hashed
    /// does not verify.
    #[must_use]
    pub fn verify_hash(&self) -> bool {
        matches!(self.compute_hash(), Ok(hash) if hash == self.entry_hash)
    }
}

/// Where audit entries are persisted. Append-only.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Append one entry.
    async fn append(&self, event: &AuditEvent) -> Result<(), SystemError>;

    /// All entries, in order.
    async fn load_all(&self) -> Result<Vec<AuditEvent>, SystemError>;

    /// The last entry, used to resume the chain.
    async fn last(&self) -> Result<Option<AuditEvent>, SystemError> {
        Ok(self.load_all().await?.pop())
    }
}

/// Entries held in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: std::sync::Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the entries.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn append(&self, event: &AuditEvent) -> Result<(), SystemError> {
        self.events
            .lock()
            .map_err(|_| SystemError::storage("audit lock poisoned"))?
            .push(event.clone());
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<AuditEvent>, SystemError> {
        Ok(self.events())
    }
}

/// Entries appended to a JSON-lines file.
#[derive(Debug, Clone)]
pub struct JsonlAuditSink {
    path: PathBuf,
}

impl JsonlAuditSink {
    /// Create a sink writing to `path`. The file is created on first write.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AuditSink for JsonlAuditSink {
    async fn append(&self, event: &AuditEvent) -> Result<(), SystemError> {
        let mut line = serde_json::to_vec(event)
            .map_err(|e| SystemError::storage(format!("serialize audit event: {e}")))?;
        line.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| SystemError::storage(format!("open {}: {}", self.path.display(), e)))?;
        file.write_all(&line)
            .await
            .map_err(|e| SystemError::storage(format!("write {}: {}", self.path.display(), e)))?;
        file.flush()
            .await
            .map_err(|e| SystemError::storage(format!("flush {}: {}", self.path.display(), e)))
    }

    async fn load_all(&self) -> Result<Vec<AuditEvent>, SystemError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => parse_jsonl(&data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(SystemError::storage(format!(
                "read {}: {}",
                self.path.display(),
                e
            ))),
        }
    }
}

fn parse_jsonl(data: &str) -> Result<Vec<AuditEvent>, SystemError> {
    data.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line)
                .map_err(|e| SystemError::storage(format!("audit line {}: {}", i + 1, e)))
        })
        .collect()
}

#[derive(Debug)]
struct ChainHead {
    next_sequence: u64,
    last_hash: String,
}

/// The activity audit log.
pub struct ActivityAuditLog {
    sink: Arc<dyn AuditSink>,
    head: Mutex<ChainHead>,
    write_failures: AtomicU64,
    write_timeout: Duration,
}

impl ActivityAuditLog {
    /// Start a fresh chain on `sink`.
    #[must_use]
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self {
            sink,
            head: Mutex::new(ChainHead {
                next_sequence: 1,
                last_hash: GENESIS.to_string(),
            }),
            write_failures: AtomicU64::new(0),
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }

    /// Bound each sink append by `timeout` instead of [`DEFAULT_WRITE_TIMEOUT`].
    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Continue the chain already present in `sink`.
    pub async fn resume(sink: Arc<dyn AuditSink>) -> Result<Self, SystemError> {
        let log = Self::new(Arc::clone(&sink));
        if let Some(last) = sink.last().await? {
            let mut head = log.head.lock().await;
            head.next_sequence = last.sequence + 1;
            head.last_hash = last.entry_hash;
            info!(sequence = last.sequence, "Resuming audit chain");
        }
        Ok(log)
    }

    /// Append an entry. Never fails: a sink error or timeout is logged and
    /// counted, `None` is returned and the chain head does not move.
    pub async fn record(&self, record: AuditRecord) -> Option<AuditEvent> {
        let mut head = self.head.lock().await;

        let mut id = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut id);

        let mut event = AuditEvent {
            sequence: head.next_sequence,
            event_id: hex::encode(id),
            timestamp: Utc::now(),
            user_id: record.user_id,
            outcome: record.outcome,
            reason_code: record.reason_code,
            message: record.message,
            context: record.context,
            metadata: record.metadata,
            previous_hash: head.last_hash.clone(),
            entry_hash: String::new(),
        };
        let written = match event.compute_hash() {
            Ok(hash) => {
                event.entry_hash = hash;
                match tokio::time::timeout(self.write_timeout, self.sink.append(&event)).await {
                    Ok(result) => result,
                    Err(_) => Err(SystemError::storage(format!(
                        "audit write timed out after {}ms",
                        self.write_timeout.as_millis()
                    ))),
                }
            },
            Err(e) => Err(e),
        };

        match written {
            Ok(()) => {
                head.next_sequence += 1;
                head.last_hash = event.entry_hash.clone();
                Some(event)
            },
            Err(e) => {
                let failures = self.write_failures.fetch_add(1, Ordering::Relaxed) + 1;
                error!(
                    error = %e,
                    event_type = event.event_type(),
                    user_id = %event.user_id,
                    outcome = ?event.outcome,
                    reason_code = event.reason_code.as_deref().unwrap_or(""),
                    write_failures = failures,
                    "Audit write failed"
                );
                None
            },
        }
    }

    /// Number of entries that could not be written.
    #[must_use]
    pub fn write_failures(&self) -> u64 {
        self.write_failures.load(Ordering::Relaxed)
    }

    /// All entries from the sink.
    pub async fn entries(&self) -> Result<Vec<AuditEvent>, SystemError> {
        self.sink.load_all().await
    }

    /// Verify the whole chain in the sink.
    pub async fn verify_chain(&self) -> Result<AuditVerificationResult, SystemError> {
        let entries = self.sink.load_all().await?;
        Ok(AuditVerifier::new().verify_entries(&entries))
    }
}

/// Result of audit chain verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditVerificationResult {
    /// Whether the chain is intact.
    pub valid: bool,
    /// Entries checked.
    pub total_entries: u64,
    /// Whether every link and hash matched.
    pub hash_chain_valid: bool,
    /// Whether the first entry links to genesis.
    pub genesis_valid: bool,
    /// First sequence number found tampered.
    pub first_tampered_sequence: Option<u64>,
    /// Problems found.
    pub errors: Vec<String>,
    /// Verification time in milliseconds.
    pub verification_time_ms: u64,
    /// Chain summary.
    pub chain_summary: Option<ChainSummary>,
}

/// Summary of the audit chain state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainSummary {
    /// Sequence range [min, max].
    pub sequence_range: (u64, u64),
    /// Current hash value.
    pub current_hash: String,
    /// Timestamp of oldest entry.
    pub oldest_entry: Option<DateTime<Utc>>,
    /// Timestamp of newest entry.
    pub newest_entry: Option<DateTime<Utc>>,
    /// Security alerts in the range.
    pub security_alerts: u64,
}

/// Audit chain verifier.
///
/// Checks, in sequence order:
/// 1. Genesis (the first entry links to `"genesis"`)
/// 2. Sequence continuity
/// 3. Hash links (each entry points at the previous entry's hash)
/// 4. Hash validity (each stored hash matches its content)
#[derive(Debug, Default)]
pub struct AuditVerifier;

impl AuditVerifier {
    /// Create a verifier.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Verify a list of entries.
    #[instrument(skip(self, entries), fields(entry_count = entries.len()))]
    pub fn verify_entries(&self, entries: &[AuditEvent]) -> AuditVerificationResult {
        let start = std::time::Instant::now();
        let mut errors = Vec::new();
        let mut first_tampered: Option<u64> = None;
        let mark = |seq: u64, first: &mut Option<u64>| {
            if first.is_none() {
                *first = Some(seq);
            }
        };

        let Some(first) = entries.first() else {
            return AuditVerificationResult {
                valid: true,
                total_entries: 0,
                hash_chain_valid: true,
                genesis_valid: true,
                first_tampered_sequence: None,
                errors,
                verification_time_ms: start.elapsed().as_millis() as u64,
                chain_summary: None,
            };
        };

        let genesis_valid = first.previous_hash == GENESIS && first.sequence == 1;
        if !genesis_valid {
            errors.push(format!(
                "Invalid genesis: first entry is sequence {} with previous_hash='{}'",
                first.sequence, first.previous_hash
            ));
            mark(first.sequence, &mut first_tampered);
        }

        let mut hash_chain_valid = true;
        let mut previous: Option<&AuditEvent> = None;

        for entry in entries {
            if let Some(prev) = previous {
                if entry.sequence != prev.sequence + 1 {
                    errors.push(format!(
                        "Sequence gap: expected {}, got {}",
                        prev.sequence + 1,
                        entry.sequence
                    ));
                    mark(entry.sequence, &mut first_tampered);
                }
                if entry.previous_hash != prev.entry_hash {
                    errors.push(format!(
                        "Hash chain break at sequence {}: expected previous_hash='{}', got '{}'",
                        entry.sequence, prev.entry_hash, entry.previous_hash
                    ));
                    hash_chain_valid = false;
                    mark(entry.sequence, &mut first_tampered);
                }
            }

            if !entry.verify_hash() {
                let computed = entry
                    .compute_hash()
                    .unwrap_or_else(|e| format!("<{e}>"));
                errors.push(format!(
                    "Hash mismatch at sequence {}: computed='{}', stored='{}'",
                    entry.sequence, computed, entry.entry_hash
                ));
                hash_chain_valid = false;
                mark(entry.sequence, &mut first_tampered);
            }

            previous = Some(entry);
        }

        let last = entries.last().unwrap_or(first);
        let chain_summary = Some(ChainSummary {
            sequence_range: (first.sequence, last.sequence),
            current_hash: last.entry_hash.clone(),
            oldest_entry: Some(first.timestamp),
            newest_entry: Some(last.timestamp),
            security_alerts: entries
                .iter()
                .filter(|e| e.outcome == AuditOutcome::SecurityAlert)
                .count() as u64,
        });

        let total_entries = entries.len() as u64;
        let valid = hash_chain_valid && genesis_valid && errors.is_empty();
        if valid {
            info!(entries = total_entries, "Audit chain verification passed");
        } else {
            warn!(
                entries = total_entries,
                errors = errors.len(),
                "Audit chain verification FAILED"
            );
        }

        AuditVerificationResult {
            valid,
            total_entries,
            hash_chain_valid,
            genesis_valid,
            first_tampered_sequence: first_tampered,
            errors,
            verification_time_ms: start.elapsed().as_millis() as u64,
            chain_summary,
        }
    }
}

/// Read and verify a JSON-lines audit file.
pub fn verify_audit_jsonl(path: &Path) -> Result<AuditVerificationResult, SystemError> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| SystemError::storage(format!("read {}: {}", path.display(), e)))?;
    let entries = parse_jsonl(&data)?;
    Ok(AuditVerifier::new().verify_entries(&entries))
}
