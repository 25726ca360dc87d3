//! Attendance records and the per-(user, day) state.
//!
//! `NoRecord -> CheckedIn -> CheckedOut`, with `CheckedOut` terminal for the
//! day. The store enforces at most one record per (user, date) and closes a
//! record only if it is still open, so racing requests cannot create two
//! records or close one twice.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SystemError;
use crate::types::GeoPoint;

/// Recorded attendance status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    /// On time.
    Present,
    /// Checked in after the policy's late cutoff.
    Late,
}

/// A committed transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    /// `NoRecord -> CheckedIn`.
    CheckIn,
    /// `CheckedIn -> CheckedOut`.
    CheckOut,
}

/// State of one (user, day).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DayState {
    /// No record yet.
    NoRecord,
    /// Open record.
    CheckedIn,
    /// Closed record. Terminal.
    CheckedOut,
}

/// Evidence stored with a transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationSummary {
    /// Anchor matched.
    pub anchor: String,
    /// Distance to it, meters.
    pub distance_m: f64,
    /// Network decision method.
    pub network_method: String,
    /// Whether a signed assertion was verified.
    pub assertion_verified: bool,
    /// Anti-spoofing provider used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spoof_provider: Option<String>,
    /// Anti-spoofing overall score.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_score: Option<f64>,
    /// Layers passed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passed_layers: Option<u8>,
    /// Needs human review.
    #[serde(default)]
    pub manual_review: bool,
}

/// One (user, day) attendance record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    /// User id.
    pub user_id: String,
    /// Local calendar date.
    pub date: NaiveDate,
    /// Check-in time.
    pub check_in: DateTime<Utc>,
    /// Check-out time, once closed.
    #[serde(default)]
    pub check_out: Option<DateTime<Utc>>,
    /// Check-in position.
    pub location: GeoPoint,
    /// Check-in accuracy, meters.
    pub accuracy_m: f64,
    /// Check-in network.
    pub network_id: String,
    /// Check-in evidence.
    pub verification: VerificationSummary,
    /// Check-out evidence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_out_verification: Option<VerificationSummary>,
    /// Status.
    pub status: AttendanceStatus,
}

impl AttendanceRecord {
    /// State this record puts the day in.
    #[must_use]
    pub fn state(&self) -> DayState {
        if self.check_out.is_some() {
            DayState::CheckedOut
        } else {
            DayState::CheckedIn
        }
    }
}

/// Result of [`AttendanceStore::insert_check_in`].
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    /// Stored.
    Inserted,
    /// A record for (user, date) already exists.
    Conflict(AttendanceRecord),
}

/// Result of [`AttendanceStore::close_check_out`].
#[derive(Debug, Clone, PartialEq)]
pub enum CloseOutcome {
    /// Closed; the updated record.
    Closed(AttendanceRecord),
    /// No open record for (user, date).
    NotOpen,
}

/// Attendance persistence.
#[async_trait]
pub trait AttendanceStore: Send + Sync {
    /// Record for (user, date).
    async fn find(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> Result<Option<AttendanceRecord>, SystemError>;

    /// Insert a check-in, unique on (user, date).
    async fn insert_check_in(&self, record: AttendanceRecord) -> Result<InsertOutcome, SystemError>;

    /// Close the open record for (user, date).
    async fn close_check_out(
        &self,
        user_id: &str,
        date: NaiveDate,
        at: DateTime<Utc>,
        verification: VerificationSummary,
    ) -> Result<CloseOutcome, SystemError>;
}

/// Records held in memory.
#[derive(Debug, Default)]
pub struct InMemoryAttendanceStore {
    records: Mutex<HashMap<(String, NaiveDate), AttendanceRecord>>,
}

impl InMemoryAttendanceStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<(String, NaiveDate), AttendanceRecord>>, SystemError>
    {
        self.records
            .lock()
            .map_err(|_| SystemError::storage("attendance lock poisoned"))
    }
}

#[async_trait]
impl AttendanceStore for InMemoryAttendanceStore {
    async fn find(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> Result<Option<AttendanceRecord>, SystemError> {
        Ok(self.lock()?.get(&(user_id.to_string(), date)).cloned())
    }

    async fn insert_check_in(&self, record: AttendanceRecord) -> Result<InsertOutcome, SystemError> {
        let mut records = self.lock()?;
        let key = (record.user_id.clone(), record.date);
        if let Some(existing) = records.get(&key) {
            return Ok(InsertOutcome::Conflict(existing.clone()));
        }
        records.insert(key, record);
        Ok(InsertOutcome::Inserted)
    }

    async fn close_check_out(
        &self,
        user_id: &str,
        date: NaiveDate,
        at: DateTime<Utc>,
        verification: VerificationSummary,
    ) -> Result<CloseOutcome, SystemError> {
        let mut records = self.lock()?;
        match records.get_mut(&(user_id.to_string(), date)) {
            Some(record) if record.check_out.is_none() => {
                record.check_out = Some(at);
                record.check_out_verification = Some(verification);
                Ok(CloseOutcome::Closed(record.clone()))
            },
            _ => Ok(CloseOutcome::NotOpen),
        }
    }
}
