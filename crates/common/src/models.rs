//! Records read from the external roster, session and attempt stores.
//!
//! The monitor never owns these records. They are fetched, merged and
//! discarded each reconciliation cycle.

use crate::types::{AttemptId, CohortId, ParticipantId, SessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A member of a cohort roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub participant_id: ParticipantId,
    pub display_name: String,
    pub cohort_id: CohortId,
}

/// Status stored on the session record.
///
/// This is an override, not the effective status: an `Active` session may
/// still be scheduled or expired depending on the wall clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoredSessionStatus {
    Active,
    Ended,
    Cancelled,
}

/// A timed exam session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    pub cohort_id: CohortId,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub status: StoredSessionStatus,
}

/// Progress state of one participant's attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    NotStarted,
    InProgress,
    Completed,
    Submitted,
}

impl AttemptStatus {
    /// Whether the attempt has been finished (completed or submitted).
    #[must_use]
    pub const fn is_finished(self) -> bool {
        matches!(self, AttemptStatus::Completed | AttemptStatus::Submitted)
    }

    /// Returns the status as a string for labels and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            AttemptStatus::NotStarted => "not_started",
            AttemptStatus::InProgress => "in_progress",
            AttemptStatus::Completed => "completed",
            AttemptStatus::Submitted => "submitted",
        }
    }
}

/// Per (participant, session) attempt record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attempt {
    pub attempt_id: AttemptId,
    pub participant_id: ParticipantId,
    pub session_id: SessionId,
    pub status: AttemptStatus,
    pub current_step: u32,
    pub total_steps: u32,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub warning_count: u32,
    pub is_flagged: bool,
    pub camera_enabled: bool,
}

impl Attempt {
    /// Progress through the session as a whole percentage (0-100).
    ///
    /// A session with no steps reports 0 unless the attempt is finished.
    #[must_use]
    pub fn progress_percent(&self) -> u8 {
        if self.status.is_finished() {
            return 100;
        }
        if self.total_steps == 0 {
            return 0;
        }
        let step = u64::from(self.current_step.min(self.total_steps));
        let percent = step * 100 / u64::from(self.total_steps);
        u8::try_from(percent).unwrap_or(100)
    }
}

/// A participant that joined the session, with or without an attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinedRecord {
    pub participant_id: ParticipantId,
    pub joined_at: Option<DateTime<Utc>>,
}
