//! Live roster merge.
//!
//! Three independently sourced views of the session are merged into one
//! entry per participant:
//!
//! 1. Seed from the expected cohort roster (`not_started`, not joined)
//! 2. Overlay session-joined records (`joined = true`)
//! 3. Overlay attempts (`joined = true`, status, progress, flags)
//!
//! Attempts always win, and the merge is a union: participants that appear
//! only in joined records or attempts are still included. Aggregates are
//! counted from the merged entries so totals never drift from the list.

use crate::lifecycle::EffectiveStatus;
use chrono::{DateTime, Utc};
use common::error::StoreError;
use common::models::{Attempt, AttemptStatus, JoinedRecord, Participant, Session};
use common::types::{AttemptId, ParticipantId, SessionId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Frame-relay presence of a participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    /// No frame received yet.
    Unknown,
    /// A frame arrived within the liveness window.
    Online,
    /// Last frame is older than the liveness window.
    Offline,
}

/// Merged status of one participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub participant_id: ParticipantId,
    /// Present only when the participant is on the expected roster.
    pub display_name: Option<String>,
    pub on_roster: bool,
    pub joined: bool,
    pub status: AttemptStatus,
    pub attempt_id: Option<AttemptId>,
    pub current_step: u32,
    pub total_steps: u32,
    pub progress_percent: u8,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub warning_count: u32,
    pub is_flagged: bool,
    pub camera_enabled: bool,
    pub presence: Presence,
}

impl RosterEntry {
    fn seed(participant_id: ParticipantId) -> Self {
        Self {
            participant_id,
            display_name: None,
            on_roster: false,
            joined: false,
            status: AttemptStatus::NotStarted,
            attempt_id: None,
            current_step: 0,
            total_steps: 0,
            progress_percent: 0,
            last_activity_at: None,
            warning_count: 0,
            is_flagged: false,
            camera_enabled: false,
            presence: Presence::Unknown,
        }
    }

    fn overlay_attempt(&mut self, attempt: &Attempt) {
        self.joined = true;
        self.status = attempt.status;
        self.attempt_id = Some(attempt.attempt_id);
        self.current_step = attempt.current_step;
        self.total_steps = attempt.total_steps;
        self.progress_percent = attempt.progress_percent();
        self.last_activity_at = attempt.last_activity_at;
        self.warning_count = attempt.warning_count;
        self.is_flagged = attempt.is_flagged;
        self.camera_enabled = attempt.camera_enabled;
    }
}

/// Aggregate counts derived from the merged entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterAggregates {
    pub total: usize,
    pub joined: usize,
    pub not_joined: usize,
    pub in_progress: usize,
    /// Completed or submitted.
    pub completed: usize,
    pub flagged: usize,
}

/// Which sources failed on the last read and are being served from cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStaleness {
    pub roster: bool,
    pub joined: bool,
    pub attempts: bool,
    pub session: bool,
}

impl SourceStaleness {
    #[must_use]
    pub const fn any(self) -> bool {
        self.roster || self.joined || self.attempts || self.session
    }
}

/// One reconciliation cycle's view of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterSnapshot {
    pub session_id: SessionId,
    /// Cycle number, starting at 1 for the first snapshot of a view.
    pub cycle: u64,
    pub generated_at: DateTime<Utc>,
    /// `None` until the session record has been read once.
    pub session_status: Option<EffectiveStatus>,
    pub entries: Vec<RosterEntry>,
    pub aggregates: RosterAggregates,
    pub stale: SourceStaleness,
    /// At least one source is stale.
    pub partial: bool,
}

impl RosterSnapshot {
    /// Look up one participant's entry.
    #[must_use]
    pub fn entry(&self, participant_id: ParticipantId) -> Option<&RosterEntry> {
        self.entries
            .iter()
            .find(|e| e.participant_id == participant_id)
    }
}

/// Last-known-good value of one source.
///
/// A failed read keeps the previous value and marks the source stale. A
/// successful read replaces the value, even when it is empty.
#[derive(Debug, Clone)]
pub struct SourceCache<T> {
    value: Option<T>,
    stale: bool,
}

impl<T> Default for SourceCache<T> {
    fn default() -> Self {
        Self {
            value: None,
            stale: true,
        }
    }
}

impl<T> SourceCache<T> {
    /// Record the outcome of a read. Returns the error, if any, for logging.
    pub fn update(&mut self, result: Result<T, StoreError>) -> Option<StoreError> {
        match result {
            Ok(value) => {
                self.value = Some(value);
                self.stale = false;
                None
            }
            Err(e) => {
                self.stale = true;
                Some(e)
            }
        }
    }

    /// Mark the source stale without a read (its input was unavailable).
    pub fn mark_stale(&mut self) {
        self.stale = true;
    }

    #[must_use]
    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    /// True after a failed read, and before the first successful one.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.stale
    }
}

/// Merge the three sources into entries sorted by display name, with
/// participants outside the roster last, then by id.
#[must_use]
pub fn merge_sources(
    expected: &[Participant],
    joined: &[JoinedRecord],
    attempts: &[Attempt],
) -> Vec<RosterEntry> {
    let mut merged: HashMap<ParticipantId, RosterEntry> = HashMap::new();

    for participant in expected {
        let entry = merged
            .entry(participant.participant_id)
            .or_insert_with(|| RosterEntry::seed(participant.participant_id));
        entry.display_name = Some(participant.display_name.clone());
        entry.on_roster = true;
    }

    for record in joined {
        merged
            .entry(record.participant_id)
            .or_insert_with(|| RosterEntry::seed(record.participant_id))
            .joined = true;
    }

    for attempt in latest_attempts(attempts).into_values() {
        merged
            .entry(attempt.participant_id)
            .or_insert_with(|| RosterEntry::seed(attempt.participant_id))
            .overlay_attempt(attempt);
    }

    let mut entries: Vec<RosterEntry> = merged.into_values().collect();
    entries.sort_by(|a, b| {
        (a.display_name.is_none(), &a.display_name, a.participant_id).cmp(&(
            b.display_name.is_none(),
            &b.display_name,
            b.participant_id,
        ))
    });
    entries
}

/// One attempt per participant: the most recently active one.
fn latest_attempts(attempts: &[Attempt]) -> HashMap<ParticipantId, &Attempt> {
    let mut latest: HashMap<ParticipantId, &Attempt> = HashMap::new();
    for attempt in attempts {
        match latest.get(&attempt.participant_id) {
            Some(current) if current.last_activity_at > attempt.last_activity_at => {}
            _ => {
                latest.insert(attempt.participant_id, attempt);
            }
        }
    }
    latest
}

/// Count aggregates over merged entries.
#[must_use]
pub fn aggregate(entries: &[RosterEntry]) -> RosterAggregates {
    let mut aggregates = RosterAggregates {
        total: entries.len(),
        ..RosterAggregates::default()
    };
    for entry in entries {
        if entry.joined {
            aggregates.joined += 1;
        } else {
            aggregates.not_joined += 1;
        }
        if entry.status == AttemptStatus::InProgress {
            aggregates.in_progress += 1;
        }
        if entry.status.is_finished() {
            aggregates.completed += 1;
        }
        if entry.is_flagged {
            aggregates.flagged += 1;
        }
    }
    aggregates
}

/// Set each entry's presence from the frame relay's view.
pub fn apply_presence(entries: &mut [RosterEntry], presence: &HashMap<ParticipantId, Presence>) {
    for entry in entries {
        entry.presence = presence
            .get(&entry.participant_id)
            .copied()
            .unwrap_or(Presence::Unknown);
    }
}

/// Cached state of all sources for one session.
#[derive(Debug, Default)]
pub struct RosterSources {
    pub roster: SourceCache<Vec<Participant>>,
    pub joined: SourceCache<Vec<JoinedRecord>>,
    pub attempts: SourceCache<Vec<Attempt>>,
    pub session: SourceCache<Session>,
}

impl RosterSources {
    /// Merge whatever each source last returned. Sources that never
    /// succeeded contribute nothing.
    #[must_use]
    pub fn merge(&self) -> Vec<RosterEntry> {
        merge_sources(
            self.roster.value().map(Vec::as_slice).unwrap_or_default(),
            self.joined.value().map(Vec::as_slice).unwrap_or_default(),
            self.attempts.value().map(Vec::as_slice).unwrap_or_default(),
        )
    }

    #[must_use]
    pub fn staleness(&self) -> SourceStaleness {
        SourceStaleness {
            roster: self.roster.is_stale(),
            joined: self.joined.is_stale(),
            attempts: self.attempts.is_stale(),
            session: self.session.is_stale(),
        }
    }
}
