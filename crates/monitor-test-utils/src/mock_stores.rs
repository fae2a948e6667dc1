//! In-memory roster, session and attempt stores.
//!
//! One `MockStores` implements all three store traits so a test can seed a
//! whole session in one builder chain, then mutate it while a view is open.
//! Individual sources can be switched to fail with `StoreError::Unavailable`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::error::{StoreError, StoreResult};
use common::models::{
    Attempt, AttemptStatus, JoinedRecord, Participant, Session, StoredSessionStatus,
};
use common::stores::{AttemptStore, RosterStore, SessionStore};
use common::types::{AttemptId, CohortId, ParticipantId, SessionId};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// A store read or write that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreSource {
    Roster,
    Sessions,
    Joined,
    Attempts,
    SetFlagged,
}

/// Mock stores for testing reconciliation.
#[derive(Debug, Clone, Default)]
pub struct MockStores {
    inner: Arc<Mutex<MockStoresInner>>,
}

#[derive(Debug, Default)]
struct MockStoresInner {
    sessions: HashMap<SessionId, Session>,
    participants: Vec<Participant>,
    attempts: Vec<Attempt>,
    joined: HashMap<SessionId, Vec<JoinedRecord>>,
    failing: HashSet<StoreSource>,
    /// Number of reads per source
    reads: HashMap<StoreSource, usize>,
}

impl MockStores {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_session(self, session: Session) -> Self {
        self.inner
            .lock()
            .unwrap()
            .sessions
            .insert(session.session_id, session);
        self
    }

    #[must_use]
    pub fn with_participant(self, participant: Participant) -> Self {
        self.inner.lock().unwrap().participants.push(participant);
        self
    }

    #[must_use]
    pub fn with_attempt(self, attempt: Attempt) -> Self {
        self.upsert_attempt(attempt);
        self
    }

    #[must_use]
    pub fn with_joined(
        self,
        session_id: SessionId,
        participant_id: ParticipantId,
        joined_at: Option<DateTime<Utc>>,
    ) -> Self {
        self.add_joined(session_id, participant_id, joined_at);
        self
    }

    /// Make a source fail (or recover).
    pub fn set_failing(&self, source: StoreSource, failing: bool) {
        let mut inner = self.inner.lock().unwrap();
        if failing {
            inner.failing.insert(source);
        } else {
            inner.failing.remove(&source);
        }
    }

    /// Insert an attempt or replace the one with the same id.
    pub fn upsert_attempt(&self, attempt: Attempt) {
        let mut inner = self.inner.lock().unwrap();
        match inner
            .attempts
            .iter_mut()
            .find(|a| a.attempt_id == attempt.attempt_id)
        {
            Some(existing) => *existing = attempt,
            None => inner.attempts.push(attempt),
        }
    }

    pub fn add_joined(
        &self,
        session_id: SessionId,
        participant_id: ParticipantId,
        joined_at: Option<DateTime<Utc>>,
    ) {
        self.inner
            .lock()
            .unwrap()
            .joined
            .entry(session_id)
            .or_default()
            .push(JoinedRecord {
                participant_id,
                joined_at,
            });
    }

    pub fn remove_participant(&self, participant_id: ParticipantId) {
        self.inner
            .lock()
            .unwrap()
            .participants
            .retain(|p| p.participant_id != participant_id);
    }

    pub fn set_session_status(&self, session_id: SessionId, status: StoredSessionStatus) {
        if let Some(session) = self.inner.lock().unwrap().sessions.get_mut(&session_id) {
            session.status = status;
        }
    }

    pub fn set_attempt_status(&self, attempt_id: AttemptId, status: AttemptStatus) {
        if let Some(attempt) = self
            .inner
            .lock()
            .unwrap()
            .attempts
            .iter_mut()
            .find(|a| a.attempt_id == attempt_id)
        {
            attempt.status = status;
        }
    }

    #[must_use]
    pub fn attempt(&self, attempt_id: AttemptId) -> Option<Attempt> {
        self.inner
            .lock()
            .unwrap()
            .attempts
            .iter()
            .find(|a| a.attempt_id == attempt_id)
            .cloned()
    }

    /// How many times a source has been read.
    #[must_use]
    pub fn read_count(&self, source: StoreSource) -> usize {
        self.inner
            .lock()
            .unwrap()
            .reads
            .get(&source)
            .copied()
            .unwrap_or(0)
    }

    fn begin(
        &self,
        source: StoreSource,
    ) -> StoreResult<std::sync::MutexGuard<'_, MockStoresInner>> {
        let mut inner = self.inner.lock().unwrap();
        *inner.reads.entry(source).or_default() += 1;
        if inner.failing.contains(&source) {
            return Err(StoreError::Unavailable(format!("{source:?}: injected")));
        }
        Ok(inner)
    }
}

#[async_trait]
impl RosterStore for MockStores {
    async fn list_expected_participants(
        &self,
        cohort_id: CohortId,
    ) -> StoreResult<Vec<Participant>> {
        let inner = self.begin(StoreSource::Roster)?;
        Ok(inner
            .participants
            .iter()
            .filter(|p| p.cohort_id == cohort_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SessionStore for MockStores {
    async fn get_session(&self, session_id: SessionId) -> StoreResult<Session> {
        let inner = self.begin(StoreSource::Sessions)?;
        inner
            .sessions
            .get(&session_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(session_id.to_string()))
    }
}

#[async_trait]
impl AttemptStore for MockStores {
    async fn list_attempts(&self, session_id: SessionId) -> StoreResult<Vec<Attempt>> {
        let inner = self.begin(StoreSource::Attempts)?;
        Ok(inner
            .attempts
            .iter()
            .filter(|a| a.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn list_joined_participants(
        &self,
        session_id: SessionId,
    ) -> StoreResult<Vec<JoinedRecord>> {
        let inner = self.begin(StoreSource::Joined)?;
        Ok(inner.joined.get(&session_id).cloned().unwrap_or_default())
    }

    async fn set_flagged(&self, attempt_id: AttemptId, flagged: bool) -> StoreResult<()> {
        let mut inner = self.begin(StoreSource::SetFlagged)?;
        let attempt = inner
            .attempts
            .iter_mut()
            .find(|a| a.attempt_id == attempt_id)
            .ok_or_else(|| StoreError::NotFound(attempt_id.to_string()))?;
        attempt.is_flagged = flagged;
        Ok(())
    }
}
