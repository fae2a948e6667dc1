//! Contracts for the external stores the monitor reads from.
//!
//! The monitor only reads roster, session and attempt state. The single
//! write it triggers (flag/unflag) is delegated to the attempt store.

use crate::error::StoreResult;
use crate::models::{Attempt, JoinedRecord, Participant, Session};
use crate::types::{AttemptId, CohortId, SessionId};

/// Cohort roster store.
#[async_trait::async_trait]
pub trait RosterStore: Send + Sync {
    /// List the participants expected to take part, by cohort.
    async fn list_expected_participants(&self, cohort_id: CohortId)
        -> StoreResult<Vec<Participant>>;
}

/// Session scheduling store.
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    /// Fetch a session record.
    async fn get_session(&self, session_id: SessionId) -> StoreResult<Session>;
}

/// Attempt progress store.
#[async_trait::async_trait]
pub trait AttemptStore: Send + Sync {
    /// List every attempt recorded for the session.
    async fn list_attempts(&self, session_id: SessionId) -> StoreResult<Vec<Attempt>>;

    /// List the participants that joined the session.
    async fn list_joined_participants(&self, session_id: SessionId)
        -> StoreResult<Vec<JoinedRecord>>;

    /// Set or clear the operator flag on an attempt.
    async fn set_flagged(&self, attempt_id: AttemptId, flagged: bool) -> StoreResult<()>;
}
