//! Session lifecycle clock.
//!
//! The effective status of a session is derived from the wall clock and the
//! stored override on every read. It is never cached or written back.

use chrono::{DateTime, Utc};
use common::models::{Session, StoredSessionStatus};
use serde::{Deserialize, Serialize};

/// Status of a session as the operator should see it right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectiveStatus {
    Scheduled,
    Active,
    Expired,
    Ended,
    Cancelled,
}

impl EffectiveStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            EffectiveStatus::Scheduled => "scheduled",
            EffectiveStatus::Active => "active",
            EffectiveStatus::Expired => "expired",
            EffectiveStatus::Ended => "ended",
            EffectiveStatus::Cancelled => "cancelled",
        }
    }
}

/// Compute the effective status of `session` at `now`.
///
/// A stored `ended` or `cancelled` always wins. Otherwise the window
/// `[starts_at, ends_at]` (inclusive at both ends) decides.
#[must_use]
pub fn effective_status(session: &Session, now: DateTime<Utc>) -> EffectiveStatus {
    match session.status {
        StoredSessionStatus::Ended => EffectiveStatus::Ended,
        StoredSessionStatus::Cancelled => EffectiveStatus::Cancelled,
        StoredSessionStatus::Active => {
            if now < session.starts_at {
                EffectiveStatus::Scheduled
            } else if now <= session.ends_at {
                EffectiveStatus::Active
            } else {
                EffectiveStatus::Expired
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use common::types::{CohortId, SessionId};

    fn session(
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
        status: StoredSessionStatus,
    ) -> Session {
        Session {
            session_id: SessionId::new(),
            cohort_id: CohortId::new(),
            starts_at,
            ends_at,
            status,
        }
    }

    #[test]
    fn test_scheduled_active_expired_window() {
        let t = Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).unwrap();
        let s = session(
            t + Duration::hours(1),
            t + Duration::hours(2),
            StoredSessionStatus::Active,
        );

        assert_eq!(effective_status(&s, t), EffectiveStatus::Scheduled);
        assert_eq!(
            effective_status(&s, t + Duration::minutes(90)),
            EffectiveStatus::Active
        );
        assert_eq!(
            effective_status(&s, t + Duration::hours(3)),
            EffectiveStatus::Expired
        );
    }

    #[test]
    fn test_window_bounds_are_inclusive() {
        let t = Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).unwrap();
        let s = session(t, t + Duration::hours(1), StoredSessionStatus::Active);

        assert_eq!(effective_status(&s, t), EffectiveStatus::Active);
        assert_eq!(
            effective_status(&s, t + Duration::hours(1)),
            EffectiveStatus::Active
        );
        assert_eq!(
            effective_status(&s, t + Duration::hours(1) + Duration::seconds(1)),
            EffectiveStatus::Expired
        );
    }

    #[test]
    fn test_stored_override_wins_at_any_time() {
        let t = Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).unwrap();
        let ended = session(
            t + Duration::hours(1),
            t + Duration::hours(2),
            StoredSessionStatus::Ended,
        );
        let cancelled = session(
            t - Duration::hours(2),
            t + Duration::hours(2),
            StoredSessionStatus::Cancelled,
        );

        for offset in [-48, 0, 1, 2, 3, 48] {
            let now = t + Duration::hours(offset);
            assert_eq!(effective_status(&ended, now), EffectiveStatus::Ended);
            assert_eq!(effective_status(&cancelled, now), EffectiveStatus::Cancelled);
        }
    }

    #[test]
    fn test_same_inputs_same_output() {
        let t = Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).unwrap();
        let s = session(t, t + Duration::hours(1), StoredSessionStatus::Active);
        let now = t + Duration::minutes(30);

        assert_eq!(effective_status(&s, now), effective_status(&s, now));
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(EffectiveStatus::Scheduled.as_str(), "scheduled");
        let json = serde_json::to_string(&EffectiveStatus::Expired).unwrap();
        assert_eq!(json, "\"expired\"");
    }
}
