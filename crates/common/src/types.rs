//! Identifier newtypes for the proctoring monitor.
//!
//! Every identifier wraps a UUID so that a participant ID can never be passed
//! where a session ID is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new random identifier
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a timed exam session
    SessionId
);

uuid_id!(
    /// Unique identifier for a monitored participant (student)
    ParticipantId
);

uuid_id!(
    /// Unique identifier for an observer (the supervising party)
    ObserverId
);

uuid_id!(
    /// Unique identifier for a cohort (class or group)
    CohortId
);

uuid_id!(
    /// Unique identifier for a participant's attempt at a session
    AttemptId
);

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(ParticipantId::new(), ParticipantId::new());
        assert_ne!(SessionId::default(), SessionId::default());
    }

    #[test]
    fn test_display_matches_uuid() {
        let raw = Uuid::new_v4();
        let id = ParticipantId::from(raw);
        assert_eq!(id.to_string(), raw.to_string());
    }

    #[test]
    fn test_serializes_as_plain_uuid() {
        let raw = Uuid::new_v4();
        let json = serde_json::to_string(&SessionId(raw)).unwrap();
        assert_eq!(json, format!("\"{raw}\""));
    }
}
