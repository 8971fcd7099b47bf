// common/src/models/session.rs
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Persisted record of a signed-in session for this device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    /// Opaque identifier minted at sign-in
    pub session_id: String,
    /// Timestamp when the session was created
    pub created_at: DateTime<Utc>,
    /// Instant after which the session is no longer valid
    pub expires_at: DateTime<Utc>,
    /// Timestamp of last recorded activity
    pub last_activity: DateTime<Utc>,
    /// Identifier of the browser/device that owns the session
    pub device_id: String,
    /// Identity provider uid, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl SessionInfo {
    /// Create a session starting at `now` that lasts `duration`
    pub fn new(
        session_id: String,
        device_id: String,
        user_id: Option<String>,
        now: DateTime<Utc>,
        duration: Duration,
    ) -> Self {
        Self {
            session_id,
            created_at: now,
            expires_at: now + duration,
            last_activity: now,
            device_id,
            user_id,
        }
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        self.expires_at.signed_duration_since(now)
    }

    /// Bump the activity timestamp without moving the deadline
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity = now;
    }

    /// Restart the session clock: the deadline becomes `now + duration`
    pub fn extend(&mut self, now: DateTime<Utc>, duration: Duration) {
        self.last_activity = now;
        self.expires_at = now + duration;
    }
}
