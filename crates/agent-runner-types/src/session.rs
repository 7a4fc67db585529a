use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maps a work item to the opaque session token an engine returned, so a
/// later invocation can resume (spec.md §3 "Session Record").
///
/// Invariant I4: `updated_at` never decreases across updates to the same
/// item id; see [`crate::session::SessionRecord::with_update`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub item_id: String,
    pub session_token: String,
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    /// Build an updated copy of this record, refusing to move `updated_at`
    /// backwards. Returns `self` unchanged (cloned) if `at` is not newer.
    pub fn with_update(&self, session_token: String, at: DateTime<Utc>) -> SessionRecord {
        if at < self.updated_at {
            return self.clone();
        }
        SessionRecord {
            item_id: self.item_id.clone(),
            session_token,
            updated_at: at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn update_never_moves_updated_at_backwards() {
        let now = Utc::now();
        let record = SessionRecord {
            item_id: "i1".into(),
            session_token: "tok-1".into(),
            updated_at: now,
        };

        let earlier = now - Duration::seconds(10);
        let unchanged = record.with_update("tok-2".into(), earlier);
        assert_eq!(unchanged.updated_at, now);
        assert_eq!(unchanged.session_token, "tok-1");

        let later = now + Duration::seconds(10);
        let updated = record.with_update("tok-2".into(), later);
        assert_eq!(updated.updated_at, later);
        assert_eq!(updated.session_token, "tok-2");
    }
}
