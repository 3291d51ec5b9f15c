use serde::{Deserialize, Serialize};

/// Server-side half of a session. The signed token only names it; deleting
/// this row is what revokes the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub user_id: String,
    pub created_ts: i64,
    pub expires_ts: i64,
}

impl SessionRecord {
    pub fn is_live(&self, now_ts: i64) -> bool {
        now_ts < self.expires_ts
    }
}
