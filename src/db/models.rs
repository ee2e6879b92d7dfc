use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use std::fmt;
use uuid::Uuid;

pub type PollId = Uuid;
pub type PollOptionId = Uuid;

/// Anonymous per-client token used only to deduplicate votes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(value: impl Into<String>) -> Self {
        SessionId(value.into())
    }

    pub fn generate() -> Self {
        SessionId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Poll {
    pub id: PollId,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub options: Vec<PollOption>,
}

impl Poll {
    pub fn has_option(&self, option_id: PollOptionId) -> bool {
        self.options.iter().any(|o| o.id == option_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollOption {
    pub id: PollOptionId,
    pub poll_id: PollId,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub id: Uuid,
    pub session_id: SessionId,
    pub poll_id: PollId,
    pub poll_option_id: PollOptionId,
    pub created_at: DateTime<Utc>,
}
