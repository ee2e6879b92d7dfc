use crate::db::models::{Poll, PollId, PollOption};
use crate::error::LedgerError;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

/// Poll and option metadata, used to validate votes before they reach the engine.
#[async_trait]
pub trait PollCatalog: Send + Sync {
    async fn create_poll(&self, title: &str, options: &[String]) -> Result<Poll, LedgerError>;

    async fn get_poll(&self, poll_id: PollId) -> Result<Option<Poll>, LedgerError>;
}

#[derive(Default)]
pub struct MemoryCatalog {
    polls: RwLock<HashMap<PollId, Poll>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PollCatalog for MemoryCatalog {
    async fn create_poll(&self, title: &str, options: &[String]) -> Result<Poll, LedgerError> {
        let poll_id = Uuid::new_v4();
        let poll = Poll {
            id: poll_id,
            title: title.to_string(),
            created_at: Utc::now(),
            options: options
                .iter()
                .map(|text| PollOption {
                    id: Uuid::new_v4(),
                    poll_id,
                    title: text.clone(),
                })
                .collect(),
        };

        self.polls
            .write()
            .map_err(|_| LedgerError::Unavailable("catalog lock poisoned".to_string()))?
            .insert(poll_id, poll.clone());
        Ok(poll)
    }

    async fn get_poll(&self, poll_id: PollId) -> Result<Option<Poll>, LedgerError> {
        let polls = self
            .polls
            .read()
            .map_err(|_| LedgerError::Unavailable("catalog lock poisoned".to_string()))?;
        Ok(polls.get(&poll_id).cloned())
    }
}
