use crate::db::models::{PollId, PollOptionId, SessionId, Vote};
use crate::error::LedgerError;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

/// Durable record of which session voted for which option of a poll.
///
/// Implementations must refuse a second live vote for the same
/// `(session_id, poll_id)` pair with `LedgerError::Conflict`.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn find_vote(
        &self,
        session_id: &SessionId,
        poll_id: PollId,
    ) -> Result<Option<Vote>, LedgerError>;

    async fn create_vote(
        &self,
        session_id: &SessionId,
        poll_id: PollId,
        poll_option_id: PollOptionId,
    ) -> Result<Vote, LedgerError>;

    async fn delete_vote(&self, vote_id: Uuid) -> Result<(), LedgerError>;

    /// Live vote count per option, the ground truth used for reconciliation.
    async fn count_votes(&self, poll_id: PollId)
    -> Result<HashMap<PollOptionId, i64>, LedgerError>;
}

#[derive(Default)]
pub struct MemoryLedger {
    votes: Mutex<HashMap<(SessionId, PollId), Vote>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<(SessionId, PollId), Vote>>, LedgerError> {
        self.votes
            .lock()
            .map_err(|_| LedgerError::Unavailable("ledger lock poisoned".to_string()))
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn find_vote(
        &self,
        session_id: &SessionId,
        poll_id: PollId,
    ) -> Result<Option<Vote>, LedgerError> {
        let votes = self.lock()?;
        Ok(votes.get(&(session_id.clone(), poll_id)).cloned())
    }

    async fn create_vote(
        &self,
        session_id: &SessionId,
        poll_id: PollId,
        poll_option_id: PollOptionId,
    ) -> Result<Vote, LedgerError> {
        let mut votes = self.lock()?;
        let key = (session_id.clone(), poll_id);
        if votes.contains_key(&key) {
            return Err(LedgerError::Conflict);
        }

        let vote = Vote {
            id: Uuid::new_v4(),
            session_id: session_id.clone(),
            poll_id,
            poll_option_id,
            created_at: Utc::now(),
        };
        votes.insert(key, vote.clone());
        Ok(vote)
    }

    async fn delete_vote(&self, vote_id: Uuid) -> Result<(), LedgerError> {
        let mut votes = self.lock()?;
        votes.retain(|_, vote| vote.id != vote_id);
        Ok(())
    }

    async fn count_votes(
        &self,
        poll_id: PollId,
    ) -> Result<HashMap<PollOptionId, i64>, LedgerError> {
        let votes = self.lock()?;
        let mut counts = HashMap::new();
        for vote in votes.values().filter(|v| v.poll_id == poll_id) {
            *counts.entry(vote.poll_option_id).or_insert(0) += 1;
        }
        Ok(counts)
    }
}
