use crate::db::connection::DbPool;
use crate::db::models::{PollId, PollOptionId, SessionId, Vote};
use crate::error::LedgerError;
use crate::store::Ledger;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Error, Row};
use std::collections::HashMap;
use uuid::Uuid;

pub async fn find_vote(
    pool: &DbPool,
    session_id: &str,
    poll_id: Uuid,
) -> Result<Option<Vote>, Error> {
    let row = sqlx::query(
        "SELECT id, session_id, poll_id, poll_option_id, created_at FROM votes WHERE session_id = $1 AND poll_id = $2",
    )
    .bind(session_id)
    .bind(poll_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| Vote {
        id: r.get("id"),
        session_id: SessionId::new(r.get::<String, _>("session_id")),
        poll_id: r.get("poll_id"),
        poll_option_id: r.get("poll_option_id"),
        created_at: r.get::<DateTime<Utc>, _>("created_at"),
    }))
}

pub async fn create_vote(
    pool: &DbPool,
    session_id: &str,
    poll_id: Uuid,
    poll_option_id: Uuid,
) -> Result<Vote, Error> {
    let vote_id = Uuid::new_v4();
    let row = sqlx::query(
        "INSERT INTO votes (id, session_id, poll_id, poll_option_id) VALUES ($1, $2, $3, $4) RETURNING created_at",
    )
    .bind(vote_id)
    .bind(session_id)
    .bind(poll_id)
    .bind(poll_option_id)
    .fetch_one(pool)
    .await?;

    Ok(Vote {
        id: vote_id,
        session_id: SessionId::new(session_id),
        poll_id,
        poll_option_id,
        created_at: row.get("created_at"),
    })
}

pub async fn delete_vote(pool: &DbPool, vote_id: Uuid) -> Result<(), Error> {
    sqlx::query("DELETE FROM votes WHERE id = $1")
        .bind(vote_id)
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn count_votes(pool: &DbPool, poll_id: Uuid) -> Result<HashMap<Uuid, i64>, Error> {
    let rows = sqlx::query(
        "SELECT poll_option_id, COUNT(*) AS votes FROM votes WHERE poll_id = $1 GROUP BY poll_option_id",
    )
    .bind(poll_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| (r.get("poll_option_id"), r.get::<i64, _>("votes")))
        .collect())
}

/// Vote ledger backed by the `votes` table.
#[derive(Clone)]
pub struct PgLedger {
    pool: DbPool,
}

impl PgLedger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Ledger for PgLedger {
    async fn find_vote(
        &self,
        session_id: &SessionId,
        poll_id: PollId,
    ) -> Result<Option<Vote>, LedgerError> {
        Ok(find_vote(&self.pool, session_id.as_str(), poll_id).await?)
    }

    async fn create_vote(
        &self,
        session_id: &SessionId,
        poll_id: PollId,
        poll_option_id: PollOptionId,
    ) -> Result<Vote, LedgerError> {
        Ok(create_vote(&self.pool, session_id.as_str(), poll_id, poll_option_id).await?)
    }

    async fn delete_vote(&self, vote_id: Uuid) -> Result<(), LedgerError> {
        Ok(delete_vote(&self.pool, vote_id).await?)
    }

    async fn count_votes(
        &self,
        poll_id: PollId,
    ) -> Result<HashMap<PollOptionId, i64>, LedgerError> {
        Ok(count_votes(&self.pool, poll_id).await?)
    }
}
