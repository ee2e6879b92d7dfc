use crate::db::connection::DbPool;
use crate::db::models::{PollId, PollOptionId};
use crate::error::CounterError;
use crate::store::{CounterStore, Tally};
use async_trait::async_trait;
use sqlx::{Error, Row};
use uuid::Uuid;

/// Adds `delta` to the counter in one statement, creating it on first use.
pub async fn apply_delta(
    pool: &DbPool,
    poll_id: Uuid,
    option_id: Uuid,
    delta: i64,
) -> Result<i64, Error> {
    let row = sqlx::query(
        r#"
        INSERT INTO poll_tallies (poll_id, option_id, votes) VALUES ($1, $2, $3)
        ON CONFLICT (poll_id, option_id)
        DO UPDATE SET votes = poll_tallies.votes + EXCLUDED.votes
        RETURNING votes
        "#,
    )
    .bind(poll_id)
    .bind(option_id)
    .bind(delta)
    .fetch_one(pool)
    .await?;

    Ok(row.get("votes"))
}

/// Decrements only when the counter is positive. `None` means it was zero
/// or absent and nothing changed.
pub async fn decrement_floored(
    pool: &DbPool,
    poll_id: Uuid,
    option_id: Uuid,
) -> Result<Option<i64>, Error> {
    let row = sqlx::query(
        "UPDATE poll_tallies SET votes = votes - 1 WHERE poll_id = $1 AND option_id = $2 AND votes > 0 RETURNING votes",
    )
    .bind(poll_id)
    .bind(option_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.get("votes")))
}

pub async fn get_tally(pool: &DbPool, poll_id: Uuid) -> Result<Tally, Error> {
    let rows = sqlx::query("SELECT option_id, votes FROM poll_tallies WHERE poll_id = $1")
        .bind(poll_id)
        .fetch_all(pool)
        .await?;

    Ok(rows
        .into_iter()
        .map(|r| (r.get("option_id"), r.get::<i64, _>("votes")))
        .collect())
}

pub async fn reset_tally(pool: &DbPool, poll_id: Uuid, counts: &Tally) -> Result<(), Error> {
    let mut tx = pool.begin().await?;

    sqlx::query("UPDATE poll_tallies SET votes = 0 WHERE poll_id = $1")
        .bind(poll_id)
        .execute(&mut *tx)
        .await?;

    for (option_id, votes) in counts {
        sqlx::query(
            r#"
            INSERT INTO poll_tallies (poll_id, option_id, votes) VALUES ($1, $2, $3)
            ON CONFLICT (poll_id, option_id) DO UPDATE SET votes = EXCLUDED.votes
            "#,
        )
        .bind(poll_id)
        .bind(option_id)
        .bind(votes)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Counter store backed by the `poll_tallies` table.
#[derive(Clone)]
pub struct PgCounterStore {
    pool: DbPool,
    non_negative: bool,
}

impl PgCounterStore {
    pub fn new(pool: DbPool, non_negative: bool) -> Self {
        Self { pool, non_negative }
    }
}

#[async_trait]
impl CounterStore for PgCounterStore {
    async fn increment(
        &self,
        poll_id: PollId,
        option_id: PollOptionId,
    ) -> Result<i64, CounterError> {
        Ok(apply_delta(&self.pool, poll_id, option_id, 1).await?)
    }

    async fn decrement(
        &self,
        poll_id: PollId,
        option_id: PollOptionId,
    ) -> Result<i64, CounterError> {
        if !self.non_negative {
            return Ok(apply_delta(&self.pool, poll_id, option_id, -1).await?);
        }

        decrement_floored(&self.pool, poll_id, option_id)
            .await?
            .ok_or(CounterError::InvalidState {
                poll_id,
                option_id,
                current: 0,
            })
    }

    async fn tally(&self, poll_id: PollId) -> Result<Tally, CounterError> {
        Ok(get_tally(&self.pool, poll_id).await?)
    }

    async fn reset(&self, poll_id: PollId, counts: &Tally) -> Result<(), CounterError> {
        Ok(reset_tally(&self.pool, poll_id, counts).await?)
    }
}
