use crate::db::connection::DbPool;
use crate::db::models::{Poll, PollId, PollOption};
use crate::error::LedgerError;
use crate::store::PollCatalog;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Error, Row};
use uuid::Uuid;

pub async fn create_poll(pool: &DbPool, title: &str, options: &[String]) -> Result<Poll, Error> {
    let poll_id = Uuid::new_v4();
    let mut tx = pool.begin().await?;

    let row = sqlx::query("INSERT INTO polls (id, title) VALUES ($1, $2) RETURNING created_at")
        .bind(poll_id)
        .bind(title)
        .fetch_one(&mut *tx)
        .await?;

    let mut poll_options = Vec::with_capacity(options.len());
    for (position, option_text) in options.iter().enumerate() {
        let option_id = Uuid::new_v4();
        sqlx::query("INSERT INTO poll_options (id, poll_id, title, position) VALUES ($1, $2, $3, $4)")
            .bind(option_id)
            .bind(poll_id)
            .bind(option_text)
            .bind(position as i32)
            .execute(&mut *tx)
            .await?;

        poll_options.push(PollOption {
            id: option_id,
            poll_id,
            title: option_text.clone(),
        });
    }

    tx.commit().await?;

    Ok(Poll {
        id: poll_id,
        title: title.to_string(),
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
        options: poll_options,
    })
}

pub async fn get_poll(pool: &DbPool, poll_id: Uuid) -> Result<Option<Poll>, Error> {
    let Some(row) = sqlx::query("SELECT id, title, created_at FROM polls WHERE id = $1")
        .bind(poll_id)
        .fetch_optional(pool)
        .await?
    else {
        return Ok(None);
    };

    let options = get_poll_options(pool, poll_id).await?;

    Ok(Some(Poll {
        id: row.get("id"),
        title: row.get("title"),
        created_at: row.get("created_at"),
        options,
    }))
}

pub async fn get_poll_options(pool: &DbPool, poll_id: Uuid) -> Result<Vec<PollOption>, Error> {
    let rows = sqlx::query(
        "SELECT id, poll_id, title FROM poll_options WHERE poll_id = $1 ORDER BY position",
    )
    .bind(poll_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| PollOption {
            id: r.get("id"),
            poll_id: r.get("poll_id"),
            title: r.get("title"),
        })
        .collect())
}

/// Poll catalog backed by the `polls` and `poll_options` tables.
#[derive(Clone)]
pub struct PgCatalog {
    pool: DbPool,
}

impl PgCatalog {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PollCatalog for PgCatalog {
    async fn create_poll(&self, title: &str, options: &[String]) -> Result<Poll, LedgerError> {
        Ok(create_poll(&self.pool, title, options).await?)
    }

    async fn get_poll(&self, poll_id: PollId) -> Result<Option<Poll>, LedgerError> {
        Ok(get_poll(&self.pool, poll_id).await?)
    }
}
