use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("vote ledger unavailable: {0}")]
    Unavailable(String),
    #[error("a vote already exists for this session on this poll")]
    Conflict,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CounterError {
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
    #[error("counter {poll_id}/{option_id} would drop below zero (current {current})")]
    InvalidState {
        poll_id: Uuid,
        option_id: Uuid,
        current: i64,
    },
}

/// Failures of the vote resolution engine. A duplicate vote is not an error,
/// see `VoteOutcome::AlreadyVoted`.
#[derive(Error, Debug)]
pub enum VoteError {
    #[error("storage error: {0}")]
    Storage(#[from] LedgerError),
    /// The ledger was mutated but the matching counter update failed. The
    /// tally for `poll_id` no longer matches the ledger until reconciled.
    #[error("vote recorded but tally update failed for {poll_id}/{option_id}: {source}")]
    PartialApply {
        poll_id: Uuid,
        option_id: Uuid,
        #[source]
        source: CounterError,
    },
    #[error("reconciliation failed: {0}")]
    Reconcile(#[from] CounterError),
}

#[derive(Error, Debug)]
pub enum PollError {
    #[error("Invalid request: {0}")]
    Validation(String),
    #[error("Poll not found")]
    PollNotFound,
    #[error("Poll option does not belong to this poll")]
    OptionNotFound,
    #[error("You already voted on this poll.")]
    AlreadyVoted,
    #[error("Storage unavailable: {0}")]
    Storage(String),
    #[error("Vote recorded but tallies are being reconciled: {0}")]
    PartialApply(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for PollError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            PollError::Validation(_) => (StatusCode::BAD_REQUEST, "Invalid request"),
            PollError::PollNotFound => (StatusCode::NOT_FOUND, "Poll not found"),
            PollError::OptionNotFound => (StatusCode::BAD_REQUEST, "Poll option not found"),
            PollError::AlreadyVoted => (StatusCode::BAD_REQUEST, "Already voted"),
            PollError::Storage(_) => (StatusCode::SERVICE_UNAVAILABLE, "Storage unavailable"),
            PollError::PartialApply(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Partial apply"),
            PollError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal error"),
        };

        let body = Json(json!({
            "error": error_message,
            "details": self.to_string()
        }));

        (status, body).into_response()
    }
}

impl From<VoteError> for PollError {
    fn from(error: VoteError) -> Self {
        match error {
            VoteError::Storage(e) => PollError::Storage(e.to_string()),
            e @ VoteError::PartialApply { .. } => PollError::PartialApply(e.to_string()),
            VoteError::Reconcile(e) => PollError::Internal(e.to_string()),
        }
    }
}

impl From<LedgerError> for PollError {
    fn from(error: LedgerError) -> Self {
        PollError::Storage(error.to_string())
    }
}

impl From<CounterError> for PollError {
    fn from(error: CounterError) -> Self {
        PollError::Storage(error.to_string())
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(error: sqlx::Error) -> Self {
        match &error {
            sqlx::Error::Database(db) if db.is_unique_violation() => LedgerError::Conflict,
            _ => LedgerError::Unavailable(error.to_string()),
        }
    }
}

impl From<sqlx::Error> for CounterError {
    fn from(error: sqlx::Error) -> Self {
        CounterError::Unavailable(error.to_string())
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
    #[error("COOKIE_SECRET must be at least 64 bytes")]
    CookieSecretTooShort,
}

#[derive(Error, Debug)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database initialization failed: {0}")]
    Database(#[from] sqlx::Error),
    #[error("failed to bind listener: {0}")]
    Io(#[from] std::io::Error),
}
