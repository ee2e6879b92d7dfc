use crate::db::models::{Poll, PollId, SessionId};
use crate::engine::VoteOutcome;
use crate::error::PollError;
use crate::startup::AppState;
use axum::{
    extract::{Extension, Json, Path, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use tower_cookies::{Cookie, Cookies, cookie::time::Duration};
use tracing::warn;
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "sessionId";
const SESSION_MAX_AGE_DAYS: i64 = 30;

// Request/Response DTOs
#[derive(Debug, Deserialize)]
pub struct CreatePollRequest {
    pub title: String,
    pub options: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePollResponse {
    pub poll_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct PollResponse {
    pub poll: PollWithScores,
}

#[derive(Debug, Serialize)]
pub struct PollWithScores {
    pub id: Uuid,
    pub title: String,
    pub options: Vec<PollOptionWithScore>,
}

#[derive(Debug, Serialize)]
pub struct PollOptionWithScore {
    pub id: Uuid,
    pub title: String,
    pub score: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CastVoteRequest {
    pub poll_option_id: String,
}

pub(crate) fn parse_id(field: &str, raw: &str) -> Result<Uuid, PollError> {
    Uuid::parse_str(raw).map_err(|_| PollError::Validation(format!("{field} must be a UUID")))
}

pub(crate) async fn load_poll(app_state: &AppState, poll_id: PollId) -> Result<Poll, PollError> {
    app_state
        .catalog
        .get_poll(poll_id)
        .await?
        .ok_or(PollError::PollNotFound)
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, PollError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| PollError::Validation(rejection.body_text()))
}

/// Create a poll with its options
pub async fn create_poll(
    Extension(app_state): Extension<AppState>,
    payload: Result<Json<CreatePollRequest>, JsonRejection>,
) -> Result<impl IntoResponse, PollError> {
    let payload = body(payload)?;

    let title = payload.title.trim();
    if title.is_empty() {
        return Err(PollError::Validation("title must not be empty".to_string()));
    }
    if payload.options.len() < 2 {
        return Err(PollError::Validation(
            "a poll needs at least two options".to_string(),
        ));
    }
    let options: Vec<String> = payload
        .options
        .iter()
        .map(|option| option.trim().to_string())
        .collect();
    if options.iter().any(String::is_empty) {
        return Err(PollError::Validation(
            "options must not be empty".to_string(),
        ));
    }

    let poll = app_state.catalog.create_poll(title, &options).await?;

    Ok((
        StatusCode::CREATED,
        Json(CreatePollResponse { poll_id: poll.id }),
    ))
}

/// Get a poll with the current score of every option
pub async fn get_poll(
    Extension(app_state): Extension<AppState>,
    Path(poll_id): Path<String>,
) -> Result<impl IntoResponse, PollError> {
    let poll_id = parse_id("pollId", &poll_id)?;
    let poll = load_poll(&app_state, poll_id).await?;
    let tally = app_state.counters.tally(poll_id).await?;

    let options = poll
        .options
        .into_iter()
        .map(|option| PollOptionWithScore {
            score: tally.get(&option.id).copied().unwrap_or(0),
            id: option.id,
            title: option.title,
        })
        .collect();

    Ok((
        StatusCode::OK,
        Json(PollResponse {
            poll: PollWithScores {
                id: poll.id,
                title: poll.title,
                options,
            },
        }),
    ))
}

/// Cast or switch a vote. First-time voters receive a signed `sessionId`
/// cookie valid for 30 days.
pub async fn vote_on_poll(
    Extension(app_state): Extension<AppState>,
    cookies: Cookies,
    Path(poll_id): Path<String>,
    payload: Result<Json<CastVoteRequest>, JsonRejection>,
) -> Result<impl IntoResponse, PollError> {
    let poll_id = parse_id("pollId", &poll_id)?;
    let payload = body(payload)?;
    let poll_option_id = parse_id("pollOptionId", &payload.poll_option_id)?;

    let poll = load_poll(&app_state, poll_id).await?;
    if !poll.has_option(poll_option_id) {
        warn!(%poll_id, %poll_option_id, "vote for an option outside the poll");
        return Err(PollError::OptionNotFound);
    }

    let signed = cookies.signed(&app_state.cookie_key);
    let session_id = signed
        .get(SESSION_COOKIE)
        .map(|cookie| SessionId::new(cookie.value()));
    let had_session = session_id.is_some();

    match app_state
        .engine
        .submit_vote(session_id, poll_id, poll_option_id)
        .await?
    {
        VoteOutcome::Accepted(session_id) => {
            if !had_session {
                let cookie = Cookie::build((SESSION_COOKIE, session_id.to_string()))
                    .path("/")
                    .max_age(Duration::days(SESSION_MAX_AGE_DAYS))
                    .http_only(true)
                    .build();
                signed.add(cookie);
            }
            Ok(StatusCode::CREATED)
        }
        VoteOutcome::AlreadyVoted => Err(PollError::AlreadyVoted),
    }
}
