use crate::error::PollError;
use crate::live::session::SubscriberSession;
use crate::polls::{load_poll, parse_id};
use crate::startup::AppState;
use axum::{
    extract::{Extension, Path},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use std::{convert::Infallible, time::Duration};

pub async fn poll_results_sse(
    Extension(app_state): Extension<AppState>,
    Path(poll_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, PollError> {
    let poll_id = parse_id("pollId", &poll_id)?;
    load_poll(&app_state, poll_id).await?;

    // Registered before the response starts, so no delta published after
    // this request is accepted can be missed.
    let mut session = SubscriberSession::open(app_state.engine.hub(), poll_id);

    let stream = async_stream::stream! {
        while let Some(message) = session.next_message().await {
            yield Ok(Event::default().event("vote").data(message));
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("keep-alive"),
    ))
}
