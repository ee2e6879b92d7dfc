use crate::error::PollError;
use crate::live::session::SubscriberSession;
use crate::polls::{load_poll, parse_id};
use crate::startup::AppState;
use axum::{
    extract::{
        Extension, Path,
        ws::{Message, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{Sink, SinkExt, Stream, StreamExt};

pub async fn poll_results_ws(
    Extension(app_state): Extension<AppState>,
    Path(poll_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Result<Response, PollError> {
    let poll_id = parse_id("pollId", &poll_id)?;
    load_poll(&app_state, poll_id).await?;

    // Registered before the 101 goes out, same as the SSE endpoint.
    let session = SubscriberSession::open(app_state.engine.hub(), poll_id);

    Ok(ws.on_upgrade(move |socket| {
        let (sender, receiver) = socket.split();
        forward_results(session, sender, receiver)
    }))
}

/// Pushes every delta of `session` to `sender` until the client closes
/// `receiver` or the hub goes away.
async fn forward_results<Tx, Rx, E>(
    mut session: SubscriberSession,
    mut sender: Tx,
    mut receiver: Rx,
) where
    Tx: Sink<Message> + Unpin,
    Rx: Stream<Item = Result<Message, E>> + Unpin,
{
    loop {
        tokio::select! {
            message = session.next_message() => {
                let Some(message) = message else { break };
                if sender.send(Message::Text(message)).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    // Inbound frames carry nothing; only closure matters.
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    let _ = sender.close().await;
}
