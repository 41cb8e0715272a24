use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt, stream::BoxStream};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dao::models::SessionStatus,
    dto::events::SessionEvent,
    error::ServiceError,
    services::player_service::load_session,
    state::SharedState,
};

/// Open the event stream of a session that has not ended yet.
pub async fn subscribe(
    state: &SharedState,
    session_id: Uuid,
) -> Result<BoxStream<'static, SessionEvent>, ServiceError> {
    let store = state.require_store().await?;
    let session = load_session(state, &store, session_id).await?;
    if session.status == SessionStatus::Completed {
        return Err(ServiceError::SessionClosed);
    }
    Ok(state.hub().stream(session_id))
}

/// Serialise one event as an SSE frame named after the event.
fn to_sse_event(event: &SessionEvent) -> Option<Event> {
    match Event::default().event(event.name()).json_data(event) {
        Ok(frame) => Some(frame),
        Err(err) => {
            warn!(event = event.name(), error = %err, "failed to serialise session event");
            None
        }
    }
}

/// Forward session events to an SSE response until the session ends or the
/// client disconnects.
pub fn to_sse_stream(
    session_id: Uuid,
    events: impl Stream<Item = SessionEvent> + Send + 'static,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    tokio::spawn(async move {
        let mut events = Box::pin(events);
        loop {
            tokio::select! {
                _ = tx.closed() => break,
                next = events.next() => {
                    let Some(event) = next else { break };
                    let terminal = event.is_terminal();
                    if let Some(frame) = to_sse_event(&event) {
                        if tx.send(Ok(frame)).await.is_err() {
                            break;
                        }
                    }
                    if terminal {
                        break;
                    }
                }
            }
        }
        info!(%session_id, "session SSE stream disconnected");
    });

    Sse::new(ReceiverStream::new(rx)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
