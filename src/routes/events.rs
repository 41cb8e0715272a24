use std::convert::Infallible;

use axum::{
    Router,
    extract::{Path, State},
    response::sse::{Event, Sse},
    routing::get,
};
use futures::Stream;
use tracing::info;
use uuid::Uuid;

use crate::{
    error::{AppError, ErrorBody},
    services::channel_service,
    state::SharedState,
};

#[utoipa::path(
    get,
    path = "/sessions/{id}/events",
    tag = "events",
    params(("id" = Uuid, Path, description = "Session identifier")),
    responses(
        (status = 200, description = "Stream of session events", content_type = "text/event-stream", body = crate::dto::events::SessionEvent),
        (status = 404, description = "Unknown session", body = ErrorBody),
        (status = 410, description = "Session already ended", body = ErrorBody)
    )
)]
/// Subscribe to the events of one session.
pub async fn session_stream(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let events = channel_service::subscribe(&state, id).await?;
    info!(session_id = %id, "session SSE stream connected");
    Ok(channel_service::to_sse_stream(id, events))
}

/// Configure the event stream routes.
pub fn router() -> Router<SharedState> {
    Router::new().route("/sessions/{id}/events", get(session_stream))
}
