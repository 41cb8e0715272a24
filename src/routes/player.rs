use std::net::SocketAddr;

use axum::{
    Extension, Json, Router,
    extract::{ConnectInfo, Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
};
use axum_valid::Valid;
use uuid::Uuid;

use crate::{
    dto::player::{
        AnswerReceipt, JoinRequest, JoinResponse, PlayerView, ProgressView,
        SelfPacedAnswerRequest, SubmitAnswerRequest,
    },
    error::{AppError, ErrorBody},
    services::{player_service, self_paced},
    state::{SharedState, context::JoinContext},
};

const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
const FINGERPRINT_HEADER: &str = "x-device-fingerprint";

/// Player-facing endpoints.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/sessions/join", post(join_session))
        .route("/sessions/{id}/players/{player_id}", get(get_player))
        .route("/sessions/{id}/answers", post(submit_answer))
        .route(
            "/sessions/{id}/players/{player_id}/progress",
            get(get_progress),
        )
        .route(
            "/sessions/{id}/players/{player_id}/progress/answer",
            post(answer_self_paced),
        )
}

/// Join a session with its six-digit code.
#[utoipa::path(
    post,
    path = "/sessions/join",
    tag = "players",
    request_body = JoinRequest,
    responses(
        (status = 201, description = "Player admitted", body = JoinResponse),
        (status = 400, description = "Malformed code or name", body = ErrorBody),
        (status = 403, description = "Join refused by the abuse guard", body = ErrorBody),
        (status = 404, description = "No session uses this code", body = ErrorBody),
        (status = 409, description = "Joins closed or name taken", body = ErrorBody),
        (status = 410, description = "Session already ended", body = ErrorBody)
    )
)]
pub async fn join_session(
    State(state): State<SharedState>,
    connect_info: Option<Extension<ConnectInfo<SocketAddr>>>,
    headers: HeaderMap,
    Valid(Json(payload)): Valid<Json<JoinRequest>>,
) -> Result<(StatusCode, Json<JoinResponse>), AppError> {
    let peer = connect_info.map(|Extension(ConnectInfo(addr))| addr);
    let ctx = JoinContext {
        address: client_address(&headers, peer),
        fingerprint: payload.fingerprint.clone().or_else(|| {
            headers
                .get(FINGERPRINT_HEADER)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned)
        }),
    };
    let response = player_service::join(&state, payload, ctx).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// What a player should currently display.
#[utoipa::path(
    get,
    path = "/sessions/{id}/players/{player_id}",
    tag = "players",
    params(
        ("id" = Uuid, Path, description = "Session identifier"),
        ("player_id" = Uuid, Path, description = "Player identifier")
    ),
    responses(
        (status = 200, description = "Player state", body = PlayerView),
        (status = 404, description = "Unknown session or player", body = ErrorBody)
    )
)]
pub async fn get_player(
    State(state): State<SharedState>,
    Path((id, player_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<PlayerView>, AppError> {
    Ok(Json(
        player_service::player_view(&state, id, player_id).await?,
    ))
}

/// Answer the open question of a live or poll session.
#[utoipa::path(
    post,
    path = "/sessions/{id}/answers",
    tag = "players",
    params(("id" = Uuid, Path, description = "Session identifier")),
    request_body = SubmitAnswerRequest,
    responses(
        (status = 200, description = "Answer stored, or the earlier answer when duplicated", body = AnswerReceipt),
        (status = 400, description = "Option does not belong to the question", body = ErrorBody),
        (status = 409, description = "Question not open", body = ErrorBody),
        (status = 410, description = "Session already ended", body = ErrorBody)
    )
)]
pub async fn submit_answer(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SubmitAnswerRequest>,
) -> Result<Json<AnswerReceipt>, AppError> {
    Ok(Json(player_service::submit_answer(&state, id, payload).await?))
}

/// Self-paced position of a player.
#[utoipa::path(
    get,
    path = "/sessions/{id}/players/{player_id}/progress",
    tag = "self-paced",
    params(
        ("id" = Uuid, Path, description = "Session identifier"),
        ("player_id" = Uuid, Path, description = "Player identifier")
    ),
    responses(
        (status = 200, description = "Current progress", body = ProgressView),
        (status = 400, description = "Session is not self-paced", body = ErrorBody)
    )
)]
pub async fn get_progress(
    State(state): State<SharedState>,
    Path((id, player_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ProgressView>, AppError> {
    Ok(Json(self_paced::progress(&state, id, player_id).await?))
}

/// Answer the self-paced question currently open for the player.
#[utoipa::path(
    post,
    path = "/sessions/{id}/players/{player_id}/progress/answer",
    tag = "self-paced",
    params(
        ("id" = Uuid, Path, description = "Session identifier"),
        ("player_id" = Uuid, Path, description = "Player identifier")
    ),
    request_body = SelfPacedAnswerRequest,
    responses(
        (status = 200, description = "Answer stored with correctness feedback", body = AnswerReceipt),
        (status = 409, description = "Question not open for this player", body = ErrorBody),
        (status = 410, description = "Session already ended", body = ErrorBody)
    )
)]
pub async fn answer_self_paced(
    State(state): State<SharedState>,
    Path((id, player_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<SelfPacedAnswerRequest>,
) -> Result<Json<AnswerReceipt>, AppError> {
    Ok(Json(
        self_paced::answer(&state, id, player_id, payload).await?,
    ))
}

/// First hop of `X-Forwarded-For`, else the socket peer.
fn client_address(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    headers
        .get(FORWARDED_FOR_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn forwarded_header_wins_over_peer() {
        let mut headers = HeaderMap::new();
        headers.insert(
            FORWARDED_FOR_HEADER,
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        let peer = Some(SocketAddr::from(([127, 0, 0, 1], 4000)));
        assert_eq!(
            client_address(&headers, peer).as_deref(),
            Some("203.0.113.7")
        );
    }

    #[test]
    fn peer_address_drops_the_port() {
        let peer = Some(SocketAddr::from(([192, 168, 1, 20], 51000)));
        assert_eq!(
            client_address(&HeaderMap::new(), peer).as_deref(),
            Some("192.168.1.20")
        );
        assert_eq!(client_address(&HeaderMap::new(), None), None);
    }
}
