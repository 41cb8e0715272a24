use axum::{
    Extension, Json, Router,
    body::Body,
    extract::{Path, Query, State},
    http::{Request, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::{
    dto::session::{
        CreateSessionRequest, HostActionResponse, LeaderboardEntry, SessionView, TallyView,
    },
    error::{AppError, ErrorBody},
    services::host_service,
    state::{SharedState, context::HostContext},
};

const HOST_ID_HEADER: &str = "x-host-id";

/// Session management endpoints reserved to the owning host.
pub fn router(state: SharedState) -> Router<SharedState> {
    Router::new()
        .route("/host/sessions", post(create_session))
        .route("/host/sessions/{id}", get(get_session))
        .route("/host/sessions/{id}/start", post(start_session))
        .route("/host/sessions/{id}/close-question", post(close_question))
        .route("/host/sessions/{id}/next", post(next_question))
        .route("/host/sessions/{id}/end", post(end_session))
        .route("/host/sessions/{id}/resume", post(resume_session))
        .route("/host/sessions/{id}/close-joins", post(close_joins))
        .route("/host/sessions/{id}/tally", get(get_tally))
        .route("/host/sessions/{id}/leaderboard", get(get_leaderboard))
        .route("/host/sessions/{id}/export", get(export_session))
        .route_layer(middleware::from_fn_with_state(state, require_host))
}

/// Open a session for one of the caller's quizzes.
#[utoipa::path(
    post,
    path = "/host/sessions",
    tag = "host",
    params(("X-Host-Id" = Uuid, Header, description = "Identity of the acting host")),
    request_body = CreateSessionRequest,
    responses(
        (status = 201, description = "Session created", body = SessionView),
        (status = 403, description = "Quiz owned by another host", body = ErrorBody),
        (status = 404, description = "Unknown quiz", body = ErrorBody)
    )
)]
pub async fn create_session(
    State(state): State<SharedState>,
    Extension(ctx): Extension<HostContext>,
    Json(payload): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<SessionView>), AppError> {
    let session = host_service::create_session(&state, &ctx, payload).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// Retrieve a session row.
#[utoipa::path(
    get,
    path = "/host/sessions/{id}",
    tag = "host",
    params(
        ("X-Host-Id" = Uuid, Header, description = "Identity of the acting host"),
        ("id" = Uuid, Path, description = "Session identifier")
    ),
    responses(
        (status = 200, description = "Session", body = SessionView),
        (status = 404, description = "Unknown session", body = ErrorBody)
    )
)]
pub async fn get_session(
    State(state): State<SharedState>,
    Extension(ctx): Extension<HostContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, AppError> {
    Ok(Json(host_service::get_session(&state, &ctx, id).await?))
}

/// Start the session; live and poll sessions show their first question after the start delay.
#[utoipa::path(
    post,
    path = "/host/sessions/{id}/start",
    tag = "host",
    params(
        ("X-Host-Id" = Uuid, Header, description = "Identity of the acting host"),
        ("id" = Uuid, Path, description = "Session identifier")
    ),
    responses(
        (status = 200, description = "Session starting", body = HostActionResponse),
        (status = 409, description = "Session cannot start yet", body = ErrorBody)
    )
)]
pub async fn start_session(
    State(state): State<SharedState>,
    Extension(ctx): Extension<HostContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<HostActionResponse>, AppError> {
    Ok(Json(host_service::start(&state, &ctx, id).await?))
}

/// Close the active question before its deadline.
#[utoipa::path(
    post,
    path = "/host/sessions/{id}/close-question",
    tag = "host",
    params(
        ("X-Host-Id" = Uuid, Header, description = "Identity of the acting host"),
        ("id" = Uuid, Path, description = "Session identifier")
    ),
    responses(
        (status = 200, description = "Final tally of the closed question", body = TallyView),
        (status = 409, description = "No question is open", body = ErrorBody)
    )
)]
pub async fn close_question(
    State(state): State<SharedState>,
    Extension(ctx): Extension<HostContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<TallyView>, AppError> {
    Ok(Json(host_service::close_question(&state, &ctx, id).await?))
}

/// Show the following question.
#[utoipa::path(
    post,
    path = "/host/sessions/{id}/next",
    tag = "host",
    params(
        ("X-Host-Id" = Uuid, Header, description = "Identity of the acting host"),
        ("id" = Uuid, Path, description = "Session identifier")
    ),
    responses(
        (status = 200, description = "Next question shown", body = HostActionResponse),
        (status = 409, description = "Current question still open or none left", body = ErrorBody)
    )
)]
pub async fn next_question(
    State(state): State<SharedState>,
    Extension(ctx): Extension<HostContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<HostActionResponse>, AppError> {
    Ok(Json(host_service::next(&state, &ctx, id).await?))
}

/// End the session.
#[utoipa::path(
    post,
    path = "/host/sessions/{id}/end",
    tag = "host",
    params(
        ("X-Host-Id" = Uuid, Header, description = "Identity of the acting host"),
        ("id" = Uuid, Path, description = "Session identifier")
    ),
    responses(
        (status = 200, description = "Session ended", body = HostActionResponse),
        (status = 410, description = "Session already ended", body = ErrorBody)
    )
)]
pub async fn end_session(
    State(state): State<SharedState>,
    Extension(ctx): Extension<HostContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<HostActionResponse>, AppError> {
    Ok(Json(host_service::end(&state, &ctx, id).await?))
}

/// Rebuild the session controller from storage, re-arming its countdown.
#[utoipa::path(
    post,
    path = "/host/sessions/{id}/resume",
    tag = "host",
    params(
        ("X-Host-Id" = Uuid, Header, description = "Identity of the acting host"),
        ("id" = Uuid, Path, description = "Session identifier")
    ),
    responses(
        (status = 200, description = "Session resumed", body = HostActionResponse),
        (status = 410, description = "Session already ended", body = ErrorBody)
    )
)]
pub async fn resume_session(
    State(state): State<SharedState>,
    Extension(ctx): Extension<HostContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<HostActionResponse>, AppError> {
    Ok(Json(host_service::resume(&state, &ctx, id).await?))
}

/// Stop admitting new players.
#[utoipa::path(
    post,
    path = "/host/sessions/{id}/close-joins",
    tag = "host",
    params(
        ("X-Host-Id" = Uuid, Header, description = "Identity of the acting host"),
        ("id" = Uuid, Path, description = "Session identifier")
    ),
    responses((status = 200, description = "Joins closed", body = HostActionResponse))
)]
pub async fn close_joins(
    State(state): State<SharedState>,
    Extension(ctx): Extension<HostContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<HostActionResponse>, AppError> {
    Ok(Json(host_service::close_joins(&state, &ctx, id).await?))
}

/// Optional question selector for the tally endpoint.
#[derive(Debug, Deserialize, IntoParams)]
pub struct TallyQuery {
    /// Question to count; defaults to the current one.
    pub question_index: Option<usize>,
}

/// Per-option answer counts.
#[utoipa::path(
    get,
    path = "/host/sessions/{id}/tally",
    tag = "host",
    params(
        ("X-Host-Id" = Uuid, Header, description = "Identity of the acting host"),
        ("id" = Uuid, Path, description = "Session identifier"),
        TallyQuery
    ),
    responses((status = 200, description = "Answer counts", body = TallyView))
)]
pub async fn get_tally(
    State(state): State<SharedState>,
    Extension(ctx): Extension<HostContext>,
    Path(id): Path<Uuid>,
    Query(query): Query<TallyQuery>,
) -> Result<Json<TallyView>, AppError> {
    Ok(Json(
        host_service::tally(&state, &ctx, id, query.question_index).await?,
    ))
}

/// Ranked players.
#[utoipa::path(
    get,
    path = "/host/sessions/{id}/leaderboard",
    tag = "host",
    params(
        ("X-Host-Id" = Uuid, Header, description = "Identity of the acting host"),
        ("id" = Uuid, Path, description = "Session identifier")
    ),
    responses((status = 200, description = "Leaderboard", body = [LeaderboardEntry]))
)]
pub async fn get_leaderboard(
    State(state): State<SharedState>,
    Extension(ctx): Extension<HostContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<LeaderboardEntry>>, AppError> {
    Ok(Json(host_service::leaderboard(&state, &ctx, id).await?))
}

/// Download the session report as CSV.
#[utoipa::path(
    get,
    path = "/host/sessions/{id}/export",
    tag = "host",
    params(
        ("X-Host-Id" = Uuid, Header, description = "Identity of the acting host"),
        ("id" = Uuid, Path, description = "Session identifier")
    ),
    responses((status = 200, description = "CSV report", content_type = "text/csv", body = String))
)]
pub async fn export_session(
    State(state): State<SharedState>,
    Extension(ctx): Extension<HostContext>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let csv = host_service::export(&state, &ctx, id).await?;
    let disposition = format!("attachment; filename=\"session-{id}.csv\"");
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_owned()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        csv,
    )
        .into_response())
}

/// Resolve the acting host from `X-Host-Id` and expose it to handlers.
pub(crate) async fn require_host(
    State(state): State<SharedState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let host_id = req
        .headers()
        .get(HOST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("missing host header `X-Host-Id`".into()))?
        .trim()
        .parse::<Uuid>()
        .map_err(|_| AppError::Unauthorized("`X-Host-Id` must be a UUID".into()))?;

    let ctx = HostContext {
        host_id,
        admin: state.config().is_admin(host_id),
    };
    req.extensions_mut().insert(ctx);
    Ok(next.run(req).await)
}
