use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
};
use axum_valid::Valid;
use uuid::Uuid;

use crate::{
    dto::quiz::{CreateQuizRequest, QuizView},
    error::{AppError, ErrorBody},
    routes::host::require_host,
    services::quiz_service,
    state::{SharedState, context::HostContext},
};

/// Quiz authoring endpoints.
pub fn router(state: SharedState) -> Router<SharedState> {
    Router::new()
        .route("/quizzes", post(create_quiz))
        .route("/quizzes/{id}", get(get_quiz))
        .route_layer(middleware::from_fn_with_state(state, require_host))
}

/// Store a new quiz owned by the caller.
#[utoipa::path(
    post,
    path = "/quizzes",
    tag = "quizzes",
    params(("X-Host-Id" = Uuid, Header, description = "Identity of the acting host")),
    request_body = CreateQuizRequest,
    responses(
        (status = 201, description = "Quiz stored", body = QuizView),
        (status = 400, description = "Invalid quiz", body = ErrorBody)
    )
)]
pub async fn create_quiz(
    State(state): State<SharedState>,
    Extension(ctx): Extension<HostContext>,
    Valid(Json(payload)): Valid<Json<CreateQuizRequest>>,
) -> Result<(StatusCode, Json<QuizView>), AppError> {
    let quiz = quiz_service::create_quiz(&state, &ctx, payload).await?;
    Ok((StatusCode::CREATED, Json(quiz)))
}

/// Fetch a quiz with its answer key.
#[utoipa::path(
    get,
    path = "/quizzes/{id}",
    tag = "quizzes",
    params(
        ("X-Host-Id" = Uuid, Header, description = "Identity of the acting host"),
        ("id" = Uuid, Path, description = "Quiz identifier")
    ),
    responses(
        (status = 200, description = "Quiz", body = QuizView),
        (status = 403, description = "Quiz owned by another host", body = ErrorBody),
        (status = 404, description = "Unknown quiz", body = ErrorBody)
    )
)]
pub async fn get_quiz(
    State(state): State<SharedState>,
    Extension(ctx): Extension<HostContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<QuizView>, AppError> {
    Ok(Json(quiz_service::get_quiz(&state, &ctx, id).await?))
}
