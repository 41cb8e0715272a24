use utoipa::{
    Modify, OpenApi,
    openapi::security::{ApiKey, ApiKeyValue, SecurityScheme},
};

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the live quiz backend.
#[openapi(
    info(title = "Live Quiz Back", description = "Real-time quiz sessions with live scoring"),
    paths(
        crate::routes::health::healthcheck,
        crate::routes::quizzes::create_quiz,
        crate::routes::quizzes::get_quiz,
        crate::routes::host::create_session,
        crate::routes::host::get_session,
        crate::routes::host::start_session,
        crate::routes::host::close_question,
        crate::routes::host::next_question,
        crate::routes::host::end_session,
        crate::routes::host::resume_session,
        crate::routes::host::close_joins,
        crate::routes::host::get_tally,
        crate::routes::host::get_leaderboard,
        crate::routes::host::export_session,
        crate::routes::player::join_session,
        crate::routes::player::get_player,
        crate::routes::player::submit_answer,
        crate::routes::player::get_progress,
        crate::routes::player::answer_self_paced,
        crate::routes::events::session_stream,
    ),
    components(
        schemas(
            crate::error::ErrorBody,
            crate::error::JoinRejection,
            crate::dto::health::HealthResponse,
            crate::dto::health::HealthStatus,
            crate::dto::quiz::CreateQuizRequest,
            crate::dto::quiz::QuestionInput,
            crate::dto::quiz::OptionInput,
            crate::dto::quiz::QuizView,
            crate::dto::quiz::QuestionView,
            crate::dto::quiz::OptionView,
            crate::dto::session::CreateSessionRequest,
            crate::dto::session::SessionView,
            crate::dto::session::TallyView,
            crate::dto::session::OptionCount,
            crate::dto::session::LeaderboardEntry,
            crate::dto::session::HostActionResponse,
            crate::dto::player::JoinRequest,
            crate::dto::player::JoinResponse,
            crate::dto::player::SubmitAnswerRequest,
            crate::dto::player::SelfPacedAnswerRequest,
            crate::dto::player::AnswerReceipt,
            crate::dto::player::PlayerView,
            crate::dto::player::ProgressPhase,
            crate::dto::player::ProgressView,
            crate::dto::events::SessionEvent,
            crate::dto::events::QuestionPayload,
            crate::dto::events::OptionPayload,
            crate::dao::models::SessionMode,
            crate::dao::models::SessionStatus,
        )
    ),
    modifiers(&HostIdentity),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "quizzes", description = "Quiz authoring"),
        (name = "host", description = "Session control reserved to the owning host"),
        (name = "players", description = "Joining and answering"),
        (name = "self-paced", description = "Per-player progress through self-paced sessions"),
        (name = "events", description = "Server-sent session events"),
    )
)]
/// OpenAPI document of the HTTP surface.
pub struct ApiDoc;

/// Registers the `X-Host-Id` header as an API key scheme.
struct HostIdentity;

impl Modify for HostIdentity {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "host_id",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new("X-Host-Id"))),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_host_and_player_paths() {
        let doc = ApiDoc::openapi();
        for path in [
            "/host/sessions/{id}/close-question",
            "/sessions/join",
            "/sessions/{id}/events",
            "/sessions/{id}/players/{player_id}/progress/answer",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
        let components = doc.components.expect("components");
        assert!(components.security_schemes.contains_key("host_id"));
    }
}
