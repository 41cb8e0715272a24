//! Host-facing session operations.
//!
//! Mutations go through the session's [`SessionController`]; a controller is
//! rebuilt from the stored row whenever a request reaches a session that has
//! none in this process (for example after a restart).

use std::{sync::Arc, time::SystemTime};

use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        models::{QuestionCursor, SessionEntity, SessionStatus},
        session_store::SessionStore,
    },
    dto::session::{
        CreateSessionRequest, HostActionResponse, LeaderboardEntry, SessionView, TallyView,
    },
    error::ServiceError,
    services::{
        controller::SessionController,
        export,
        player_service::{load_session, session_quiz},
        quiz_service::load_owned_quiz,
        retry::with_retry,
    },
    state::{SharedState, context::HostContext, join_code::JoinCode, leaderboard, tally::AnswerTally},
};

/// Open a new session for one of the host's quizzes.
pub async fn create_session(
    state: &SharedState,
    ctx: &HostContext,
    request: CreateSessionRequest,
) -> Result<SessionView, ServiceError> {
    let store = state.require_store().await?;
    let quiz = load_owned_quiz(state, &store, ctx, request.quiz_id).await?;
    if quiz.questions.is_empty() {
        return Err(ServiceError::InvalidInput(
            "the quiz has no questions".into(),
        ));
    }

    let join_code = allocate_join_code(state, &store).await?;
    let now = SystemTime::now();
    let session = SessionEntity {
        id: Uuid::new_v4(),
        quiz_id: quiz.id,
        host_id: ctx.host_id,
        join_code,
        mode: request.mode,
        status: SessionStatus::Waiting,
        cursor: QuestionCursor::NotStarted,
        question_deadline: None,
        accepting_joins: true,
        created_at: now,
        updated_at: now,
        started_at: None,
        ended_at: None,
    };
    store.insert_session(session.clone()).await?;

    let controller = SessionController::launch(
        session.clone(),
        Arc::new(quiz),
        store,
        state.hub().clone(),
        state.config().clone(),
    )
    .await;
    state.register_controller(controller);

    info!(session_id = %session.id, quiz_id = %session.quiz_id, join_code = %session.join_code, mode = ?session.mode, "session created");
    Ok(SessionView::from_entity(&session, 0))
}

async fn allocate_join_code(
    state: &SharedState,
    store: &Arc<dyn SessionStore>,
) -> Result<String, ServiceError> {
    let attempts = state.config().joins.join_code_attempts.max(1);
    for attempt in 1..=attempts {
        let code = JoinCode::random().to_string();
        let candidate = code.clone();
        let in_use = with_retry(&state.config().retry, "join_code_in_use", || {
            store.join_code_in_use(candidate.clone())
        })
        .await?;
        if !in_use {
            return Ok(code);
        }
        warn!(attempt, "join code collision; drawing another");
    }
    Err(ServiceError::InvalidState(
        "could not allocate a free join code".into(),
    ))
}

/// Controller driving `session_id`, resumed from the store when needed.
async fn controller_for(
    state: &SharedState,
    ctx: &HostContext,
    session_id: Uuid,
) -> Result<Arc<SessionController>, ServiceError> {
    if let Some(controller) = state.controller(session_id) {
        ctx.ensure_owner(&controller.session().await)?;
        return Ok(controller);
    }

    let store = state.require_store().await?;
    let session = load_session(state, &store, session_id).await?;
    ctx.ensure_owner(&session)?;
    if session.status == SessionStatus::Completed {
        return Err(ServiceError::SessionClosed);
    }

    let quiz = session_quiz(state, &store, &session).await?;
    let controller = SessionController::launch(
        session,
        quiz,
        store,
        state.hub().clone(),
        state.config().clone(),
    )
    .await;
    info!(%session_id, "session controller resumed from store");
    Ok(state.register_controller(controller))
}

async fn session_view(
    state: &SharedState,
    session: &SessionEntity,
) -> Result<SessionView, ServiceError> {
    let store = state.require_store().await?;
    let session_id = session.id;
    let players = with_retry(&state.config().retry, "list_players", || {
        store.list_players(session_id)
    })
    .await?;
    Ok(SessionView::from_entity(session, players.len()))
}

async fn action_response(
    state: &SharedState,
    session: &SessionEntity,
    message: &str,
) -> Result<HostActionResponse, ServiceError> {
    Ok(HostActionResponse {
        message: message.to_owned(),
        session: session_view(state, session).await?,
    })
}

/// Start the session.
pub async fn start(
    state: &SharedState,
    ctx: &HostContext,
    session_id: Uuid,
) -> Result<HostActionResponse, ServiceError> {
    let controller = controller_for(state, ctx, session_id).await?;
    let session = controller.start(ctx).await?;
    action_response(state, &session, "session started").await
}

/// Close the active question before its deadline.
pub async fn close_question(
    state: &SharedState,
    ctx: &HostContext,
    session_id: Uuid,
) -> Result<TallyView, ServiceError> {
    let controller = controller_for(state, ctx, session_id).await?;
    controller.close_question(ctx).await
}

/// Show the next question.
pub async fn next(
    state: &SharedState,
    ctx: &HostContext,
    session_id: Uuid,
) -> Result<HostActionResponse, ServiceError> {
    let controller = controller_for(state, ctx, session_id).await?;
    let session = controller.next(ctx).await?;
    action_response(state, &session, "next question shown").await
}

/// End the session and release its controller.
pub async fn end(
    state: &SharedState,
    ctx: &HostContext,
    session_id: Uuid,
) -> Result<HostActionResponse, ServiceError> {
    let controller = controller_for(state, ctx, session_id).await?;
    let session = controller.end(ctx).await?;
    state.remove_controller(session_id);

    state.release_join_lock(session_id);

    let response = action_response(state, &session, "session ended").await?;
    release_answer_locks(state, session_id).await;
    Ok(response)
}

async fn release_answer_locks(state: &SharedState, session_id: Uuid) {
    let Some(store) = state.session_store().await else {
        return;
    };
    match with_retry(&state.config().retry, "list_players", || {
        store.list_players(session_id)
    })
    .await
    {
        Ok(players) => {
            for player in players {
                state.release_answer_lock(player.id);
            }
        }
        Err(err) => {
            warn!(%session_id, error = %err, "failed to list players; answer locks kept");
        }
    }
}

/// Rebuild the controller of a session from its stored row.
pub async fn resume(
    state: &SharedState,
    ctx: &HostContext,
    session_id: Uuid,
) -> Result<HostActionResponse, ServiceError> {
    let controller = controller_for(state, ctx, session_id).await?;
    let session = controller.session().await;
    action_response(state, &session, "session resumed").await
}

/// Stop admitting new players.
pub async fn close_joins(
    state: &SharedState,
    ctx: &HostContext,
    session_id: Uuid,
) -> Result<HostActionResponse, ServiceError> {
    let controller = controller_for(state, ctx, session_id).await?;
    let session = controller.close_joins(ctx).await?;
    action_response(state, &session, "joins closed").await
}

/// Session row as seen by its host.
pub async fn get_session(
    state: &SharedState,
    ctx: &HostContext,
    session_id: Uuid,
) -> Result<SessionView, ServiceError> {
    let store = state.require_store().await?;
    let session = load_session(state, &store, session_id).await?;
    ctx.ensure_owner(&session)?;
    session_view(state, &session).await
}

/// Answer counts for a question.
///
/// Without `question_index`, the running controller's live tally is returned;
/// otherwise (or when no controller runs) counts are rebuilt from the store.
pub async fn tally(
    state: &SharedState,
    ctx: &HostContext,
    session_id: Uuid,
    question_index: Option<usize>,
) -> Result<TallyView, ServiceError> {
    let store = state.require_store().await?;
    let session = load_session(state, &store, session_id).await?;
    ctx.ensure_owner(&session)?;

    if question_index.is_none() {
        if let Some(controller) = state.controller(session_id) {
            return Ok(controller.tally().await);
        }
    }

    let mut tally = AnswerTally::new();
    let Some(index) = question_index.or(session.cursor.index()) else {
        return Ok(tally.snapshot());
    };
    let quiz = session_quiz(state, &store, &session).await?;
    let question = quiz
        .questions
        .get(index)
        .ok_or_else(|| ServiceError::NotFound(format!("question {index} does not exist")))?;

    let answers = with_retry(&state.config().retry, "list_answers", || {
        store.list_answers(session_id)
    })
    .await?;
    tally.reset(index, question.options.iter().map(|option| option.id));
    tally.rebuild(&answers);
    Ok(tally.snapshot())
}

/// Ranked players of the session.
pub async fn leaderboard(
    state: &SharedState,
    ctx: &HostContext,
    session_id: Uuid,
) -> Result<Vec<LeaderboardEntry>, ServiceError> {
    let store = state.require_store().await?;
    let session = load_session(state, &store, session_id).await?;
    ctx.ensure_owner(&session)?;

    let players = with_retry(&state.config().retry, "list_players", || {
        store.list_players(session_id)
    })
    .await?;
    Ok(leaderboard::rank(&players))
}

/// CSV report of the session.
pub async fn export(
    state: &SharedState,
    ctx: &HostContext,
    session_id: Uuid,
) -> Result<String, ServiceError> {
    let store = state.require_store().await?;
    let session = load_session(state, &store, session_id).await?;
    ctx.ensure_owner(&session)?;
    let quiz = session_quiz(state, &store, &session).await?;

    let players = with_retry(&state.config().retry, "list_players", || {
        store.list_players(session_id)
    })
    .await?;
    let answers = with_retry(&state.config().retry, "list_answers", || {
        store.list_answers(session_id)
    })
    .await?;

    info!(%session_id, players = players.len(), answers = answers.len(), "session exported");
    Ok(export::render_csv(&quiz, &session, &players, &answers))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        dao::models::SessionMode,
        dto::player::SubmitAnswerRequest,
        services::{
            player_service,
            test_support::{fixture, join_request},
        },
        state::context::JoinContext,
    };

    #[tokio::test(start_paused = true)]
    async fn sessions_can_only_be_opened_on_owned_quizzes() {
        let fx = fixture(1).await;
        let stranger = HostContext::new(Uuid::new_v4());
        let err = create_session(
            &fx.state,
            &stranger,
            CreateSessionRequest {
                quiz_id: fx.quiz.id,
                mode: SessionMode::Live,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServiceError::AccessDenied(_)));

        let view = fx.open_session(SessionMode::Live).await;
        assert_eq!(view.join_code.len(), 6);
        assert_eq!(view.status, SessionStatus::Waiting);
        assert_eq!(fx.state.controller_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn controller_is_rebuilt_from_the_store_when_missing() {
        let fx = fixture(2).await;
        let session = fx.open_session(SessionMode::Live).await;
        player_service::join(
            &fx.state,
            join_request(&session.join_code, "Ada"),
            JoinContext::default(),
        )
        .await
        .unwrap();
        start(&fx.state, &fx.host, session.id).await.unwrap();
        tokio::time::sleep(Duration::from_secs(4)).await;

        fx.state.remove_controller(session.id);
        let resumed = resume(&fx.state, &fx.host, session.id).await.unwrap();
        assert_eq!(resumed.session.current_question_index, Some(0));

        let tally = close_question(&fx.state, &fx.host, session.id)
            .await
            .unwrap();
        assert_eq!(tally.question_index, Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn ending_a_session_releases_its_locks() {
        let fx = fixture(1).await;
        let session = fx.open_session(SessionMode::Live).await;
        let joined = player_service::join(
            &fx.state,
            join_request(&session.join_code, "Ada"),
            JoinContext::default(),
        )
        .await
        .unwrap();
        start(&fx.state, &fx.host, session.id).await.unwrap();
        tokio::time::sleep(Duration::from_secs(4)).await;
        player_service::submit_answer(
            &fx.state,
            session.id,
            SubmitAnswerRequest {
                player_id: joined.player_id,
                question_index: 0,
                option_id: fx.right_option(0),
            },
        )
        .await
        .unwrap();
        assert_eq!(fx.state.lock_counts(), (1, 1));

        end(&fx.state, &fx.host, session.id).await.unwrap();
        assert_eq!(fx.state.lock_counts(), (0, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn ended_sessions_refuse_further_control() {
        let fx = fixture(1).await;
        let session = fx.open_session(SessionMode::Poll).await;
        end(&fx.state, &fx.host, session.id).await.unwrap();

        assert_eq!(fx.state.controller_count(), 0);
        let err = start(&fx.state, &fx.host, session.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::SessionClosed));
        let stored = get_session(&fx.state, &fx.host, session.id).await.unwrap();
        assert_eq!(stored.status, SessionStatus::Completed);
        assert!(!stored.accepting_joins);
    }

    #[tokio::test(start_paused = true)]
    async fn leaderboard_and_export_reflect_answers() {
        let fx = fixture(1).await;
        let session = fx.open_session(SessionMode::Live).await;
        let mut players = Vec::new();
        for name in ["Ada", "Bob"] {
            let joined = player_service::join(
                &fx.state,
                join_request(&session.join_code, name),
                JoinContext::default(),
            )
            .await
            .unwrap();
            players.push(joined.player_id);
        }
        start(&fx.state, &fx.host, session.id).await.unwrap();
        tokio::time::sleep(Duration::from_secs(4)).await;

        player_service::submit_answer(
            &fx.state,
            session.id,
            SubmitAnswerRequest {
                player_id: players[1],
                question_index: 0,
                option_id: fx.right_option(0),
            },
        )
        .await
        .unwrap();

        let tally = tally(&fx.state, &fx.host, session.id, None).await.unwrap();
        assert_eq!(tally.total, 1);
        assert_eq!(tally.options[0].percentage, 100);

        let ranking = leaderboard(&fx.state, &fx.host, session.id).await.unwrap();
        assert_eq!(ranking[0].display_name, "Bob");
        assert_eq!(ranking[0].position, 1);
        assert_eq!(ranking[1].position, 2);

        let csv = export(&fx.state, &fx.host, session.id).await.unwrap();
        assert!(csv.contains("\"Bob\""));
        assert!(csv.starts_with("# Quiz"));
    }
}
