//! Participant-side operations: joining, answering and the pull view.

use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use tracing::{info, warn};
use uuid::Uuid;
use validator::ValidateEmail;

use crate::{
    dao::{
        models::{
            AnswerEntity, JoinRecordEntity, PlayerEntity, QuizEntity, SessionEntity, SessionMode,
            SessionStatus,
        },
        session_store::SessionStore,
    },
    dto::{
        events::{QuestionPayload, SessionEvent},
        format_system_time,
        player::{AnswerReceipt, JoinRequest, JoinResponse, PlayerView, SubmitAnswerRequest},
        unix_millis,
    },
    error::ServiceError,
    services::{abuse_guard, retry::with_retry, self_paced},
    state::{
        SharedState,
        context::JoinContext,
        join_code::{InvalidJoinCode, JoinCode},
    },
};

/// Admit a player into the session behind `request.join_code`.
pub async fn join(
    state: &SharedState,
    request: JoinRequest,
    ctx: JoinContext,
) -> Result<JoinResponse, ServiceError> {
    let store = state.require_store().await?;
    let config = state.config();

    let code: JoinCode = request
        .join_code
        .parse()
        .map_err(|err: InvalidJoinCode| ServiceError::InvalidInput(err.to_string()))?;

    let display_name = request.display_name.trim().to_owned();
    if display_name.is_empty() {
        return Err(ServiceError::InvalidInput(
            "display name must not be empty".into(),
        ));
    }
    if display_name.chars().count() > config.joins.max_display_name_length {
        return Err(ServiceError::InvalidInput(format!(
            "display name must be at most {} characters",
            config.joins.max_display_name_length
        )));
    }

    let session = with_retry(&config.retry, "find_session_by_code", || {
        store.find_session_by_code(code.to_string())
    })
    .await?
    .ok_or_else(|| ServiceError::NotFound(format!("no session uses join code `{code}`")))?;

    if session.status == SessionStatus::Completed {
        return Err(ServiceError::SessionClosed);
    }
    if !session.accepting_joins {
        return Err(ServiceError::InvalidState(
            "session is not accepting new players".into(),
        ));
    }

    let email = match request.email.as_deref().map(str::trim) {
        Some("") | None => None,
        Some(email) => {
            if !email.validate_email() {
                return Err(ServiceError::InvalidInput(
                    "email address is malformed".into(),
                ));
            }
            Some(email.to_ascii_lowercase())
        }
    };
    if session.mode == SessionMode::SelfPaced && email.is_none() {
        return Err(ServiceError::InvalidInput(
            "an email address is required for self-paced sessions".into(),
        ));
    }

    // Admission checks read rows the admission itself writes.
    let lock = state.join_lock(session.id);
    let _admission = lock.lock().await;

    let players = with_retry(&config.retry, "list_players", || {
        store.list_players(session.id)
    })
    .await?;
    if players
        .iter()
        .any(|player| player.display_name.to_lowercase() == display_name.to_lowercase())
    {
        return Err(ServiceError::InvalidState(format!(
            "display name `{display_name}` is already taken in this session"
        )));
    }

    let email_domain = email
        .as_deref()
        .and_then(|email| email.rsplit_once('@'))
        .map(|(_, domain)| domain.to_owned());

    if session.mode == SessionMode::SelfPaced {
        abuse_guard::check(&store, config, &session, &ctx, email_domain.as_deref()).await?;
    }

    let now = SystemTime::now();
    let quiz = session_quiz(state, &store, &session).await?;
    let progress = (session.mode == SessionMode::SelfPaced
        && session.status == SessionStatus::Active)
        .then(|| self_paced::begin(&quiz, now));

    let player = PlayerEntity {
        id: Uuid::new_v4(),
        session_id: session.id,
        display_name: display_name.clone(),
        email,
        score: 0,
        joined_at: now,
        completed_at: progress
            .filter(|progress| progress.is_finished())
            .map(|_| now),
        progress,
    };
    store.insert_player(player.clone()).await?;

    let record = JoinRecordEntity {
        id: Uuid::new_v4(),
        session_id: session.id,
        quiz_id: session.quiz_id,
        player_id: player.id,
        address: ctx.address.clone(),
        fingerprint: ctx.fingerprint.clone(),
        email_domain,
        joined_at: now,
    };
    if let Err(err) = with_retry(&config.retry, "insert_join_record", || {
        store.insert_join_record(record.clone())
    })
    .await
    {
        warn!(session_id = %session.id, player_id = %player.id, error = %err, "failed to record join; withdrawing player");
        if let Err(cleanup) = with_retry(&config.retry, "delete_player", || {
            store.delete_player(session.id, player.id)
        })
        .await
        {
            warn!(session_id = %session.id, player_id = %player.id, error = %cleanup, "failed to withdraw player");
        }
        return Err(err.into());
    }

    state.hub().publish(
        session.id,
        SessionEvent::PlayerJoined {
            player_id: player.id,
            display_name: display_name.clone(),
            player_count: players.len() + 1,
        },
    );
    info!(session_id = %session.id, player_id = %player.id, mode = ?session.mode, "player joined");

    Ok(JoinResponse {
        player_id: player.id,
        session_id: session.id,
        display_name,
        mode: session.mode,
        status: session.status,
        progress: progress.map(|_| self_paced::progress_view(&quiz, &player, false)),
    })
}

/// Record a player's answer to the question the host is showing.
///
/// A second submission for the same question is a no-op acknowledged with
/// `duplicate: true`.
pub async fn submit_answer(
    state: &SharedState,
    session_id: Uuid,
    request: SubmitAnswerRequest,
) -> Result<AnswerReceipt, ServiceError> {
    let store = state.require_store().await?;

    let session = load_session(state, &store, session_id).await?;
    if session.status == SessionStatus::Completed {
        return Err(ServiceError::SessionClosed);
    }
    if session.mode == SessionMode::SelfPaced {
        return Err(ServiceError::InvalidInput(
            "self-paced answers go through the progress endpoint".into(),
        ));
    }
    let player = load_player(state, &store, session_id, request.player_id).await?;

    let index = request.question_index;
    let now = SystemTime::now();
    let deadline = match (session.cursor.index(), session.question_deadline) {
        (Some(current), Some(deadline)) if current == index => deadline,
        _ => {
            return Err(ServiceError::InvalidState(format!(
                "question {index} is not the current question"
            )));
        }
    };
    if now >= deadline {
        return Err(ServiceError::InvalidState(format!(
            "question {index} no longer accepts answers"
        )));
    }

    let quiz = session_quiz(state, &store, &session).await?;
    let question = quiz
        .questions
        .get(index)
        .ok_or_else(|| ServiceError::InvalidState(format!("question {index} does not exist")))?;
    let option = question.option(request.option_id).ok_or_else(|| {
        ServiceError::InvalidInput(format!(
            "option `{}` does not belong to question {index}",
            request.option_id
        ))
    })?;

    let limit = Duration::from_secs(u64::from(question.time_limit_secs));
    let opened_at = deadline.checked_sub(limit).unwrap_or(deadline);
    let time_taken_ms = now
        .duration_since(opened_at)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0);

    let answer = AnswerEntity {
        id: Uuid::new_v4(),
        session_id,
        player_id: player.id,
        question_index: index,
        option_id: option.id,
        is_correct: option.is_correct,
        time_taken_ms,
        submitted_at: now,
    };

    let (recorded, duplicate) = record_answer(state, &store, answer).await?;
    if duplicate {
        info!(%session_id, player_id = %player.id, question_index = index, "duplicate answer ignored");
        return Ok(AnswerReceipt {
            question_index: index,
            option_id: recorded.option_id,
            duplicate: true,
            score: player.score,
            is_correct: None,
            progress: None,
        });
    }

    let player = rescore(state, &store, &quiz, player).await?;
    state.hub().publish(
        session_id,
        SessionEvent::AnswerSubmitted {
            player_id: player.id,
            question_index: index,
            option_id: recorded.option_id,
        },
    );
    info!(%session_id, player_id = %player.id, question_index = index, score = player.score, "answer recorded");

    Ok(AnswerReceipt {
        question_index: index,
        option_id: recorded.option_id,
        duplicate: false,
        score: player.score,
        is_correct: None,
        progress: None,
    })
}

/// Authoritative state a participant refetches on (re)connect.
pub async fn player_view(
    state: &SharedState,
    session_id: Uuid,
    player_id: Uuid,
) -> Result<PlayerView, ServiceError> {
    let store = state.require_store().await?;
    let session = load_session(state, &store, session_id).await?;
    let player = load_player(state, &store, session_id, player_id).await?;
    let quiz = session_quiz(state, &store, &session).await?;
    let now = SystemTime::now();

    let (current_question, question_open, answered_current) = match (
        session.cursor.index(),
        session.question_deadline,
    ) {
        (Some(index), Some(deadline)) if session.status == SessionStatus::Active => {
            let payload = quiz.questions.get(index).map(|question| {
                QuestionPayload::new(question, index, quiz.questions.len(), unix_millis(deadline))
            });
            let answered = with_retry(&state.config().retry, "find_answer", || {
                store.find_answer(session_id, player_id, index)
            })
            .await?
            .is_some();
            (payload, now < deadline, answered)
        }
        _ => (None, false, false),
    };

    Ok(PlayerView {
        player_id: player.id,
        session_id,
        display_name: player.display_name,
        score: player.score,
        mode: session.mode,
        status: session.status,
        accepting_joins: session.accepting_joins,
        current_question,
        question_open,
        answered_current,
        completed_at: player.completed_at.map(format_system_time),
    })
}

/// Load a session row, failing with `NotFound`.
pub(crate) async fn load_session(
    state: &SharedState,
    store: &Arc<dyn SessionStore>,
    session_id: Uuid,
) -> Result<SessionEntity, ServiceError> {
    with_retry(&state.config().retry, "find_session", || {
        store.find_session(session_id)
    })
    .await?
    .ok_or_else(|| ServiceError::NotFound(format!("session `{session_id}` not found")))
}

/// Load a player of a session, failing with `NotFound`.
pub(crate) async fn load_player(
    state: &SharedState,
    store: &Arc<dyn SessionStore>,
    session_id: Uuid,
    player_id: Uuid,
) -> Result<PlayerEntity, ServiceError> {
    with_retry(&state.config().retry, "find_player", || {
        store.find_player(session_id, player_id)
    })
    .await?
    .ok_or_else(|| {
        ServiceError::NotFound(format!(
            "player `{player_id}` not found in session `{session_id}`"
        ))
    })
}

/// Quiz played by `session`, taken from its running controller when there is one.
pub(crate) async fn session_quiz(
    state: &SharedState,
    store: &Arc<dyn SessionStore>,
    session: &SessionEntity,
) -> Result<Arc<QuizEntity>, ServiceError> {
    if let Some(controller) = state.controller(session.id) {
        return Ok(controller.quiz().clone());
    }
    let quiz_id = session.quiz_id;
    with_retry(&state.config().retry, "find_quiz", || store.find_quiz(quiz_id))
        .await?
        .map(Arc::new)
        .ok_or_else(|| ServiceError::NotFound(format!("quiz `{quiz_id}` not found")))
}

/// Insert `answer` unless the player already answered that question.
///
/// Returns the stored answer and whether it was a duplicate. The duplicate
/// check makes the insert safe to retry.
pub(crate) async fn record_answer(
    state: &SharedState,
    store: &Arc<dyn SessionStore>,
    answer: AnswerEntity,
) -> Result<(AnswerEntity, bool), ServiceError> {
    let lock = state.answer_lock(answer.player_id);
    let _guard = lock.lock().await;

    let outcome = with_retry(&state.config().retry, "insert_answer", || {
        let store = store.clone();
        let answer = answer.clone();
        async move {
            if let Some(existing) = store
                .find_answer(answer.session_id, answer.player_id, answer.question_index)
                .await?
            {
                // An earlier attempt may have landed without being acknowledged.
                let duplicate = existing.id != answer.id;
                return Ok((existing, duplicate));
            }
            store.insert_answer(answer.clone()).await?;
            Ok((answer, false))
        }
    })
    .await?;
    Ok(outcome)
}

/// Recompute a player's score from the answer log and persist it.
pub(crate) async fn rescore(
    state: &SharedState,
    store: &Arc<dyn SessionStore>,
    quiz: &QuizEntity,
    mut player: PlayerEntity,
) -> Result<PlayerEntity, ServiceError> {
    let session_id = player.session_id;
    let answers = with_retry(&state.config().retry, "list_answers", || {
        store.list_answers(session_id)
    })
    .await?;
    player.score = state.config().scoring.replay(quiz, &answers, player.id);

    with_retry(&state.config().retry, "update_player", || {
        store.update_player(player.clone())
    })
    .await?;
    Ok(player)
}
