//! Self-paced runs: every player walks the question list on their own clock.
//!
//! A player's position is stored on their row as a [`PlayerProgress`] and is
//! advanced lazily whenever the player reads or answers, so no per-player
//! timer task is needed.

use std::time::{Duration, SystemTime};

use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    dao::models::{
        AnswerEntity, PlayerEntity, PlayerProgress, QuizEntity, SessionMode, SessionStatus,
    },
    dto::{
        events::{QuestionPayload, SessionEvent},
        format_system_time,
        player::{AnswerReceipt, ProgressPhase, ProgressView, SelfPacedAnswerRequest},
        unix_millis,
    },
    error::ServiceError,
    services::{
        player_service::{load_player, load_session, record_answer, rescore, session_quiz},
        retry::with_retry,
    },
    state::SharedState,
};

fn time_limit(quiz: &QuizEntity, index: usize) -> Duration {
    quiz.questions
        .get(index)
        .map(|question| Duration::from_secs(u64::from(question.time_limit_secs)))
        .unwrap_or_default()
}

/// Progress of a player starting the run at `now`: question 0 opens immediately.
pub fn begin(quiz: &QuizEntity, now: SystemTime) -> PlayerProgress {
    if quiz.questions.is_empty() {
        return PlayerProgress::Finished;
    }
    PlayerProgress::Question {
        index: 0,
        deadline: now + time_limit(quiz, 0),
    }
}

/// Move `progress` forward through every deadline that passed before `now`.
///
/// Returns the new progress and, when the run finished during this call, the
/// instant it finished. An expired question counts as unanswered; the last
/// question expiring finishes the run without a transition pause.
pub fn advance(
    progress: PlayerProgress,
    now: SystemTime,
    quiz: &QuizEntity,
    transition: Duration,
) -> (PlayerProgress, Option<SystemTime>) {
    let total = quiz.questions.len();
    let mut current = progress;

    loop {
        current = match current {
            PlayerProgress::Question { index, deadline } if now >= deadline => {
                if index + 1 >= total {
                    return (PlayerProgress::Finished, Some(deadline));
                }
                PlayerProgress::Transition {
                    next_index: index + 1,
                    until: deadline + transition,
                }
            }
            PlayerProgress::Transition { next_index, until } if now >= until => {
                PlayerProgress::Question {
                    index: next_index,
                    deadline: until + time_limit(quiz, next_index),
                }
            }
            settled => return (settled, None),
        };
    }
}

/// Progress right after answering question `index` at `now`.
pub fn after_answer(
    index: usize,
    now: SystemTime,
    quiz: &QuizEntity,
    transition: Duration,
) -> PlayerProgress {
    if index + 1 >= quiz.questions.len() {
        PlayerProgress::Finished
    } else {
        PlayerProgress::Transition {
            next_index: index + 1,
            until: now + transition,
        }
    }
}

/// Project a player's stored progress.
pub fn progress_view(quiz: &QuizEntity, player: &PlayerEntity, closed: bool) -> ProgressView {
    let total_questions = quiz.questions.len();
    let (phase, question, next_question_at_ms) = match player.progress {
        _ if closed && !player.progress.is_some_and(|p| p.is_finished()) => {
            (ProgressPhase::Closed, None, None)
        }
        Some(PlayerProgress::Question { index, deadline }) => (
            ProgressPhase::Question,
            quiz.questions.get(index).map(|question| {
                QuestionPayload::new(question, index, total_questions, unix_millis(deadline))
            }),
            None,
        ),
        Some(PlayerProgress::Transition { until, .. }) => {
            (ProgressPhase::Transition, None, Some(unix_millis(until)))
        }
        Some(PlayerProgress::Finished) => (ProgressPhase::Finished, None, None),
        None => (ProgressPhase::Waiting, None, None),
    };

    ProgressView {
        player_id: player.id,
        phase,
        total_questions,
        question,
        next_question_at_ms,
        score: player.score,
        completed_at: player.completed_at.map(format_system_time),
    }
}

/// Current self-paced position of a player, advancing it to the present.
pub async fn progress(
    state: &SharedState,
    session_id: Uuid,
    player_id: Uuid,
) -> Result<ProgressView, ServiceError> {
    let store = state.require_store().await?;
    let session = load_session(state, &store, session_id).await?;
    ensure_self_paced(session.mode)?;
    let quiz = session_quiz(state, &store, &session).await?;
    let player = load_player(state, &store, session_id, player_id).await?;

    match session.status {
        SessionStatus::Completed => return Ok(progress_view(&quiz, &player, true)),
        SessionStatus::Waiting => return Ok(progress_view(&quiz, &player, false)),
        SessionStatus::Active => {}
    }

    let now = SystemTime::now();
    let transition = state.config().timing.self_paced_transition();
    let current = player.progress.unwrap_or_else(|| begin(&quiz, now));
    let (next, finished_at) = advance(current, now, &quiz, transition);

    if player.progress == Some(next) {
        return Ok(progress_view(&quiz, &player, false));
    }

    let mut updated = player;
    updated.progress = Some(next);
    let updated = if next.is_finished() {
        updated.completed_at.get_or_insert(finished_at.unwrap_or(now));
        let updated = rescore(state, &store, &quiz, updated).await?;
        state.release_answer_lock(player_id);
        info!(%session_id, %player_id, score = updated.score, "self-paced run finished");
        updated
    } else {
        with_retry(&state.config().retry, "update_player", || {
            store.update_player(updated.clone())
        })
        .await?;
        debug!(%session_id, %player_id, progress = ?next, "self-paced progress advanced");
        updated
    };

    Ok(progress_view(&quiz, &updated, false))
}

/// Answer the question a self-paced player currently has open.
pub async fn answer(
    state: &SharedState,
    session_id: Uuid,
    player_id: Uuid,
    request: SelfPacedAnswerRequest,
) -> Result<AnswerReceipt, ServiceError> {
    let store = state.require_store().await?;
    let session = load_session(state, &store, session_id).await?;
    ensure_self_paced(session.mode)?;
    match session.status {
        SessionStatus::Completed => return Err(ServiceError::SessionClosed),
        SessionStatus::Waiting => {
            return Err(ServiceError::InvalidState(
                "the session has not started yet".into(),
            ));
        }
        SessionStatus::Active => {}
    }

    let quiz = session_quiz(state, &store, &session).await?;
    let player = load_player(state, &store, session_id, player_id).await?;
    let now = SystemTime::now();
    let transition = state.config().timing.self_paced_transition();

    let current = player.progress.unwrap_or_else(|| begin(&quiz, now));
    let (current, _) = advance(current, now, &quiz, transition);
    let index = request.question_index;
    let deadline = match current {
        PlayerProgress::Question {
            index: open,
            deadline,
        } if open == index => deadline,
        _ => {
            return Err(ServiceError::InvalidState(format!(
                "question {index} is not open for this player"
            )));
        }
    };

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

    let opened_at = deadline
        .checked_sub(time_limit(&quiz, index))
        .unwrap_or(deadline);
    let time_taken_ms = now
        .duration_since(opened_at)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0);

    let answer = AnswerEntity {
        id: Uuid::new_v4(),
        session_id,
        player_id,
        question_index: index,
        option_id: option.id,
        is_correct: option.is_correct,
        time_taken_ms,
        submitted_at: now,
    };
    let (recorded, duplicate) = record_answer(state, &store, answer).await?;

    let mut updated = player;
    let next = if duplicate {
        updated.progress.unwrap_or(current)
    } else {
        after_answer(index, now, &quiz, transition)
    };
    updated.progress = Some(next);
    if next.is_finished() {
        updated.completed_at.get_or_insert(now);
    }
    let updated = rescore(state, &store, &quiz, updated).await?;
    if next.is_finished() {
        state.release_answer_lock(player_id);
    }

    if !duplicate {
        state.hub().publish(
            session_id,
            SessionEvent::AnswerSubmitted {
                player_id,
                question_index: index,
                option_id: recorded.option_id,
            },
        );
    }
    info!(%session_id, %player_id, question_index = index, duplicate, score = updated.score, "self-paced answer recorded");

    Ok(AnswerReceipt {
        question_index: index,
        option_id: recorded.option_id,
        duplicate,
        score: updated.score,
        is_correct: Some(recorded.is_correct),
        progress: Some(progress_view(&quiz, &updated, false)),
    })
}

fn ensure_self_paced(mode: SessionMode) -> Result<(), ServiceError> {
    if mode == SessionMode::SelfPaced {
        Ok(())
    } else {
        Err(ServiceError::InvalidInput(
            "progress is only tracked in self-paced sessions".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dao::models::{OptionEntity, QuestionEntity},
        services::{
            host_service, player_service,
            test_support::{fixture, join_request},
        },
        state::context::JoinContext,
    };

    fn quiz(limits: &[u32]) -> QuizEntity {
        QuizEntity {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            title: "Self paced".into(),
            description: None,
            questions: limits
                .iter()
                .enumerate()
                .map(|(position, &time_limit_secs)| QuestionEntity {
                    id: Uuid::new_v4(),
                    position,
                    text: format!("Q{position}"),
                    time_limit_secs,
                    options: vec![OptionEntity {
                        id: Uuid::new_v4(),
                        text: "A".into(),
                        is_correct: true,
                    }],
                })
                .collect(),
            created_at: SystemTime::UNIX_EPOCH,
        }
    }

    const TRANSITION: Duration = Duration::from_secs(5);

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn begin_opens_first_question() {
        let empty = quiz(&[]);
        assert_eq!(begin(&empty, at(0)), PlayerProgress::Finished);

        let quiz = quiz(&[10, 20]);
        assert_eq!(
            begin(&quiz, at(100)),
            PlayerProgress::Question {
                index: 0,
                deadline: at(110)
            }
        );
    }

    #[test]
    fn advance_is_a_no_op_before_the_deadline() {
        let quiz = quiz(&[10, 20]);
        let progress = begin(&quiz, at(0));
        assert_eq!(advance(progress, at(9), &quiz, TRANSITION), (progress, None));
    }

    #[test]
    fn advance_walks_through_expired_questions_and_pauses() {
        let quiz = quiz(&[10, 20, 30]);
        let progress = begin(&quiz, at(0));

        assert_eq!(
            advance(progress, at(12), &quiz, TRANSITION),
            (
                PlayerProgress::Transition {
                    next_index: 1,
                    until: at(15)
                },
                None
            )
        );
        assert_eq!(
            advance(progress, at(16), &quiz, TRANSITION),
            (
                PlayerProgress::Question {
                    index: 1,
                    deadline: at(35)
                },
                None
            )
        );
    }

    #[test]
    fn last_question_expiring_finishes_without_pause() {
        let quiz = quiz(&[10, 20]);
        let progress = begin(&quiz, at(0));
        assert_eq!(
            advance(progress, at(1_000), &quiz, TRANSITION),
            (PlayerProgress::Finished, Some(at(35)))
        );
    }

    #[test]
    fn answering_moves_to_pause_or_finish() {
        let quiz = quiz(&[10, 20]);
        assert_eq!(
            after_answer(0, at(3), &quiz, TRANSITION),
            PlayerProgress::Transition {
                next_index: 1,
                until: at(8)
            }
        );
        assert_eq!(after_answer(1, at(3), &quiz, TRANSITION), PlayerProgress::Finished);
    }

    #[test]
    fn closed_session_hides_unfinished_progress() {
        let quiz = quiz(&[10]);
        let player = PlayerEntity {
            id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            display_name: "Ada".into(),
            email: Some("ada@example.com".into()),
            score: 0,
            joined_at: at(0),
            completed_at: None,
            progress: Some(begin(&quiz, at(0))),
        };
        assert_eq!(progress_view(&quiz, &player, true).phase, ProgressPhase::Closed);
        assert_eq!(progress_view(&quiz, &player, false).phase, ProgressPhase::Question);
    }

    #[tokio::test(start_paused = true)]
    async fn finishing_a_run_releases_the_answer_lock() {
        let fx = fixture(1).await;
        let session = fx.open_session(SessionMode::SelfPaced).await;
        host_service::start(&fx.state, &fx.host, session.id)
            .await
            .unwrap();

        let mut request = join_request(&session.join_code, "Ada");
        request.email = Some("ada@example.org".into());
        let joined = player_service::join(
            &fx.state,
            request,
            JoinContext {
                address: Some("192.0.2.10".into()),
                fingerprint: None,
            },
        )
        .await
        .unwrap();

        let receipt = answer(
            &fx.state,
            session.id,
            joined.player_id,
            SelfPacedAnswerRequest {
                question_index: 0,
                option_id: fx.right_option(0),
            },
        )
        .await
        .unwrap();
        assert_eq!(
            receipt.progress.map(|progress| progress.phase),
            Some(ProgressPhase::Finished)
        );
        assert_eq!(fx.state.lock_counts().0, 0);
    }
}
