//! Quiz authoring.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::{models::QuizEntity, session_store::SessionStore},
    dto::quiz::{CreateQuizRequest, QuizView},
    error::ServiceError,
    services::retry::with_retry,
    state::{SharedState, context::HostContext},
};

/// Validate and store a quiz owned by the calling host.
pub async fn create_quiz(
    state: &SharedState,
    ctx: &HostContext,
    request: CreateQuizRequest,
) -> Result<QuizView, ServiceError> {
    request
        .validate()
        .map_err(|err| ServiceError::InvalidInput(err.to_string()))?;

    let store = state.require_store().await?;
    let quiz = request.into_entity(ctx.host_id);
    with_retry(&state.config().retry, "save_quiz", || {
        store.save_quiz(quiz.clone())
    })
    .await?;

    info!(quiz_id = %quiz.id, host_id = %ctx.host_id, questions = quiz.questions.len(), "quiz created");
    Ok(QuizView::from(&quiz))
}

/// Fetch a quiz the caller owns.
pub async fn get_quiz(
    state: &SharedState,
    ctx: &HostContext,
    quiz_id: Uuid,
) -> Result<QuizView, ServiceError> {
    let store = state.require_store().await?;
    let quiz = load_owned_quiz(state, &store, ctx, quiz_id).await?;
    Ok(QuizView::from(&quiz))
}

/// Load a quiz and check that `ctx` may use it.
pub(crate) async fn load_owned_quiz(
    state: &SharedState,
    store: &Arc<dyn SessionStore>,
    ctx: &HostContext,
    quiz_id: Uuid,
) -> Result<QuizEntity, ServiceError> {
    let quiz = with_retry(&state.config().retry, "find_quiz", || {
        store.find_quiz(quiz_id)
    })
    .await?
    .ok_or_else(|| ServiceError::NotFound(format!("quiz `{quiz_id}` not found")))?;

    if !ctx.admin && quiz.owner_id != ctx.host_id {
        return Err(ServiceError::AccessDenied(format!(
            "host `{}` does not own quiz `{quiz_id}`",
            ctx.host_id
        )));
    }
    Ok(quiz)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dto::quiz::{OptionInput, QuestionInput},
        services::test_support::fixture,
    };

    fn request(questions: Vec<QuestionInput>) -> CreateQuizRequest {
        CreateQuizRequest {
            title: "  Rivers  ".into(),
            description: None,
            questions,
        }
    }

    fn question(correct: usize) -> QuestionInput {
        QuestionInput {
            text: "Longest river?".into(),
            time_limit_secs: 30,
            options: ["Nile", "Amazon", "Danube"]
                .iter()
                .enumerate()
                .map(|(idx, text)| OptionInput {
                    text: (*text).into(),
                    is_correct: idx < correct,
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn stores_a_valid_quiz_for_its_author() {
        let fx = fixture(1).await;
        let view = create_quiz(&fx.state, &fx.host, request(vec![question(1)]))
            .await
            .unwrap();
        assert_eq!(view.title, "Rivers");
        assert_eq!(view.owner_id, fx.host.host_id);

        let fetched = get_quiz(&fx.state, &fx.host, view.id).await.unwrap();
        assert_eq!(fetched.id, view.id);
    }

    #[tokio::test]
    async fn rejects_quizzes_without_a_correct_option() {
        let fx = fixture(1).await;
        for questions in [vec![], vec![question(0)]] {
            let err = create_quiz(&fx.state, &fx.host, request(questions))
                .await
                .unwrap_err();
            assert!(matches!(err, ServiceError::InvalidInput(_)));
        }

        let view = create_quiz(&fx.state, &fx.host, request(vec![question(2)]))
            .await
            .unwrap();
        let correct = view.questions[0]
            .options
            .iter()
            .filter(|option| option.is_correct)
            .count();
        assert_eq!(correct, 2);
    }

    #[tokio::test]
    async fn other_hosts_cannot_read_the_quiz_but_admins_can() {
        let fx = fixture(1).await;
        let stranger = HostContext::new(Uuid::new_v4());
        let err = get_quiz(&fx.state, &stranger, fx.quiz.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::AccessDenied(_)));

        let admin = HostContext {
            admin: true,
            ..stranger
        };
        assert!(get_quiz(&fx.state, &admin, fx.quiz.id).await.is_ok());
    }
}
