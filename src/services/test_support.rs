//! Fixtures shared by the service tests.

use std::{sync::Arc, time::SystemTime};

use uuid::Uuid;

use crate::{
    config::AppConfig,
    dao::{
        models::{OptionEntity, QuestionEntity, QuizEntity, SessionMode},
        session_store::{MemorySessionStore, SessionStore},
    },
    dto::{player::JoinRequest, session::CreateSessionRequest, session::SessionView},
    services::host_service,
    state::{AppState, SharedState, context::HostContext},
};

pub(crate) struct Fixture {
    pub state: SharedState,
    pub store: MemorySessionStore,
    pub host: HostContext,
    pub quiz: QuizEntity,
}

/// Two-option quiz whose first option is always the right one.
pub(crate) fn quiz(questions: usize, owner_id: Uuid) -> QuizEntity {
    QuizEntity {
        id: Uuid::new_v4(),
        owner_id,
        title: "Capitals".into(),
        description: None,
        questions: (0..questions)
            .map(|position| QuestionEntity {
                id: Uuid::new_v4(),
                position,
                text: format!("Question {position}"),
                time_limit_secs: 20,
                options: vec![
                    OptionEntity {
                        id: Uuid::new_v4(),
                        text: "Right".into(),
                        is_correct: true,
                    },
                    OptionEntity {
                        id: Uuid::new_v4(),
                        text: "Wrong".into(),
                        is_correct: false,
                    },
                ],
            })
            .collect(),
        created_at: SystemTime::now(),
    }
}

pub(crate) async fn fixture(questions: usize) -> Fixture {
    fixture_with(questions, AppConfig::default()).await
}

pub(crate) async fn fixture_with(questions: usize, config: AppConfig) -> Fixture {
    let state = AppState::new(config);
    let store = MemorySessionStore::new();
    state.install_store(Arc::new(store.clone())).await;

    let host = HostContext::new(Uuid::new_v4());
    let quiz = quiz(questions, host.host_id);
    SessionStore::save_quiz(&store, quiz.clone()).await.unwrap();

    Fixture {
        state,
        store,
        host,
        quiz,
    }
}

impl Fixture {
    pub async fn open_session(&self, mode: SessionMode) -> SessionView {
        host_service::create_session(
            &self.state,
            &self.host,
            CreateSessionRequest {
                quiz_id: self.quiz.id,
                mode,
            },
        )
        .await
        .unwrap()
    }

    pub fn right_option(&self, index: usize) -> Uuid {
        self.quiz.questions[index].options[0].id
    }

    pub fn wrong_option(&self, index: usize) -> Uuid {
        self.quiz.questions[index].options[1].id
    }
}

pub(crate) fn join_request(join_code: &str, name: &str) -> JoinRequest {
    JoinRequest {
        join_code: join_code.into(),
        display_name: name.into(),
        email: None,
        fingerprint: None,
    }
}
