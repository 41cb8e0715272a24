//! End-to-end session scenarios against the in-memory store and channel hub.

use std::{sync::Arc, time::SystemTime};

use futures::{Stream, StreamExt};
use live_quiz_back::{
    config::AppConfig,
    dao::{
        models::{OptionEntity, QuestionEntity, QuizEntity, SessionMode, SessionStatus},
        session_store::{MemorySessionStore, SessionStore},
    },
    dto::{
        events::SessionEvent,
        player::{JoinRequest, ProgressPhase},
        session::{CreateSessionRequest, SessionView},
    },
    error::{JoinRejection, ServiceError},
    services::{
        host_service,
        participant::{ParticipantClient, ParticipantPhase, SubmitOutcome},
        player_service, self_paced,
    },
    state::{
        AppState, SharedState,
        context::{HostContext, JoinContext},
    },
};
use uuid::Uuid;

struct World {
    state: SharedState,
    store: MemorySessionStore,
    host: HostContext,
    quiz: QuizEntity,
}

impl World {
    async fn new(questions: usize) -> Self {
        let state = AppState::new(AppConfig::default());
        let store = MemorySessionStore::new();
        state.install_store(Arc::new(store.clone())).await;

        let host = HostContext::new(Uuid::new_v4());
        let quiz = QuizEntity {
            id: Uuid::new_v4(),
            owner_id: host.host_id,
            title: "Planets".into(),
            description: Some("Warm-up round".into()),
            questions: (0..questions)
                .map(|position| QuestionEntity {
                    id: Uuid::new_v4(),
                    position,
                    text: format!("Planet question {position}"),
                    time_limit_secs: 15,
                    options: ["A", "B"]
                        .iter()
                        .enumerate()
                        .map(|(idx, text)| OptionEntity {
                            id: Uuid::new_v4(),
                            text: (*text).into(),
                            is_correct: idx == 0,
                        })
                        .collect(),
                })
                .collect(),
            created_at: SystemTime::now(),
        };
        store.save_quiz(quiz.clone()).await.unwrap();

        Self {
            state,
            store,
            host,
            quiz,
        }
    }

    async fn open(&self, mode: SessionMode) -> SessionView {
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

    fn option(&self, question: usize, label: usize) -> Uuid {
        self.quiz.questions[question].options[label].id
    }
}

fn join_request(code: &str, name: &str, email: Option<&str>) -> JoinRequest {
    JoinRequest {
        join_code: code.into(),
        display_name: name.into(),
        email: email.map(str::to_owned),
        fingerprint: None,
    }
}

async fn next_matching<S>(events: &mut S, wanted: impl Fn(&SessionEvent) -> bool) -> SessionEvent
where
    S: Stream<Item = SessionEvent> + Unpin,
{
    loop {
        let event = events.next().await.expect("channel closed early");
        if wanted(&event) {
            return event;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn happy_path_live_quiz() {
    let world = World::new(1).await;
    let session = world.open(SessionMode::Live).await;
    let mut host_events = Box::pin(world.state.hub().stream(session.id));

    let mut players = Vec::new();
    for name in ["Player 1", "Player 2"] {
        let mut client = ParticipantClient::new(world.state.clone());
        client
            .join(join_request(&session.join_code, name, None), JoinContext::default())
            .await
            .unwrap();
        players.push(client);
    }

    host_service::start(&world.state, &world.host, session.id)
        .await
        .unwrap();
    let started = next_matching(&mut host_events, |event| {
        matches!(event, SessionEvent::QuestionStarted { .. })
    })
    .await;
    for client in players.iter_mut() {
        client.handle_event(started.clone()).await.unwrap();
        assert!(matches!(
            client.phase(),
            ParticipantPhase::QuestionVisible { index: 0, .. }
        ));
    }

    let first = players[0].submit_answer(world.option(0, 0)).await.unwrap();
    let second = players[1].submit_answer(world.option(0, 1)).await.unwrap();
    assert!(matches!(first, SubmitOutcome::Accepted(_)));
    assert!(matches!(second, SubmitOutcome::Accepted(_)));

    let tally = host_service::close_question(&world.state, &world.host, session.id)
        .await
        .unwrap();
    assert_eq!(tally.total, 2);
    let counts: Vec<_> = tally
        .options
        .iter()
        .map(|option| (option.count, option.percentage))
        .collect();
    assert_eq!(counts, vec![(1, 50), (1, 50)]);

    host_service::end(&world.state, &world.host, session.id)
        .await
        .unwrap();
    let ended = next_matching(&mut host_events, SessionEvent::is_terminal).await;
    let SessionEvent::SessionEnded { ref leaderboard } = ended else {
        panic!("expected session_ended, got {ended:?}");
    };
    assert_eq!(leaderboard[0].display_name, "Player 1");
    assert_eq!(leaderboard[0].score, 100);
    assert_eq!(leaderboard[1].score, 0);

    for client in players.iter_mut() {
        client.handle_event(ended.clone()).await.unwrap();
        assert_eq!(client.phase(), ParticipantPhase::Ended);
    }
}

#[tokio::test(start_paused = true)]
async fn timeout_without_answer_leaves_no_trace() {
    let world = World::new(2).await;
    let session = world.open(SessionMode::Live).await;
    let mut events = Box::pin(world.state.hub().stream(session.id));
    let joined = player_service::join(
        &world.state,
        join_request(&session.join_code, "Quiet", None),
        JoinContext::default(),
    )
    .await
    .unwrap();

    host_service::start(&world.state, &world.host, session.id)
        .await
        .unwrap();
    let closed = next_matching(&mut events, |event| {
        matches!(event, SessionEvent::QuestionClosed { .. })
    })
    .await;
    let SessionEvent::QuestionClosed {
        question_index,
        tally,
    } = closed
    else {
        unreachable!()
    };
    assert_eq!(question_index, 0);
    assert_eq!(tally.total, 0);
    assert!(tally.options.iter().all(|option| option.percentage == 0));

    assert!(world.store.list_answers(session.id).await.unwrap().is_empty());
    let view = player_service::player_view(&world.state, session.id, joined.player_id)
        .await
        .unwrap();
    assert_eq!(view.score, 0);
    assert!(!view.question_open);
}

#[tokio::test(start_paused = true)]
async fn cursor_only_moves_forward() {
    let world = World::new(3).await;
    let session = world.open(SessionMode::Poll).await;
    player_service::join(
        &world.state,
        join_request(&session.join_code, "Watcher", None),
        JoinContext::default(),
    )
    .await
    .unwrap();
    let mut events = Box::pin(world.state.hub().stream(session.id));

    host_service::start(&world.state, &world.host, session.id)
        .await
        .unwrap();
    let mut seen = Vec::new();
    loop {
        let event = events.next().await.expect("channel closed early");
        match event {
            SessionEvent::QuestionStarted { question } => seen.push(question.question_index),
            SessionEvent::QuestionClosed { question_index, .. } => {
                if question_index + 1 == world.quiz.questions.len() {
                    break;
                }
                host_service::next(&world.state, &world.host, session.id)
                    .await
                    .unwrap();
            }
            _ => {}
        }
    }
    assert_eq!(seen, vec![0, 1, 2]);

    let err = host_service::next(&world.state, &world.host, session.id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidState(_)));
}

#[tokio::test(start_paused = true)]
async fn late_self_paced_join_starts_at_question_zero() {
    let world = World::new(3).await;
    let session = world.open(SessionMode::SelfPaced).await;
    let early = player_service::join(
        &world.state,
        join_request(&session.join_code, "Early", Some("early@example.org")),
        JoinContext {
            address: Some("198.51.100.1".into()),
            fingerprint: Some("device-early".into()),
        },
    )
    .await
    .unwrap();

    host_service::start(&world.state, &world.host, session.id)
        .await
        .unwrap();
    self_paced::answer(
        &world.state,
        session.id,
        early.player_id,
        live_quiz_back::dto::player::SelfPacedAnswerRequest {
            question_index: 0,
            option_id: world.option(0, 0),
        },
    )
    .await
    .unwrap();

    let late = player_service::join(
        &world.state,
        join_request(&session.join_code, "Late", Some("late@example.org")),
        JoinContext {
            address: Some("198.51.100.2".into()),
            fingerprint: Some("device-late".into()),
        },
    )
    .await
    .unwrap();
    assert_eq!(late.status, SessionStatus::Active);

    let progress = self_paced::progress(&world.state, session.id, late.player_id)
        .await
        .unwrap();
    assert_eq!(progress.phase, ProgressPhase::Question);
    assert_eq!(
        progress.question.map(|question| question.question_index),
        Some(0)
    );
}

#[tokio::test(start_paused = true)]
async fn duplicate_network_join_is_rejected_without_a_player_row() {
    let world = World::new(2).await;
    let session = world.open(SessionMode::SelfPaced).await;
    let ctx = JoinContext {
        address: Some("203.0.113.50".into()),
        fingerprint: None,
    };

    player_service::join(
        &world.state,
        join_request(&session.join_code, "First", Some("first@example.org")),
        ctx.clone(),
    )
    .await
    .unwrap();
    let err = player_service::join(
        &world.state,
        join_request(&session.join_code, "Second", Some("second@example.org")),
        ctx,
    )
    .await
    .unwrap_err();

    match err {
        ServiceError::JoinRejected(reason) => {
            assert_eq!(reason, JoinRejection::DuplicateNetwork);
            assert!(!reason.user_message().is_empty());
        }
        other => panic!("expected a join rejection, got {other:?}"),
    }
    let players = world.store.list_players(session.id).await.unwrap();
    assert_eq!(players.len(), 1);
}
