use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
};

use futures::future::BoxFuture;
use indexmap::IndexMap;
use thiserror::Error;
use tokio::sync::{RwLock, broadcast};
use uuid::Uuid;

use crate::dao::{
    change_feed::ChangeFeed,
    models::{
        AnswerEntity, JoinRecordEntity, PlayerEntity, QuizEntity, SessionEntity, SessionStatus,
        StoreChange,
    },
    session_store::SessionStore,
    storage::{StorageError, StorageResult},
};

#[derive(Debug, Error)]
enum MemoryStoreError {
    #[error("simulated outage")]
    SimulatedOutage,
    #[error("{entity} `{id}` does not exist")]
    Missing { entity: &'static str, id: Uuid },
}

/// Process-local store used when no database is configured and by the test suite.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    tables: RwLock<Tables>,
    feed: ChangeFeed,
    pending_failures: AtomicU32,
    join_record_failures: AtomicU32,
    lost_answer_acks: AtomicU32,
}

fn take_failure(counter: &AtomicU32) -> StorageResult<()> {
    let consumed = counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
        remaining.checked_sub(1)
    });
    match consumed {
        Ok(_) => Err(StorageError::unavailable(
            "memory store outage".into(),
            MemoryStoreError::SimulatedOutage,
        )),
        Err(_) => Ok(()),
    }
}

#[derive(Default)]
struct Tables {
    quizzes: HashMap<Uuid, QuizEntity>,
    sessions: IndexMap<Uuid, SessionEntity>,
    players: IndexMap<Uuid, PlayerEntity>,
    answers: Vec<AnswerEntity>,
    join_records: Vec<JoinRecordEntity>,
}

impl MemorySessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` calls fail with a transient error.
    ///
    /// Used to exercise the retry paths of the services.
    pub fn fail_next_operations(&self, count: u32) {
        self.inner.pending_failures.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` join record writes fail while other calls succeed.
    pub fn fail_join_record_writes(&self, count: u32) {
        self.inner.join_record_failures.store(count, Ordering::SeqCst);
    }

    /// Apply the next `count` answer inserts but report them as failed, like a
    /// write whose acknowledgement was lost.
    pub fn lose_answer_acks(&self, count: u32) {
        self.inner.lost_answer_acks.store(count, Ordering::SeqCst);
    }

    fn check_outage(&self) -> StorageResult<()> {
        take_failure(&self.inner.pending_failures)
    }

    async fn insert_session(&self, session: SessionEntity) -> StorageResult<()> {
        self.check_outage()?;
        let mut tables = self.inner.tables.write().await;
        tables.sessions.insert(session.id, session);
        Ok(())
    }

    async fn update_session(&self, session: SessionEntity) -> StorageResult<()> {
        self.check_outage()?;
        {
            let mut tables = self.inner.tables.write().await;
            let slot = tables.sessions.get_mut(&session.id).ok_or_else(|| {
                StorageError::unavailable(
                    "cannot update session".into(),
                    MemoryStoreError::Missing {
                        entity: "session",
                        id: session.id,
                    },
                )
            })?;
            *slot = session.clone();
        }
        self.inner
            .feed
            .notify(session.id, StoreChange::SessionUpdated(session));
        Ok(())
    }

    async fn find_session_by_code(&self, code: String) -> StorageResult<Option<SessionEntity>> {
        self.check_outage()?;
        let tables = self.inner.tables.read().await;
        Ok(tables
            .sessions
            .values()
            .filter(|session| session.join_code == code)
            .max_by_key(|session| session.created_at)
            .cloned())
    }

    async fn join_code_in_use(&self, code: String) -> StorageResult<bool> {
        self.check_outage()?;
        let tables = self.inner.tables.read().await;
        Ok(tables
            .sessions
            .values()
            .any(|session| session.join_code == code && session.status != SessionStatus::Completed))
    }

    async fn insert_player(&self, player: PlayerEntity) -> StorageResult<()> {
        self.check_outage()?;
        {
            let mut tables = self.inner.tables.write().await;
            tables.players.insert(player.id, player.clone());
        }
        self.inner
            .feed
            .notify(player.session_id, StoreChange::PlayerInserted(player));
        Ok(())
    }

    async fn update_player(&self, player: PlayerEntity) -> StorageResult<()> {
        self.check_outage()?;
        {
            let mut tables = self.inner.tables.write().await;
            let slot = tables.players.get_mut(&player.id).ok_or_else(|| {
                StorageError::unavailable(
                    "cannot update player".into(),
                    MemoryStoreError::Missing {
                        entity: "player",
                        id: player.id,
                    },
                )
            })?;
            *slot = player.clone();
        }
        self.inner
            .feed
            .notify(player.session_id, StoreChange::PlayerUpdated(player));
        Ok(())
    }

    async fn insert_answer(&self, answer: AnswerEntity) -> StorageResult<()> {
        self.check_outage()?;
        {
            let mut tables = self.inner.tables.write().await;
            tables.answers.push(answer.clone());
        }
        self.inner
            .feed
            .notify(answer.session_id, StoreChange::AnswerInserted(answer));
        take_failure(&self.inner.lost_answer_acks)
    }
}

impl SessionStore for MemorySessionStore {
    fn save_quiz(&self, quiz: QuizEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.check_outage()?;
            store.inner.tables.write().await.quizzes.insert(quiz.id, quiz);
            Ok(())
        })
    }

    fn find_quiz(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<QuizEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store.check_outage()?;
            Ok(store.inner.tables.read().await.quizzes.get(&id).cloned())
        })
    }

    fn insert_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.insert_session(session).await })
    }

    fn update_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.update_session(session).await })
    }

    fn find_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store.check_outage()?;
            Ok(store.inner.tables.read().await.sessions.get(&id).cloned())
        })
    }

    fn find_session_by_code(
        &self,
        code: String,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_session_by_code(code).await })
    }

    fn join_code_in_use(&self, code: String) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { store.join_code_in_use(code).await })
    }

    fn insert_player(&self, player: PlayerEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.insert_player(player).await })
    }

    fn update_player(&self, player: PlayerEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.update_player(player).await })
    }

    fn delete_player(
        &self,
        session_id: Uuid,
        player_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.check_outage()?;
            let mut tables = store.inner.tables.write().await;
            if tables
                .players
                .get(&player_id)
                .is_some_and(|player| player.session_id == session_id)
            {
                tables.players.shift_remove(&player_id);
            }
            Ok(())
        })
    }

    fn find_player(
        &self,
        session_id: Uuid,
        player_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<PlayerEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store.check_outage()?;
            let tables = store.inner.tables.read().await;
            Ok(tables
                .players
                .get(&player_id)
                .filter(|player| player.session_id == session_id)
                .cloned())
        })
    }

    fn list_players(&self, session_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<PlayerEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store.check_outage()?;
            let tables = store.inner.tables.read().await;
            Ok(tables
                .players
                .values()
                .filter(|player| player.session_id == session_id)
                .cloned()
                .collect())
        })
    }

    fn insert_answer(&self, answer: AnswerEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.insert_answer(answer).await })
    }

    fn find_answer(
        &self,
        session_id: Uuid,
        player_id: Uuid,
        question_index: usize,
    ) -> BoxFuture<'static, StorageResult<Option<AnswerEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store.check_outage()?;
            let tables = store.inner.tables.read().await;
            Ok(tables
                .answers
                .iter()
                .find(|answer| {
                    answer.session_id == session_id
                        && answer.player_id == player_id
                        && answer.question_index == question_index
                })
                .cloned())
        })
    }

    fn list_answers(&self, session_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<AnswerEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store.check_outage()?;
            let tables = store.inner.tables.read().await;
            Ok(tables
                .answers
                .iter()
                .filter(|answer| answer.session_id == session_id)
                .cloned()
                .collect())
        })
    }

    fn insert_join_record(
        &self,
        record: JoinRecordEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.check_outage()?;
            take_failure(&store.inner.join_record_failures)?;
            store.inner.tables.write().await.join_records.push(record);
            Ok(())
        })
    }

    fn list_join_records(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<JoinRecordEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store.check_outage()?;
            let tables = store.inner.tables.read().await;
            Ok(tables
                .join_records
                .iter()
                .filter(|record| record.session_id == session_id)
                .cloned()
                .collect())
        })
    }

    fn list_join_records_by_address(
        &self,
        address: String,
    ) -> BoxFuture<'static, StorageResult<Vec<JoinRecordEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store.check_outage()?;
            let tables = store.inner.tables.read().await;
            Ok(tables
                .join_records
                .iter()
                .filter(|record| record.address.as_deref() == Some(address.as_str()))
                .cloned()
                .collect())
        })
    }

    fn subscribe_changes(&self, session_id: Uuid) -> broadcast::Receiver<StoreChange> {
        self.inner.feed.subscribe(session_id)
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.check_outage() })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.check_outage() })
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::*;
    use crate::dao::models::{QuestionCursor, SessionMode};

    fn session(code: &str, status: SessionStatus) -> SessionEntity {
        let now = SystemTime::now();
        SessionEntity {
            id: Uuid::new_v4(),
            quiz_id: Uuid::new_v4(),
            host_id: Uuid::new_v4(),
            join_code: code.into(),
            mode: SessionMode::Live,
            status,
            cursor: QuestionCursor::NotStarted,
            question_deadline: None,
            accepting_joins: true,
            created_at: now,
            updated_at: now,
            started_at: None,
            ended_at: None,
        }
    }

    #[tokio::test]
    async fn join_code_in_use_ignores_completed_sessions() {
        let store = MemorySessionStore::new();
        SessionStore::insert_session(&store, session("123456", SessionStatus::Completed))
            .await
            .unwrap();
        assert!(!SessionStore::join_code_in_use(&store, "123456".into()).await.unwrap());

        SessionStore::insert_session(&store, session("123456", SessionStatus::Waiting))
            .await
            .unwrap();
        assert!(SessionStore::join_code_in_use(&store, "123456".into()).await.unwrap());
    }

    #[tokio::test]
    async fn updates_are_published_to_session_subscribers() {
        let store = MemorySessionStore::new();
        let mut row = session("654321", SessionStatus::Waiting);
        SessionStore::insert_session(&store, row.clone()).await.unwrap();

        let mut changes = store.subscribe_changes(row.id);
        row.status = SessionStatus::Active;
        SessionStore::update_session(&store, row.clone()).await.unwrap();

        match changes.recv().await.unwrap() {
            StoreChange::SessionUpdated(updated) => assert_eq!(updated.status, SessionStatus::Active),
            other => panic!("unexpected change {other:?}"),
        }
    }

    #[tokio::test]
    async fn simulated_outage_fails_requested_number_of_calls() {
        let store = MemorySessionStore::new();
        store.fail_next_operations(2);
        assert!(SessionStore::find_session(&store, Uuid::new_v4()).await.is_err());
        assert!(SessionStore::find_session(&store, Uuid::new_v4()).await.is_err());
        assert!(SessionStore::find_session(&store, Uuid::new_v4()).await.is_ok());
    }
}
