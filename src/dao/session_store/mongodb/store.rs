use std::sync::Arc;

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Client, Collection, Database, IndexModel,
    bson::doc,
    options::IndexOptions,
};
use tokio::sync::{RwLock, broadcast};
use uuid::Uuid;

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult},
    models::{
        ANSWER_COLLECTION, JOIN_RECORD_COLLECTION, MongoAnswerDocument, MongoJoinRecordDocument,
        MongoPlayerDocument, MongoQuizDocument, MongoSessionDocument, PLAYER_COLLECTION,
        QUIZ_COLLECTION, SESSION_COLLECTION, doc_id, uuid_as_binary,
    },
};
use crate::dao::{
    change_feed::ChangeFeed,
    models::{
        AnswerEntity, JoinRecordEntity, PlayerEntity, QuizEntity, SessionEntity, StoreChange,
    },
    session_store::SessionStore,
    storage::StorageResult,
};

/// MongoDB-backed [`SessionStore`].
///
/// Change notifications are emitted by this process after each successful
/// write; writes made by other processes are picked up by the periodic
/// reconciliation of the session controllers.
#[derive(Clone)]
pub struct MongoSessionStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
    feed: ChangeFeed,
}

struct MongoState {
    #[allow(dead_code)]
    client: Client,
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) =
            establish_connection(&self.config).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

async fn collect_all<D, E>(
    collection: &'static str,
    cursor: mongodb::Cursor<D>,
) -> MongoResult<Vec<E>>
where
    D: serde::de::DeserializeOwned + Send + Sync + Unpin,
    E: TryFrom<D, Error = MongoDaoError>,
{
    let documents: Vec<D> = cursor
        .try_collect()
        .await
        .map_err(|source| MongoDaoError::Read { collection, source })?;
    documents.into_iter().map(E::try_from).collect()
}

impl MongoSessionStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) =
            establish_connection(&config).await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState { client, database }),
            config,
            feed: ChangeFeed::default(),
        });

        let store = Self { inner };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let database = self.database().await;
        let specs: [(&'static str, &'static str, mongodb::bson::Document, bool); 4] = [
            (SESSION_COLLECTION, "join_code", doc! {"join_code": 1}, false),
            (PLAYER_COLLECTION, "session_id", doc! {"session_id": 1, "joined_at": 1}, false),
            (
                ANSWER_COLLECTION,
                "session_id,player_id,question_index",
                doc! {"session_id": 1, "player_id": 1, "question_index": 1},
                false,
            ),
            (JOIN_RECORD_COLLECTION, "address", doc! {"address": 1}, false),
        ];

        for (collection, index, keys, unique) in specs {
            let model = IndexModel::builder()
                .keys(keys)
                .options(
                    IndexOptions::builder()
                        .name(Some(format!("{collection}_{}_idx", index.replace(',', "_"))))
                        .unique(Some(unique))
                        .build(),
                )
                .build();
            database
                .collection::<mongodb::bson::Document>(collection)
                .create_index(model)
                .await
                .map_err(|source| MongoDaoError::EnsureIndex {
                    collection,
                    index,
                    source,
                })?;
        }

        Ok(())
    }

    async fn database(&self) -> Database {
        let guard = self.inner.state.read().await;
        guard.database.clone()
    }

    async fn collection<T: Send + Sync>(&self, name: &str) -> Collection<T> {
        let guard = self.inner.state.read().await;
        guard.database.collection::<T>(name)
    }

    async fn save_quiz(&self, quiz: QuizEntity) -> MongoResult<()> {
        let id = quiz.id;
        let document: MongoQuizDocument = quiz.into();
        self.collection::<MongoQuizDocument>(QUIZ_COLLECTION)
            .await
            .replace_one(doc_id(id), &document)
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::Write {
                collection: QUIZ_COLLECTION,
                source,
            })?;
        Ok(())
    }

    async fn find_quiz(&self, id: Uuid) -> MongoResult<Option<QuizEntity>> {
        let document = self
            .collection::<MongoQuizDocument>(QUIZ_COLLECTION)
            .await
            .find_one(doc_id(id))
            .await
            .map_err(|source| MongoDaoError::Read {
                collection: QUIZ_COLLECTION,
                source,
            })?;
        document.map(QuizEntity::try_from).transpose()
    }

    async fn insert_session(&self, session: SessionEntity) -> MongoResult<()> {
        let document: MongoSessionDocument = session.into();
        self.collection::<MongoSessionDocument>(SESSION_COLLECTION)
            .await
            .insert_one(&document)
            .await
            .map_err(|source| MongoDaoError::Write {
                collection: SESSION_COLLECTION,
                source,
            })?;
        Ok(())
    }

    async fn update_session(&self, session: SessionEntity) -> MongoResult<()> {
        let id = session.id;
        let document: MongoSessionDocument = session.clone().into();
        self.collection::<MongoSessionDocument>(SESSION_COLLECTION)
            .await
            .replace_one(doc_id(id), &document)
            .await
            .map_err(|source| MongoDaoError::Write {
                collection: SESSION_COLLECTION,
                source,
            })?;
        self.inner
            .feed
            .notify(id, StoreChange::SessionUpdated(session));
        Ok(())
    }

    async fn find_session(&self, id: Uuid) -> MongoResult<Option<SessionEntity>> {
        let document = self
            .collection::<MongoSessionDocument>(SESSION_COLLECTION)
            .await
            .find_one(doc_id(id))
            .await
            .map_err(|source| MongoDaoError::Read {
                collection: SESSION_COLLECTION,
                source,
            })?;
        document.map(SessionEntity::try_from).transpose()
    }

    async fn find_session_by_code(&self, code: String) -> MongoResult<Option<SessionEntity>> {
        let document = self
            .collection::<MongoSessionDocument>(SESSION_COLLECTION)
            .await
            .find_one(doc! {"join_code": code})
            .sort(doc! {"created_at": -1})
            .await
            .map_err(|source| MongoDaoError::Read {
                collection: SESSION_COLLECTION,
                source,
            })?;
        document.map(SessionEntity::try_from).transpose()
    }

    async fn join_code_in_use(&self, code: String) -> MongoResult<bool> {
        let count = self
            .collection::<MongoSessionDocument>(SESSION_COLLECTION)
            .await
            .count_documents(doc! {"join_code": code, "status": {"$ne": "completed"}})
            .await
            .map_err(|source| MongoDaoError::Read {
                collection: SESSION_COLLECTION,
                source,
            })?;
        Ok(count > 0)
    }

    async fn insert_player(&self, player: PlayerEntity) -> MongoResult<()> {
        let document: MongoPlayerDocument = player.clone().into();
        self.collection::<MongoPlayerDocument>(PLAYER_COLLECTION)
            .await
            .insert_one(&document)
            .await
            .map_err(|source| MongoDaoError::Write {
                collection: PLAYER_COLLECTION,
                source,
            })?;
        self.inner
            .feed
            .notify(player.session_id, StoreChange::PlayerInserted(player));
        Ok(())
    }

    async fn update_player(&self, player: PlayerEntity) -> MongoResult<()> {
        let document: MongoPlayerDocument = player.clone().into();
        self.collection::<MongoPlayerDocument>(PLAYER_COLLECTION)
            .await
            .replace_one(doc_id(player.id), &document)
            .await
            .map_err(|source| MongoDaoError::Write {
                collection: PLAYER_COLLECTION,
                source,
            })?;
        self.inner
            .feed
            .notify(player.session_id, StoreChange::PlayerUpdated(player));
        Ok(())
    }

    async fn delete_player(&self, session_id: Uuid, player_id: Uuid) -> MongoResult<()> {
        self.collection::<MongoPlayerDocument>(PLAYER_COLLECTION)
            .await
            .delete_one(doc! {
                "_id": uuid_as_binary(player_id),
                "session_id": uuid_as_binary(session_id),
            })
            .await
            .map_err(|source| MongoDaoError::Write {
                collection: PLAYER_COLLECTION,
                source,
            })?;
        Ok(())
    }

    async fn find_player(&self, session_id: Uuid, player_id: Uuid) -> MongoResult<Option<PlayerEntity>> {
        let document = self
            .collection::<MongoPlayerDocument>(PLAYER_COLLECTION)
            .await
            .find_one(doc! {
                "_id": uuid_as_binary(player_id),
                "session_id": uuid_as_binary(session_id),
            })
            .await
            .map_err(|source| MongoDaoError::Read {
                collection: PLAYER_COLLECTION,
                source,
            })?;
        document.map(PlayerEntity::try_from).transpose()
    }

    async fn list_players(&self, session_id: Uuid) -> MongoResult<Vec<PlayerEntity>> {
        let cursor = self
            .collection::<MongoPlayerDocument>(PLAYER_COLLECTION)
            .await
            .find(doc! {"session_id": uuid_as_binary(session_id)})
            .sort(doc! {"joined_at": 1})
            .await
            .map_err(|source| MongoDaoError::Read {
                collection: PLAYER_COLLECTION,
                source,
            })?;
        collect_all(PLAYER_COLLECTION, cursor).await
    }

    async fn insert_answer(&self, answer: AnswerEntity) -> MongoResult<()> {
        let document: MongoAnswerDocument = answer.clone().into();
        self.collection::<MongoAnswerDocument>(ANSWER_COLLECTION)
            .await
            .insert_one(&document)
            .await
            .map_err(|source| MongoDaoError::Write {
                collection: ANSWER_COLLECTION,
                source,
            })?;
        self.inner
            .feed
            .notify(answer.session_id, StoreChange::AnswerInserted(answer));
        Ok(())
    }

    async fn find_answer(
        &self,
        session_id: Uuid,
        player_id: Uuid,
        question_index: usize,
    ) -> MongoResult<Option<AnswerEntity>> {
        let document = self
            .collection::<MongoAnswerDocument>(ANSWER_COLLECTION)
            .await
            .find_one(doc! {
                "session_id": uuid_as_binary(session_id),
                "player_id": uuid_as_binary(player_id),
                "question_index": question_index as i64,
            })
            .sort(doc! {"submitted_at": 1})
            .await
            .map_err(|source| MongoDaoError::Read {
                collection: ANSWER_COLLECTION,
                source,
            })?;
        document.map(AnswerEntity::try_from).transpose()
    }

    async fn list_answers(&self, session_id: Uuid) -> MongoResult<Vec<AnswerEntity>> {
        let cursor = self
            .collection::<MongoAnswerDocument>(ANSWER_COLLECTION)
            .await
            .find(doc! {"session_id": uuid_as_binary(session_id)})
            .sort(doc! {"submitted_at": 1})
            .await
            .map_err(|source| MongoDaoError::Read {
                collection: ANSWER_COLLECTION,
                source,
            })?;
        collect_all(ANSWER_COLLECTION, cursor).await
    }

    async fn insert_join_record(&self, record: JoinRecordEntity) -> MongoResult<()> {
        let document: MongoJoinRecordDocument = record.into();
        self.collection::<MongoJoinRecordDocument>(JOIN_RECORD_COLLECTION)
            .await
            .insert_one(&document)
            .await
            .map_err(|source| MongoDaoError::Write {
                collection: JOIN_RECORD_COLLECTION,
                source,
            })?;
        Ok(())
    }

    async fn list_join_records(&self, filter: mongodb::bson::Document) -> MongoResult<Vec<JoinRecordEntity>> {
        let cursor = self
            .collection::<MongoJoinRecordDocument>(JOIN_RECORD_COLLECTION)
            .await
            .find(filter)
            .await
            .map_err(|source| MongoDaoError::Read {
                collection: JOIN_RECORD_COLLECTION,
                source,
            })?;
        collect_all(JOIN_RECORD_COLLECTION, cursor).await
    }
}

impl SessionStore for MongoSessionStore {
    fn save_quiz(&self, quiz: QuizEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.save_quiz(quiz).await.map_err(Into::into) })
    }

    fn find_quiz(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<QuizEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_quiz(id).await.map_err(Into::into) })
    }

    fn insert_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.insert_session(session).await.map_err(Into::into) })
    }

    fn update_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.update_session(session).await.map_err(Into::into) })
    }

    fn find_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_session(id).await.map_err(Into::into) })
    }

    fn find_session_by_code(
        &self,
        code: String,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_session_by_code(code).await.map_err(Into::into) })
    }

    fn join_code_in_use(&self, code: String) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { store.join_code_in_use(code).await.map_err(Into::into) })
    }

    fn insert_player(&self, player: PlayerEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.insert_player(player).await.map_err(Into::into) })
    }

    fn update_player(&self, player: PlayerEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.update_player(player).await.map_err(Into::into) })
    }

    fn delete_player(
        &self,
        session_id: Uuid,
        player_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .delete_player(session_id, player_id)
                .await
                .map_err(Into::into)
        })
    }

    fn find_player(
        &self,
        session_id: Uuid,
        player_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<PlayerEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_player(session_id, player_id)
                .await
                .map_err(Into::into)
        })
    }

    fn list_players(&self, session_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<PlayerEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_players(session_id).await.map_err(Into::into) })
    }

    fn insert_answer(&self, answer: AnswerEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.insert_answer(answer).await.map_err(Into::into) })
    }

    fn find_answer(
        &self,
        session_id: Uuid,
        player_id: Uuid,
        question_index: usize,
    ) -> BoxFuture<'static, StorageResult<Option<AnswerEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_answer(session_id, player_id, question_index)
                .await
                .map_err(Into::into)
        })
    }

    fn list_answers(&self, session_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<AnswerEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_answers(session_id).await.map_err(Into::into) })
    }

    fn insert_join_record(
        &self,
        record: JoinRecordEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.insert_join_record(record).await.map_err(Into::into) })
    }

    fn list_join_records(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<JoinRecordEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .list_join_records(doc! {"session_id": uuid_as_binary(session_id)})
                .await
                .map_err(Into::into)
        })
    }

    fn list_join_records_by_address(
        &self,
        address: String,
    ) -> BoxFuture<'static, StorageResult<Vec<JoinRecordEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .list_join_records(doc! {"address": address})
                .await
                .map_err(Into::into)
        })
    }

    fn subscribe_changes(&self, session_id: Uuid) -> broadcast::Receiver<StoreChange> {
        self.inner.feed.subscribe(session_id)
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
