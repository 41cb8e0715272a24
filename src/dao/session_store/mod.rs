pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use futures::future::BoxFuture;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::dao::models::{
    AnswerEntity, JoinRecordEntity, PlayerEntity, QuizEntity, SessionEntity, StoreChange,
};
use crate::dao::storage::StorageResult;

pub use memory::MemorySessionStore;

/// Abstraction over the persistence layer for quizzes, sessions, players and answers.
///
/// Stores offer point reads and writes plus a change subscription filtered by
/// session id. They do not enforce the one-answer-per-question rule; callers
/// check [`SessionStore::find_answer`] before inserting.
pub trait SessionStore: Send + Sync {
    fn save_quiz(&self, quiz: QuizEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn find_quiz(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<QuizEntity>>>;

    fn insert_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn update_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn find_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>>;
    /// Most recently created session using `code`, terminal or not.
    fn find_session_by_code(
        &self,
        code: String,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>>;
    /// Whether a non-terminal session currently uses `code`.
    fn join_code_in_use(&self, code: String) -> BoxFuture<'static, StorageResult<bool>>;

    fn insert_player(&self, player: PlayerEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn update_player(&self, player: PlayerEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Remove a player row; removing an absent row succeeds.
    fn delete_player(&self, session_id: Uuid, player_id: Uuid)
    -> BoxFuture<'static, StorageResult<()>>;
    fn find_player(
        &self,
        session_id: Uuid,
        player_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<PlayerEntity>>>;
    /// Players of a session in join order.
    fn list_players(&self, session_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<PlayerEntity>>>;

    fn insert_answer(&self, answer: AnswerEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn find_answer(
        &self,
        session_id: Uuid,
        player_id: Uuid,
        question_index: usize,
    ) -> BoxFuture<'static, StorageResult<Option<AnswerEntity>>>;
    /// Answers of a session in submission order.
    fn list_answers(&self, session_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<AnswerEntity>>>;

    fn insert_join_record(&self, record: JoinRecordEntity)
    -> BoxFuture<'static, StorageResult<()>>;
    fn list_join_records(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<JoinRecordEntity>>>;
    fn list_join_records_by_address(
        &self,
        address: String,
    ) -> BoxFuture<'static, StorageResult<Vec<JoinRecordEntity>>>;

    /// Subscribe to row changes concerning one session.
    fn subscribe_changes(&self, session_id: Uuid) -> broadcast::Receiver<StoreChange>;

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
