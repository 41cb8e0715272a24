use std::time::SystemTime;

use mongodb::bson::{Binary, DateTime, Document, doc, spec::BinarySubtype};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dao::models::{
    AnswerEntity, JoinRecordEntity, PlayerEntity, PlayerProgress, QuestionCursor, QuestionEntity,
    QuizEntity, SessionEntity, SessionMode, SessionStatus,
};

use super::error::{MongoDaoError, MongoResult};

pub const QUIZ_COLLECTION: &str = "quizzes";
pub const SESSION_COLLECTION: &str = "sessions";
pub const PLAYER_COLLECTION: &str = "players";
pub const ANSWER_COLLECTION: &str = "answers";
pub const JOIN_RECORD_COLLECTION: &str = "join_records";

pub fn uuid_as_binary(id: Uuid) -> Binary {
    Binary {
        subtype: BinarySubtype::Uuid,
        bytes: id.into_bytes().to_vec(),
    }
}

pub fn doc_id(id: Uuid) -> Document {
    doc! {"_id": uuid_as_binary(id)}
}

fn binary_as_uuid(collection: &'static str, binary: &Binary) -> MongoResult<Uuid> {
    Uuid::from_slice(&binary.bytes).map_err(|err| MongoDaoError::Decode {
        collection,
        reason: err.to_string(),
    })
}

fn opt_time(value: Option<SystemTime>) -> Option<DateTime> {
    value.map(DateTime::from_system_time)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoQuizDocument {
    #[serde(rename = "_id")]
    id: Binary,
    owner_id: Binary,
    title: String,
    description: Option<String>,
    questions: Vec<QuestionEntity>,
    created_at: DateTime,
}

impl From<QuizEntity> for MongoQuizDocument {
    fn from(value: QuizEntity) -> Self {
        Self {
            id: uuid_as_binary(value.id),
            owner_id: uuid_as_binary(value.owner_id),
            title: value.title,
            description: value.description,
            questions: value.questions,
            created_at: DateTime::from_system_time(value.created_at),
        }
    }
}

impl TryFrom<MongoQuizDocument> for QuizEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoQuizDocument) -> MongoResult<Self> {
        Ok(Self {
            id: binary_as_uuid(QUIZ_COLLECTION, &value.id)?,
            owner_id: binary_as_uuid(QUIZ_COLLECTION, &value.owner_id)?,
            title: value.title,
            description: value.description,
            questions: value.questions,
            created_at: value.created_at.to_system_time(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoSessionDocument {
    #[serde(rename = "_id")]
    id: Binary,
    quiz_id: Binary,
    host_id: Binary,
    join_code: String,
    mode: SessionMode,
    status: SessionStatus,
    cursor: QuestionCursor,
    question_deadline: Option<DateTime>,
    accepting_joins: bool,
    created_at: DateTime,
    updated_at: DateTime,
    started_at: Option<DateTime>,
    ended_at: Option<DateTime>,
}

impl From<SessionEntity> for MongoSessionDocument {
    fn from(value: SessionEntity) -> Self {
        Self {
            id: uuid_as_binary(value.id),
            quiz_id: uuid_as_binary(value.quiz_id),
            host_id: uuid_as_binary(value.host_id),
            join_code: value.join_code,
            mode: value.mode,
            status: value.status,
            cursor: value.cursor,
            question_deadline: opt_time(value.question_deadline),
            accepting_joins: value.accepting_joins,
            created_at: DateTime::from_system_time(value.created_at),
            updated_at: DateTime::from_system_time(value.updated_at),
            started_at: opt_time(value.started_at),
            ended_at: opt_time(value.ended_at),
        }
    }
}

impl TryFrom<MongoSessionDocument> for SessionEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoSessionDocument) -> MongoResult<Self> {
        Ok(Self {
            id: binary_as_uuid(SESSION_COLLECTION, &value.id)?,
            quiz_id: binary_as_uuid(SESSION_COLLECTION, &value.quiz_id)?,
            host_id: binary_as_uuid(SESSION_COLLECTION, &value.host_id)?,
            join_code: value.join_code,
            mode: value.mode,
            status: value.status,
            cursor: value.cursor,
            question_deadline: value.question_deadline.map(DateTime::to_system_time),
            accepting_joins: value.accepting_joins,
            created_at: value.created_at.to_system_time(),
            updated_at: value.updated_at.to_system_time(),
            started_at: value.started_at.map(DateTime::to_system_time),
            ended_at: value.ended_at.map(DateTime::to_system_time),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
enum MongoProgress {
    Question { index: i64, deadline: DateTime },
    Transition { next_index: i64, until: DateTime },
    Finished,
}

impl From<PlayerProgress> for MongoProgress {
    fn from(value: PlayerProgress) -> Self {
        match value {
            PlayerProgress::Question { index, deadline } => MongoProgress::Question {
                index: index as i64,
                deadline: DateTime::from_system_time(deadline),
            },
            PlayerProgress::Transition { next_index, until } => MongoProgress::Transition {
                next_index: next_index as i64,
                until: DateTime::from_system_time(until),
            },
            PlayerProgress::Finished => MongoProgress::Finished,
        }
    }
}

impl From<MongoProgress> for PlayerProgress {
    fn from(value: MongoProgress) -> Self {
        match value {
            MongoProgress::Question { index, deadline } => PlayerProgress::Question {
                index: index.max(0) as usize,
                deadline: deadline.to_system_time(),
            },
            MongoProgress::Transition { next_index, until } => PlayerProgress::Transition {
                next_index: next_index.max(0) as usize,
                until: until.to_system_time(),
            },
            MongoProgress::Finished => PlayerProgress::Finished,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoPlayerDocument {
    #[serde(rename = "_id")]
    id: Binary,
    session_id: Binary,
    display_name: String,
    email: Option<String>,
    score: i64,
    joined_at: DateTime,
    completed_at: Option<DateTime>,
    progress: Option<MongoProgress>,
}

impl From<PlayerEntity> for MongoPlayerDocument {
    fn from(value: PlayerEntity) -> Self {
        Self {
            id: uuid_as_binary(value.id),
            session_id: uuid_as_binary(value.session_id),
            display_name: value.display_name,
            email: value.email,
            score: i64::try_from(value.score).unwrap_or(i64::MAX),
            joined_at: DateTime::from_system_time(value.joined_at),
            completed_at: opt_time(value.completed_at),
            progress: value.progress.map(Into::into),
        }
    }
}

impl TryFrom<MongoPlayerDocument> for PlayerEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoPlayerDocument) -> MongoResult<Self> {
        Ok(Self {
            id: binary_as_uuid(PLAYER_COLLECTION, &value.id)?,
            session_id: binary_as_uuid(PLAYER_COLLECTION, &value.session_id)?,
            display_name: value.display_name,
            email: value.email,
            score: value.score.max(0) as u64,
            joined_at: value.joined_at.to_system_time(),
            completed_at: value.completed_at.map(DateTime::to_system_time),
            progress: value.progress.map(Into::into),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoAnswerDocument {
    #[serde(rename = "_id")]
    id: Binary,
    session_id: Binary,
    player_id: Binary,
    question_index: i64,
    option_id: Binary,
    is_correct: bool,
    time_taken_ms: i64,
    submitted_at: DateTime,
}

impl From<AnswerEntity> for MongoAnswerDocument {
    fn from(value: AnswerEntity) -> Self {
        Self {
            id: uuid_as_binary(value.id),
            session_id: uuid_as_binary(value.session_id),
            player_id: uuid_as_binary(value.player_id),
            question_index: value.question_index as i64,
            option_id: uuid_as_binary(value.option_id),
            is_correct: value.is_correct,
            time_taken_ms: i64::try_from(value.time_taken_ms).unwrap_or(i64::MAX),
            submitted_at: DateTime::from_system_time(value.submitted_at),
        }
    }
}

impl TryFrom<MongoAnswerDocument> for AnswerEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoAnswerDocument) -> MongoResult<Self> {
        Ok(Self {
            id: binary_as_uuid(ANSWER_COLLECTION, &value.id)?,
            session_id: binary_as_uuid(ANSWER_COLLECTION, &value.session_id)?,
            player_id: binary_as_uuid(ANSWER_COLLECTION, &value.player_id)?,
            question_index: value.question_index.max(0) as usize,
            option_id: binary_as_uuid(ANSWER_COLLECTION, &value.option_id)?,
            is_correct: value.is_correct,
            time_taken_ms: value.time_taken_ms.max(0) as u64,
            submitted_at: value.submitted_at.to_system_time(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoJoinRecordDocument {
    #[serde(rename = "_id")]
    id: Binary,
    session_id: Binary,
    quiz_id: Binary,
    player_id: Binary,
    address: Option<String>,
    fingerprint: Option<String>,
    email_domain: Option<String>,
    joined_at: DateTime,
}

impl From<JoinRecordEntity> for MongoJoinRecordDocument {
    fn from(value: JoinRecordEntity) -> Self {
        Self {
            id: uuid_as_binary(value.id),
            session_id: uuid_as_binary(value.session_id),
            quiz_id: uuid_as_binary(value.quiz_id),
            player_id: uuid_as_binary(value.player_id),
            address: value.address,
            fingerprint: value.fingerprint,
            email_domain: value.email_domain,
            joined_at: DateTime::from_system_time(value.joined_at),
        }
    }
}

impl TryFrom<MongoJoinRecordDocument> for JoinRecordEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoJoinRecordDocument) -> MongoResult<Self> {
        Ok(Self {
            id: binary_as_uuid(JOIN_RECORD_COLLECTION, &value.id)?,
            session_id: binary_as_uuid(JOIN_RECORD_COLLECTION, &value.session_id)?,
            quiz_id: binary_as_uuid(JOIN_RECORD_COLLECTION, &value.quiz_id)?,
            player_id: binary_as_uuid(JOIN_RECORD_COLLECTION, &value.player_id)?,
            address: value.address,
            fingerprint: value.fingerprint,
            email_domain: value.email_domain,
            joined_at: value.joined_at.to_system_time(),
        })
    }
}
