use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use utoipa::ToSchema;
use uuid::Uuid;

/// Reusable quiz definition owned by a host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuizEntity {
    /// Stable identifier for the quiz.
    pub id: Uuid,
    /// Host that authored the quiz.
    pub owner_id: Uuid,
    /// Human readable title.
    pub title: String,
    /// Optional free-form description.
    pub description: Option<String>,
    /// Questions ordered by their `position`.
    pub questions: Vec<QuestionEntity>,
    /// Creation timestamp.
    pub created_at: SystemTime,
}

/// A single quiz question with its answer choices.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestionEntity {
    /// Stable identifier for the question.
    pub id: Uuid,
    /// Zero-based ordinal position inside the quiz.
    pub position: usize,
    /// Prompt shown to players.
    pub text: String,
    /// Seconds players have to answer.
    pub time_limit_secs: u32,
    /// Answer choices in display order.
    pub options: Vec<OptionEntity>,
}

impl QuestionEntity {
    /// Options flagged as correct, in display order.
    pub fn correct_options(&self) -> impl Iterator<Item = &OptionEntity> {
        self.options.iter().filter(|option| option.is_correct)
    }

    /// Look up an option belonging to this question.
    pub fn option(&self, option_id: Uuid) -> Option<&OptionEntity> {
        self.options.iter().find(|option| option.id == option_id)
    }
}

/// One answer choice of a question.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OptionEntity {
    /// Stable identifier for the option.
    pub id: Uuid,
    /// Label shown to players.
    pub text: String,
    /// Whether choosing this option scores points.
    pub is_correct: bool,
}

/// Flavour of a session run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// Host-driven quiz with scoring.
    Live,
    /// Host-driven poll; answers are tallied like a live quiz.
    Poll,
    /// Players progress independently through every question.
    SelfPaced,
}

/// Coarse lifecycle status persisted on the session row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created, players may join, no question shown yet.
    Waiting,
    /// Questions are being played.
    Active,
    /// Terminal.
    Completed,
}

/// Host-driven question pointer with its two sentinels.
///
/// The derived ordering (`NotStarted < At(0) < At(1) < ... < Ended`) is the
/// order in which a session is allowed to move.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(tag = "kind", content = "index", rename_all = "snake_case")]
pub enum QuestionCursor {
    /// No question has been shown yet.
    NotStarted,
    /// The question at this index is current.
    At(usize),
    /// The session is over.
    Ended,
}

impl QuestionCursor {
    /// Index of the current question, if any.
    pub fn index(&self) -> Option<usize> {
        match self {
            QuestionCursor::At(index) => Some(*index),
            _ => None,
        }
    }
}

/// One run of a quiz.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionEntity {
    /// Primary key of the session.
    pub id: Uuid,
    /// Quiz being played.
    pub quiz_id: Uuid,
    /// Host owning the session; the only actor allowed to drive it.
    pub host_id: Uuid,
    /// Six-digit PIN shared with players.
    pub join_code: String,
    /// Live, poll or self-paced.
    pub mode: SessionMode,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Host-driven question pointer (always `NotStarted` for self-paced runs).
    pub cursor: QuestionCursor,
    /// Server-computed instant at which the current question closes.
    pub question_deadline: Option<SystemTime>,
    /// Whether new players may still join.
    pub accepting_joins: bool,
    /// Creation timestamp.
    pub created_at: SystemTime,
    /// Last time the row was written.
    pub updated_at: SystemTime,
    /// When the host started the session.
    pub started_at: Option<SystemTime>,
    /// When the session reached its terminal status.
    pub ended_at: Option<SystemTime>,
}

/// Per-player position inside a self-paced run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum PlayerProgress {
    /// The question is open until `deadline`.
    Question {
        /// Zero-based question index.
        index: usize,
        /// Instant at which the question closes for this player.
        deadline: SystemTime,
    },
    /// Inter-question pause before `next_index` opens.
    Transition {
        /// Question shown once the pause is over.
        next_index: usize,
        /// End of the pause.
        until: SystemTime,
    },
    /// Every question has been played.
    Finished,
}

impl PlayerProgress {
    /// Whether the run is over for this player.
    pub fn is_finished(&self) -> bool {
        matches!(self, PlayerProgress::Finished)
    }
}

/// A participant's session-scoped identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerEntity {
    /// Primary key of the player.
    pub id: Uuid,
    /// Session the player joined.
    pub session_id: Uuid,
    /// Name shown on the leaderboard.
    pub display_name: String,
    /// Contact email collected for self-paced runs.
    pub email: Option<String>,
    /// Running score, always equal to the replay of the player's answers.
    pub score: u64,
    /// Join timestamp, used to break leaderboard ties.
    pub joined_at: SystemTime,
    /// When the player finished a self-paced run.
    pub completed_at: Option<SystemTime>,
    /// Self-paced position; `None` for host-driven sessions.
    pub progress: Option<PlayerProgress>,
}

/// One submitted response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnswerEntity {
    /// Primary key of the answer.
    pub id: Uuid,
    /// Session the answer belongs to.
    pub session_id: Uuid,
    /// Player who answered.
    pub player_id: Uuid,
    /// Question the answer targets.
    pub question_index: usize,
    /// Chosen option.
    pub option_id: Uuid,
    /// Whether the chosen option is correct.
    pub is_correct: bool,
    /// Milliseconds between the question opening and the submission.
    pub time_taken_ms: u64,
    /// Submission timestamp.
    pub submitted_at: SystemTime,
}

/// Audit row written for every admitted join, consulted by the abuse guard.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JoinRecordEntity {
    /// Primary key of the record.
    pub id: Uuid,
    /// Session joined.
    pub session_id: Uuid,
    /// Quiz played in that session.
    pub quiz_id: Uuid,
    /// Player created by the join.
    pub player_id: Uuid,
    /// Network address the join came from.
    pub address: Option<String>,
    /// Client-computed device fingerprint.
    pub fingerprint: Option<String>,
    /// Lower-cased email domain.
    pub email_domain: Option<String>,
    /// Join timestamp.
    pub joined_at: SystemTime,
}

/// Row-change notification emitted by a store, filtered per session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    /// The session row was rewritten.
    SessionUpdated(SessionEntity),
    /// A player joined.
    PlayerInserted(PlayerEntity),
    /// A player row was rewritten (score, progress, completion).
    PlayerUpdated(PlayerEntity),
    /// An answer was appended.
    AnswerInserted(AnswerEntity),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_orders_sentinels_around_indices() {
        assert!(QuestionCursor::NotStarted < QuestionCursor::At(0));
        assert!(QuestionCursor::At(0) < QuestionCursor::At(3));
        assert!(QuestionCursor::At(99) < QuestionCursor::Ended);
    }

    #[test]
    fn cursor_serializes_tagged() {
        let json = serde_json::to_value(QuestionCursor::At(2)).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "at", "index": 2}));
        let json = serde_json::to_value(QuestionCursor::Ended).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "ended"}));
    }
}
