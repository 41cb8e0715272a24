//! DTOs used by the participant endpoints.

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::models::{SessionMode, SessionStatus},
    dto::{
        events::QuestionPayload,
        validation::{validate_display_name, validate_join_code},
    },
};

/// Request to join a session with its PIN.
#[derive(Debug, Clone, Deserialize, ToSchema, Validate)]
pub struct JoinRequest {
    /// Six-digit session PIN.
    #[validate(custom(function = "validate_join_code"))]
    pub join_code: String,
    /// Name shown on the leaderboard, unique within the session.
    #[validate(custom(function = "validate_display_name"))]
    pub display_name: String,
    /// Required for self-paced sessions.
    #[serde(default)]
    #[validate(email(message = "Email address is malformed"))]
    pub email: Option<String>,
    /// Opaque client-computed device fingerprint.
    #[serde(default)]
    #[validate(length(max = 256))]
    pub fingerprint: Option<String>,
}

/// Identity handed back to a player once admitted.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct JoinResponse {
    /// Identifier to send with later requests.
    pub player_id: Uuid,
    /// Session joined.
    pub session_id: Uuid,
    /// Trimmed display name.
    pub display_name: String,
    /// How the session is played.
    pub mode: SessionMode,
    /// Session status at join time.
    pub status: SessionStatus,
    /// Self-paced position right after joining.
    pub progress: Option<ProgressView>,
}

/// Answer to the question currently shown in a live or poll session.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SubmitAnswerRequest {
    /// Answering player.
    pub player_id: Uuid,
    /// Question being answered.
    pub question_index: usize,
    /// Chosen option.
    pub option_id: Uuid,
}

/// Answer to the question a self-paced player is currently on.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SelfPacedAnswerRequest {
    /// Question being answered; must be the open one.
    pub question_index: usize,
    /// Chosen option.
    pub option_id: Uuid,
}

/// Acknowledgement of a submission.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AnswerReceipt {
    /// Question the answer was recorded for.
    pub question_index: usize,
    /// Option recorded for the question; the first submission wins.
    pub option_id: Uuid,
    /// `true` when an earlier answer for this question already existed.
    pub duplicate: bool,
    /// Score after the submission.
    pub score: u64,
    /// Immediate feedback, only given in self-paced sessions.
    pub is_correct: Option<bool>,
    /// Self-paced position after the submission.
    pub progress: Option<ProgressView>,
}

/// Pull view a participant uses to reconcile with the authoritative state.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PlayerView {
    /// Player identifier.
    pub player_id: Uuid,
    /// Session identifier.
    pub session_id: Uuid,
    /// Name shown on the leaderboard.
    pub display_name: String,
    /// Score replayed from the answer log.
    pub score: u64,
    /// How the session is played.
    pub mode: SessionMode,
    /// Session status.
    pub status: SessionStatus,
    /// Whether new players may still join.
    pub accepting_joins: bool,
    /// Question the host is showing, open or closed.
    pub current_question: Option<QuestionPayload>,
    /// Whether the current question still accepts answers.
    pub question_open: bool,
    /// Whether this player already answered the current question.
    pub answered_current: bool,
    /// When a self-paced run finished.
    pub completed_at: Option<String>,
}

/// Where a self-paced player stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProgressPhase {
    /// Joined before the host started the session.
    Waiting,
    /// A question is open for this player.
    Question,
    /// Pause before the next question.
    Transition,
    /// Every question has been played.
    Finished,
    /// The host ended the session before the player finished.
    Closed,
}

/// Self-paced progress of one player.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProgressView {
    /// Player identifier.
    pub player_id: Uuid,
    /// Current phase.
    pub phase: ProgressPhase,
    /// Questions in the quiz.
    pub total_questions: usize,
    /// Open question, present in the `question` phase.
    pub question: Option<QuestionPayload>,
    /// When the next question opens, in Unix milliseconds.
    pub next_question_at_ms: Option<u64>,
    /// Score so far.
    pub score: u64,
    /// When the run finished.
    pub completed_at: Option<String>,
}
