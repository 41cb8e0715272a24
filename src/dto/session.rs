//! DTOs used by the host-facing session endpoints.

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dao::models::{SessionEntity, SessionMode, SessionStatus},
    dto::format_system_time,
};

/// Request to open a new session for a quiz.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateSessionRequest {
    /// Quiz to play.
    pub quiz_id: Uuid,
    /// How the session is played.
    pub mode: SessionMode,
}

/// Projection of a session row.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SessionView {
    /// Session identifier.
    pub id: Uuid,
    /// Quiz played.
    pub quiz_id: Uuid,
    /// Six-digit PIN players join with.
    pub join_code: String,
    /// How the session is played.
    pub mode: SessionMode,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Index of the question currently shown, absent before the first one and after the end.
    pub current_question_index: Option<usize>,
    /// When the open question stops accepting answers.
    pub question_deadline: Option<String>,
    /// Whether new players may still join.
    pub accepting_joins: bool,
    /// Players admitted so far.
    pub player_count: usize,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
    /// When the host started the session.
    pub started_at: Option<String>,
    /// When the session ended.
    pub ended_at: Option<String>,
}

impl SessionView {
    /// Build the view from a stored row and its current player count.
    pub fn from_entity(session: &SessionEntity, player_count: usize) -> Self {
        Self {
            id: session.id,
            quiz_id: session.quiz_id,
            join_code: session.join_code.clone(),
            mode: session.mode,
            status: session.status,
            current_question_index: session.cursor.index(),
            question_deadline: session.question_deadline.map(format_system_time),
            accepting_joins: session.accepting_joins,
            player_count,
            created_at: format_system_time(session.created_at),
            started_at: session.started_at.map(format_system_time),
            ended_at: session.ended_at.map(format_system_time),
        }
    }
}

/// Per-option answer counts for one question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TallyView {
    /// Question the counts belong to; absent when no question has been shown.
    pub question_index: Option<usize>,
    /// Number of counted answers.
    pub total: usize,
    /// One entry per option, in display order.
    pub options: Vec<OptionCount>,
}

/// Count and rounded share of one option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct OptionCount {
    /// Option counted.
    pub option_id: Uuid,
    /// Answers choosing it.
    pub count: usize,
    /// `round(count / total * 100)`, 0 when nobody answered.
    pub percentage: u32,
}

/// One row of the ranking.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct LeaderboardEntry {
    /// 1-based rank; tied scores share a rank.
    pub position: usize,
    /// Ranked player.
    pub player_id: Uuid,
    /// Name shown on the leaderboard.
    pub display_name: String,
    /// Total score.
    pub score: u64,
    /// When the player finished a self-paced run.
    pub completed_at: Option<String>,
}

/// Acknowledgement returned by host actions.
#[derive(Debug, Serialize, ToSchema)]
pub struct HostActionResponse {
    /// Human-readable outcome.
    pub message: String,
    /// Session row after the action.
    pub session: SessionView,
}
