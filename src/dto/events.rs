//! Payloads carried on the per-session broadcast channel.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dao::models::QuestionEntity,
    dto::session::{LeaderboardEntry, TallyView},
};

/// Tagged event published to every subscriber of a session.
///
/// The `event` tag doubles as the SSE event name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A player was admitted.
    PlayerJoined {
        /// New player.
        player_id: Uuid,
        /// Name shown in the lobby.
        display_name: String,
        /// Players admitted so far, including this one.
        player_count: usize,
    },
    /// The host started the session; the first question follows after the delay.
    SessionStarting {
        /// Length of the "get ready" pause.
        starts_in_secs: u64,
    },
    /// A question opened.
    QuestionStarted {
        /// Question shown to players.
        question: QuestionPayload,
    },
    /// A question stopped accepting answers.
    QuestionClosed {
        /// Index of the closed question.
        question_index: usize,
        /// Final counts for the question.
        tally: TallyView,
    },
    /// A player answered; observers use it as a hint to refresh tallies.
    AnswerSubmitted {
        /// Player who answered.
        player_id: Uuid,
        /// Question answered.
        question_index: usize,
        /// Option chosen.
        option_id: Uuid,
    },
    /// A live or self-paced session is over.
    SessionEnded {
        /// Final ranking.
        leaderboard: Vec<LeaderboardEntry>,
    },
    /// A poll is over.
    PollEnded {
        /// Counts of the last question shown, if any.
        last_tally: Option<TallyView>,
    },
    /// The host stopped admitting new players.
    JoinsClosed,
}

impl SessionEvent {
    /// SSE event name, identical to the serialized tag.
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::PlayerJoined { .. } => "player_joined",
            SessionEvent::SessionStarting { .. } => "session_starting",
            SessionEvent::QuestionStarted { .. } => "question_started",
            SessionEvent::QuestionClosed { .. } => "question_closed",
            SessionEvent::AnswerSubmitted { .. } => "answer_submitted",
            SessionEvent::SessionEnded { .. } => "session_ended",
            SessionEvent::PollEnded { .. } => "poll_ended",
            SessionEvent::JoinsClosed => "joins_closed",
        }
    }

    /// Whether no further events follow this one.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionEvent::SessionEnded { .. } | SessionEvent::PollEnded { .. }
        )
    }
}

/// Everything a participant needs to render a question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct QuestionPayload {
    /// Zero-based position of the question.
    pub question_index: usize,
    /// Number of questions in the quiz.
    pub total_questions: usize,
    /// Question identifier.
    pub question_id: Uuid,
    /// Prompt.
    pub text: String,
    /// Seconds allowed.
    pub time_limit_secs: u32,
    /// Choices, without their correctness flag.
    pub options: Vec<OptionPayload>,
    /// Server-computed closing instant, in Unix milliseconds.
    pub deadline_ms: u64,
}

/// A choice as shown to players.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct OptionPayload {
    /// Option identifier.
    pub id: Uuid,
    /// Label.
    pub text: String,
}

impl QuestionPayload {
    /// Project a stored question for broadcasting.
    pub fn new(
        question: &QuestionEntity,
        question_index: usize,
        total_questions: usize,
        deadline_ms: u64,
    ) -> Self {
        Self {
            question_index,
            total_questions,
            question_id: question.id,
            text: question.text.clone(),
            time_limit_secs: question.time_limit_secs,
            options: question
                .options
                .iter()
                .map(|option| OptionPayload {
                    id: option.id,
                    text: option.text.clone(),
                })
                .collect(),
            deadline_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_snake_case_tag_matching_name() {
        let events = [
            SessionEvent::SessionStarting { starts_in_secs: 3 },
            SessionEvent::JoinsClosed,
            SessionEvent::PollEnded { last_tally: None },
        ];

        for event in events {
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["event"], event.name());
        }
    }
}
