//! Player-side view of a host-driven session.
//!
//! A [`ParticipantClient`] follows the channel events of one session and
//! keeps a local phase for its player. Events are hints: they may arrive
//! late, twice or not at all, so every handler is idempotent and
//! [`ParticipantClient::reconcile`] realigns the client with the store.

use futures::stream::BoxStream;
use tracing::debug;
use uuid::Uuid;

use crate::{
    dao::models::SessionStatus,
    dto::{
        events::{QuestionPayload, SessionEvent},
        player::{AnswerReceipt, JoinRequest, JoinResponse, SubmitAnswerRequest},
    },
    error::ServiceError,
    services::player_service,
    state::{SharedState, context::JoinContext},
};

/// Local phase of a participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantPhase {
    /// Not admitted yet.
    Joining,
    /// Admitted, waiting for the first question.
    WaitingForStart,
    /// A question is shown and can be answered.
    QuestionVisible {
        /// Question index.
        index: usize,
        /// Closing instant announced by the host, in Unix milliseconds.
        deadline_ms: u64,
    },
    /// The player answered the shown question.
    AnswerLocked {
        /// Question index.
        index: usize,
    },
    /// The question closed; waiting for the host to move on.
    WaitingForNext {
        /// Question index that closed.
        index: usize,
    },
    /// The session is over.
    Ended,
}

impl ParticipantPhase {
    fn question_index(&self) -> Option<usize> {
        match self {
            ParticipantPhase::QuestionVisible { index, .. }
            | ParticipantPhase::AnswerLocked { index }
            | ParticipantPhase::WaitingForNext { index } => Some(*index),
            _ => None,
        }
    }
}

/// Result of a submission attempt.
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    /// The answer was stored.
    Accepted(AnswerReceipt),
    /// An answer for this question already exists; nothing changed.
    AlreadySubmitted,
}

/// Player-side state machine for one session.
pub struct ParticipantClient {
    state: SharedState,
    identity: Option<JoinResponse>,
    phase: ParticipantPhase,
    current: Option<QuestionPayload>,
    score: u64,
}

impl ParticipantClient {
    /// A client that has not joined yet.
    pub fn new(state: SharedState) -> Self {
        Self {
            state,
            identity: None,
            phase: ParticipantPhase::Joining,
            current: None,
            score: 0,
        }
    }

    /// Current local phase.
    pub fn phase(&self) -> ParticipantPhase {
        self.phase
    }

    /// Question on screen, if any.
    pub fn current_question(&self) -> Option<&QuestionPayload> {
        self.current.as_ref()
    }

    /// Score last reported by the server.
    pub fn score(&self) -> u64 {
        self.score
    }

    /// Player id assigned on join.
    pub fn player_id(&self) -> Option<Uuid> {
        self.identity.as_ref().map(|identity| identity.player_id)
    }

    /// Session joined, once joined.
    pub fn session_id(&self) -> Option<Uuid> {
        self.identity.as_ref().map(|identity| identity.session_id)
    }

    /// Join a session, then catch up with whatever it is currently showing.
    pub async fn join(
        &mut self,
        request: JoinRequest,
        ctx: JoinContext,
    ) -> Result<JoinResponse, ServiceError> {
        let response = player_service::join(&self.state, request, ctx).await?;
        self.identity = Some(response.clone());
        self.phase = match response.status {
            SessionStatus::Completed => ParticipantPhase::Ended,
            _ => ParticipantPhase::WaitingForStart,
        };
        self.reconcile().await?;
        Ok(response)
    }

    /// Events of the joined session, in publish order.
    pub fn events(&self) -> Result<BoxStream<'static, SessionEvent>, ServiceError> {
        let session_id = self.require_identity()?.session_id;
        Ok(self.state.hub().stream(session_id))
    }

    /// Dispatch one channel event.
    pub async fn handle_event(&mut self, event: SessionEvent) -> Result<(), ServiceError> {
        match event {
            SessionEvent::SessionStarting { .. } => {
                if self.phase == ParticipantPhase::Joining {
                    self.phase = ParticipantPhase::WaitingForStart;
                }
                Ok(())
            }
            SessionEvent::QuestionStarted { question } => self.receive_question(question).await,
            SessionEvent::QuestionClosed { question_index, .. } => {
                self.on_question_closed(question_index);
                Ok(())
            }
            SessionEvent::SessionEnded { .. } | SessionEvent::PollEnded { .. } => {
                self.on_session_ended();
                Ok(())
            }
            SessionEvent::PlayerJoined { .. }
            | SessionEvent::AnswerSubmitted { .. }
            | SessionEvent::JoinsClosed => Ok(()),
        }
    }

    /// Show a question announced by the host.
    ///
    /// Re-delivery of the current question leaves the state untouched and
    /// questions older than the one already seen are ignored. Whether the
    /// player already answered is read from the store, not from the event.
    pub async fn receive_question(&mut self, question: QuestionPayload) -> Result<(), ServiceError> {
        if self.phase == ParticipantPhase::Ended {
            return Ok(());
        }
        let index = question.question_index;
        if let Some(seen) = self.phase.question_index() {
            if index < seen || (index == seen && self.current.is_some()) {
                debug!(question_index = index, seen, "ignoring stale or repeated question");
                return Ok(());
            }
        }

        let identity = self.require_identity()?;
        let (session_id, player_id) = (identity.session_id, identity.player_id);
        let store = self.state.require_store().await?;
        let answered = store
            .find_answer(session_id, player_id, index)
            .await?
            .is_some();

        self.phase = if answered {
            ParticipantPhase::AnswerLocked { index }
        } else {
            ParticipantPhase::QuestionVisible {
                index,
                deadline_ms: question.deadline_ms,
            }
        };
        self.current = Some(question);
        Ok(())
    }

    /// Answer the visible question once.
    pub async fn submit_answer(&mut self, option_id: Uuid) -> Result<SubmitOutcome, ServiceError> {
        let index = match self.phase {
            ParticipantPhase::QuestionVisible { index, .. } => index,
            ParticipantPhase::AnswerLocked { .. } => return Ok(SubmitOutcome::AlreadySubmitted),
            _ => {
                return Err(ServiceError::InvalidState(
                    "no question is open for answers".into(),
                ));
            }
        };

        let identity = self.require_identity()?;
        let (session_id, player_id) = (identity.session_id, identity.player_id);
        let receipt = player_service::submit_answer(
            &self.state,
            session_id,
            SubmitAnswerRequest {
                player_id,
                question_index: index,
                option_id,
            },
        )
        .await?;

        self.phase = ParticipantPhase::AnswerLocked { index };
        self.score = receipt.score;
        if receipt.duplicate {
            Ok(SubmitOutcome::AlreadySubmitted)
        } else {
            Ok(SubmitOutcome::Accepted(receipt))
        }
    }

    /// Local countdown reached zero. Provisional: the host's close is authoritative.
    pub fn on_time_expired(&mut self) {
        if let ParticipantPhase::QuestionVisible { index, .. } = self.phase {
            self.phase = ParticipantPhase::WaitingForNext { index };
        }
    }

    /// The host closed `question_index`.
    pub fn on_question_closed(&mut self, question_index: usize) {
        match self.phase {
            ParticipantPhase::QuestionVisible { index, .. } | ParticipantPhase::AnswerLocked { index }
                if index == question_index =>
            {
                self.phase = ParticipantPhase::WaitingForNext { index };
            }
            _ => {}
        }
    }

    /// The session ended.
    pub fn on_session_ended(&mut self) {
        self.phase = ParticipantPhase::Ended;
        self.current = None;
    }

    /// Realign with the authoritative state held by the store.
    pub async fn reconcile(&mut self) -> Result<(), ServiceError> {
        let identity = self.require_identity()?;
        let view =
            player_service::player_view(&self.state, identity.session_id, identity.player_id)
                .await?;
        self.score = view.score;

        if view.status == SessionStatus::Completed {
            self.on_session_ended();
            return Ok(());
        }

        let Some(question) = view.current_question else {
            if self.phase == ParticipantPhase::Joining {
                self.phase = ParticipantPhase::WaitingForStart;
            }
            return Ok(());
        };

        let index = question.question_index;
        if self.phase.question_index().is_some_and(|seen| index < seen) {
            return Ok(());
        }

        self.phase = match (view.question_open, view.answered_current) {
            (true, false) => ParticipantPhase::QuestionVisible {
                index,
                deadline_ms: question.deadline_ms,
            },
            (true, true) => ParticipantPhase::AnswerLocked { index },
            (false, _) => ParticipantPhase::WaitingForNext { index },
        };
        self.current = Some(question);
        Ok(())
    }

    fn require_identity(&self) -> Result<&JoinResponse, ServiceError> {
        self.identity
            .as_ref()
            .ok_or_else(|| ServiceError::InvalidState("the participant has not joined".into()))
    }
}
