use std::time::SystemTime;

use thiserror::Error;
use uuid::Uuid;

use crate::dao::models::{QuestionCursor, SessionEntity, SessionStatus};

/// Phases a host-driven session goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Created; players may join, nothing shown yet.
    NotStarted,
    /// "Get ready" pause before the first question.
    Starting,
    /// The question at `index` accepts answers until `deadline`.
    QuestionActive {
        /// Zero-based question index.
        index: usize,
        /// Server-computed closing instant.
        deadline: SystemTime,
    },
    /// The question at `index` stopped accepting answers.
    QuestionClosed {
        /// Zero-based question index.
        index: usize,
    },
    /// Terminal.
    Ended,
}

impl SessionPhase {
    /// Index of the question currently shown, open or closed.
    pub fn question_index(&self) -> Option<usize> {
        match self {
            SessionPhase::QuestionActive { index, .. } | SessionPhase::QuestionClosed { index } => {
                Some(*index)
            }
            _ => None,
        }
    }

    /// Rebuild the phase persisted on a session row.
    ///
    /// An `Active` row whose cursor is still `NotStarted` was started but had
    /// not shown its first question yet (or is a running self-paced session).
    pub fn from_session(session: &SessionEntity, now: SystemTime) -> Self {
        match (session.status, session.cursor) {
            (SessionStatus::Completed, _) | (_, QuestionCursor::Ended) => SessionPhase::Ended,
            (SessionStatus::Waiting, _) => SessionPhase::NotStarted,
            (SessionStatus::Active, QuestionCursor::NotStarted) => SessionPhase::Starting,
            (_, QuestionCursor::At(index)) => match session.question_deadline {
                Some(deadline) if deadline > now => SessionPhase::QuestionActive { index, deadline },
                _ => SessionPhase::QuestionClosed { index },
            },
        }
    }
}

/// Events that can be applied to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    /// Host starts the session.
    Start,
    /// Show a question; `index` must follow the previous one.
    OpenQuestion {
        /// Question to show.
        index: usize,
        /// Closing instant.
        deadline: SystemTime,
    },
    /// Countdown elapsed or host closed early.
    CloseQuestion,
    /// Host ends the session.
    End,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// The phase the state machine was in when the invalid event was received.
    pub from: SessionPhase,
    /// The event that cannot be applied from this phase.
    pub event: ControlEvent,
}

/// Errors that can occur when planning a state machine transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// A transition is already pending and must be applied or aborted.
    AlreadyPending,
    /// The requested transition is not valid from the current phase.
    InvalidTransition(InvalidTransition),
}

/// Errors that can occur when applying a planned state machine transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    /// No transition is currently pending.
    NoPending,
    /// Plan ID does not match the pending plan.
    IdMismatch {
        /// Expected plan ID.
        expected: PlanId,
        /// Provided plan ID.
        got: PlanId,
    },
    /// State machine phase changed since the plan was created.
    PhaseMismatch {
        /// Phase when plan was created.
        expected: SessionPhase,
        /// Current phase.
        actual: SessionPhase,
    },
    /// State machine version changed since the plan was created.
    VersionMismatch {
        /// Version when plan was created.
        expected: usize,
        /// Current version.
        actual: usize,
    },
}

/// Errors that can occur when aborting a planned state machine transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortError {
    /// No transition is currently pending.
    NoPending,
    /// Plan ID does not match the pending plan.
    IdMismatch {
        /// Expected plan ID.
        expected: PlanId,
        /// Provided plan ID.
        got: PlanId,
    },
}

/// Unique identifier for a planned state transition.
pub type PlanId = Uuid;

/// A planned state machine transition that has been validated but not yet applied.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Unique identifier for this plan.
    pub id: PlanId,
    /// Phase the state machine is currently in.
    pub from: SessionPhase,
    /// Phase the state machine will transition to.
    pub to: SessionPhase,
    /// Version number after applying this transition.
    pub version_next: usize,
}

/// Per-session state machine driving the host flow.
///
/// Question indices only move forward: `OpenQuestion` is accepted for index 0
/// from `Starting` and for `i + 1` from `QuestionClosed(i)`.
#[derive(Debug, Clone)]
pub struct SessionStateMachine {
    phase: SessionPhase,
    version: usize,
    pending: Option<Plan>,
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::restore(SessionPhase::NotStarted)
    }
}

impl SessionStateMachine {
    /// Create a new state machine in the `NotStarted` phase.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a state machine positioned at a phase recovered from storage.
    pub fn restore(phase: SessionPhase) -> Self {
        Self {
            phase,
            version: 0,
            pending: None,
        }
    }

    /// Inspect the current phase.
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Plan a transition by validating that the event can be applied from the current phase.
    pub fn plan(&mut self, event: ControlEvent) -> Result<Plan, PlanError> {
        if self.pending.is_some() {
            return Err(PlanError::AlreadyPending);
        }

        let next = self
            .compute_transition(event)
            .map_err(PlanError::InvalidTransition)?;

        let plan = Plan {
            id: Uuid::new_v4(),
            from: self.phase,
            to: next,
            version_next: self.version + 1,
        };

        self.pending = Some(plan.clone());

        Ok(plan)
    }

    /// Apply a planned transition, returning the new phase.
    pub fn apply(&mut self, plan_id: PlanId) -> Result<SessionPhase, ApplyError> {
        let plan = self.pending.take().ok_or(ApplyError::NoPending)?;

        if plan.id != plan_id {
            let expected_plan_id = plan.id;
            self.pending = Some(plan);
            return Err(ApplyError::IdMismatch {
                expected: expected_plan_id,
                got: plan_id,
            });
        }

        if self.phase != plan.from {
            return Err(ApplyError::PhaseMismatch {
                expected: plan.from,
                actual: self.phase,
            });
        }

        if self.version + 1 != plan.version_next {
            return Err(ApplyError::VersionMismatch {
                expected: plan.version_next,
                actual: self.version + 1,
            });
        }

        self.phase = plan.to;
        self.version = plan.version_next;

        Ok(self.phase)
    }

    /// Abort a planned transition without applying it.
    pub fn abort(&mut self, plan_id: PlanId) -> Result<(), AbortError> {
        let plan = self.pending.as_ref().ok_or(AbortError::NoPending)?;

        if plan.id != plan_id {
            return Err(AbortError::IdMismatch {
                expected: plan.id,
                got: plan_id,
            });
        }

        self.pending = None;
        Ok(())
    }

    fn compute_transition(&self, event: ControlEvent) -> Result<SessionPhase, InvalidTransition> {
        let next = match (self.phase, event) {
            (SessionPhase::NotStarted, ControlEvent::Start) => SessionPhase::Starting,
            (SessionPhase::Starting, ControlEvent::OpenQuestion { index: 0, deadline }) => {
                SessionPhase::QuestionActive { index: 0, deadline }
            }
            (
                SessionPhase::QuestionClosed { index: current },
                ControlEvent::OpenQuestion { index, deadline },
            ) if index == current + 1 => SessionPhase::QuestionActive { index, deadline },
            (SessionPhase::QuestionActive { index, .. }, ControlEvent::CloseQuestion) => {
                SessionPhase::QuestionClosed { index }
            }
            (from, ControlEvent::End) if from != SessionPhase::Ended => SessionPhase::Ended,
            (from, event) => return Err(InvalidTransition { from, event }),
        };

        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn apply(sm: &mut SessionStateMachine, event: ControlEvent) -> SessionPhase {
        let plan = sm.plan(event).unwrap();
        sm.apply(plan.id).unwrap()
    }

    fn open(index: usize) -> ControlEvent {
        ControlEvent::OpenQuestion {
            index,
            deadline: SystemTime::UNIX_EPOCH + Duration::from_secs(60),
        }
    }

    #[test]
    fn initial_state_is_not_started() {
        assert_eq!(SessionStateMachine::new().phase(), SessionPhase::NotStarted);
    }

    #[test]
    fn full_happy_path_through_two_questions() {
        let mut sm = SessionStateMachine::new();

        assert_eq!(apply(&mut sm, ControlEvent::Start), SessionPhase::Starting);
        assert!(matches!(
            apply(&mut sm, open(0)),
            SessionPhase::QuestionActive { index: 0, .. }
        ));
        assert_eq!(
            apply(&mut sm, ControlEvent::CloseQuestion),
            SessionPhase::QuestionClosed { index: 0 }
        );
        assert!(matches!(
            apply(&mut sm, open(1)),
            SessionPhase::QuestionActive { index: 1, .. }
        ));
        assert_eq!(apply(&mut sm, ControlEvent::End), SessionPhase::Ended);
        assert_eq!(sm.version, 5);
    }

    #[test]
    fn question_index_never_moves_backwards_or_skips() {
        let mut sm = SessionStateMachine::new();
        apply(&mut sm, ControlEvent::Start);
        apply(&mut sm, open(0));
        apply(&mut sm, ControlEvent::CloseQuestion);

        for index in [0, 2] {
            match sm.plan(open(index)).unwrap_err() {
                PlanError::InvalidTransition(invalid) => {
                    assert_eq!(invalid.from, SessionPhase::QuestionClosed { index: 0 })
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }
    }

    #[test]
    fn open_question_rejected_while_one_is_active() {
        let mut sm = SessionStateMachine::new();
        apply(&mut sm, ControlEvent::Start);
        apply(&mut sm, open(0));
        assert!(matches!(
            sm.plan(open(1)),
            Err(PlanError::InvalidTransition(_))
        ));
    }

    #[test]
    fn end_is_terminal() {
        let mut sm = SessionStateMachine::new();
        apply(&mut sm, ControlEvent::End);
        assert!(matches!(
            sm.plan(ControlEvent::End),
            Err(PlanError::InvalidTransition(_))
        ));
        assert!(matches!(
            sm.plan(ControlEvent::Start),
            Err(PlanError::InvalidTransition(_))
        ));
    }

    #[test]
    fn second_plan_while_pending_is_refused() {
        let mut sm = SessionStateMachine::new();
        let plan = sm.plan(ControlEvent::Start).unwrap();
        assert_eq!(sm.plan(ControlEvent::End).unwrap_err(), PlanError::AlreadyPending);
        sm.abort(plan.id).unwrap();
        assert!(sm.pending.is_none());
        assert_eq!(sm.phase(), SessionPhase::NotStarted);
    }

    #[test]
    fn apply_with_foreign_plan_id_keeps_pending() {
        let mut sm = SessionStateMachine::new();
        sm.plan(ControlEvent::Start).unwrap();
        let err = sm.apply(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, ApplyError::IdMismatch { .. }));
        assert_eq!(
            sm.pending.as_ref().map(|plan| plan.to),
            Some(SessionPhase::Starting)
        );
    }

    #[test]
    fn phase_recovered_from_row_honours_deadline() {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(100);
        let mut row = SessionEntity {
            id: Uuid::new_v4(),
            quiz_id: Uuid::new_v4(),
            host_id: Uuid::new_v4(),
            join_code: "123456".into(),
            mode: crate::dao::models::SessionMode::Live,
            status: SessionStatus::Active,
            cursor: QuestionCursor::At(2),
            question_deadline: Some(now + Duration::from_secs(10)),
            accepting_joins: true,
            created_at: now,
            updated_at: now,
            started_at: Some(now),
            ended_at: None,
        };

        assert!(matches!(
            SessionPhase::from_session(&row, now),
            SessionPhase::QuestionActive { index: 2, .. }
        ));

        row.question_deadline = Some(now - Duration::from_secs(1));
        assert_eq!(
            SessionPhase::from_session(&row, now),
            SessionPhase::QuestionClosed { index: 2 }
        );

        row.cursor = QuestionCursor::NotStarted;
        assert_eq!(SessionPhase::from_session(&row, now), SessionPhase::Starting);

        row.status = SessionStatus::Waiting;
        assert_eq!(SessionPhase::from_session(&row, now), SessionPhase::NotStarted);

        row.status = SessionStatus::Completed;
        assert_eq!(SessionPhase::from_session(&row, now), SessionPhase::Ended);
    }
}
