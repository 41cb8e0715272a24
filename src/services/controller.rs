//! Host-side session controller.
//!
//! One controller drives one session: it owns the authoritative question
//! cursor, arms the per-question countdown, keeps the live tally and publishes
//! the lifecycle events. Store writes happen inside a per-session gate so that
//! timers and host commands never interleave.

use std::{
    sync::{Arc, Weak},
    time::{Duration, SystemTime},
};

use tokio::{
    sync::{Mutex, MutexGuard, RwLock, broadcast::error::RecvError},
    task::JoinHandle,
    time::{MissedTickBehavior, interval, sleep, timeout},
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    dao::{
        models::{
            PlayerEntity, QuestionCursor, QuizEntity, SessionEntity, SessionMode, SessionStatus,
            StoreChange,
        },
        session_store::SessionStore,
    },
    dto::{
        events::{QuestionPayload, SessionEvent},
        session::{LeaderboardEntry, TallyView},
        unix_millis,
    },
    error::ServiceError,
    services::retry::with_retry,
    state::{
        ChannelHub, Plan,
        context::HostContext,
        leaderboard,
        state_machine::{ControlEvent, SessionPhase, SessionStateMachine},
        tally::{AnswerTally, TallyOutcome},
    },
};

#[derive(Default)]
struct ControllerTasks {
    start_delay: Option<JoinHandle<()>>,
    countdown: Option<JoinHandle<()>>,
    listener: Option<JoinHandle<()>>,
}

impl ControllerTasks {
    fn abort_timers(&mut self) {
        if let Some(handle) = self.start_delay.take() {
            handle.abort();
        }
        if let Some(handle) = self.countdown.take() {
            handle.abort();
        }
    }
}

/// Authoritative driver of a single session.
pub struct SessionController {
    session_id: Uuid,
    mode: SessionMode,
    quiz: Arc<QuizEntity>,
    store: Arc<dyn SessionStore>,
    hub: Arc<ChannelHub>,
    config: Arc<AppConfig>,
    session: RwLock<SessionEntity>,
    machine: RwLock<SessionStateMachine>,
    gate: Mutex<()>,
    tally: Mutex<AnswerTally>,
    tasks: Mutex<ControllerTasks>,
    this: Weak<SessionController>,
}

impl SessionController {
    /// Build a controller for `session` and bring it in line with the stored row.
    ///
    /// Works both for freshly created sessions and for sessions resumed after
    /// a restart: the phase is rebuilt from the row, the tally is refetched and
    /// pending timers are re-armed from the persisted deadline.
    pub async fn launch(
        session: SessionEntity,
        quiz: Arc<QuizEntity>,
        store: Arc<dyn SessionStore>,
        hub: Arc<ChannelHub>,
        config: Arc<AppConfig>,
    ) -> Arc<Self> {
        let phase = SessionPhase::from_session(&session, SystemTime::now());
        let controller = Arc::new_cyclic(|this| Self {
            session_id: session.id,
            mode: session.mode,
            quiz,
            store,
            hub,
            config,
            session: RwLock::new(session),
            machine: RwLock::new(SessionStateMachine::restore(phase)),
            gate: Mutex::new(()),
            tally: Mutex::new(AnswerTally::new()),
            tasks: Mutex::new(ControllerTasks::default()),
            this: this.clone(),
        });

        if let Some(index) = phase.question_index() {
            controller.reset_tally(index).await;
            controller.reconcile().await;
        }

        match phase {
            SessionPhase::QuestionActive { index, deadline } => {
                controller.arm_countdown(index, deadline).await;
            }
            SessionPhase::Starting if controller.mode != SessionMode::SelfPaced => {
                controller.arm_start_delay().await;
            }
            _ => {}
        }

        if phase != SessionPhase::Ended {
            controller.spawn_listener().await;
        }

        info!(session_id = %controller.session_id, phase = ?phase, "session controller launched");
        controller
    }

    /// Identifier of the driven session.
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Session flavour.
    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    /// Quiz being played.
    pub fn quiz(&self) -> &Arc<QuizEntity> {
        &self.quiz
    }

    /// Current phase of the state machine.
    pub async fn phase(&self) -> SessionPhase {
        self.machine.read().await.phase()
    }

    /// Last persisted session row.
    pub async fn session(&self) -> SessionEntity {
        self.session.read().await.clone()
    }

    /// Start the session after checking the preconditions.
    ///
    /// Live and poll sessions show their first question after the start delay;
    /// self-paced sessions open for individual progress immediately.
    pub async fn start(&self, ctx: &HostContext) -> Result<SessionEntity, ServiceError> {
        self.ensure_owner(ctx).await?;
        let gate = self.gate.lock().await;

        if self.quiz.questions.is_empty() {
            return Err(ServiceError::InvalidState(
                "the quiz has no questions".into(),
            ));
        }

        let requires_players = match self.mode {
            SessionMode::Poll => true,
            SessionMode::Live => self.config.joins.live_requires_players,
            SessionMode::SelfPaced => false,
        };
        if requires_players {
            let store = self.store.clone();
            let session_id = self.session_id;
            let players = with_retry(&self.config.retry, "list_players", || {
                store.list_players(session_id)
            })
            .await?;
            if players.is_empty() {
                return Err(ServiceError::InvalidState(
                    "at least one player must join before the session starts".into(),
                ));
            }
        }

        let now = SystemTime::now();
        let (row, _) = self
            .run_transition(&gate, ControlEvent::Start, |row| {
                row.status = SessionStatus::Active;
                row.started_at = Some(now);
            })
            .await?;

        let starts_in_secs = match self.mode {
            SessionMode::SelfPaced => 0,
            _ => {
                self.arm_start_delay().await;
                self.config.timing.start_delay_secs
            }
        };
        self.publish(SessionEvent::SessionStarting { starts_in_secs });
        drop(gate);

        Ok(row)
    }

    /// Close the active question before its deadline.
    pub async fn close_question(&self, ctx: &HostContext) -> Result<TallyView, ServiceError> {
        self.ensure_owner(ctx).await?;
        let gate = self.gate.lock().await;

        if !matches!(self.phase().await, SessionPhase::QuestionActive { .. }) {
            return Err(ServiceError::InvalidState(
                "no question is accepting answers".into(),
            ));
        }

        if let Some(handle) = self.tasks.lock().await.countdown.take() {
            handle.abort();
        }
        let tally = self.close_locked(&gate).await?;
        drop(gate);
        Ok(tally)
    }

    /// Show the question following the closed one.
    pub async fn next(&self, ctx: &HostContext) -> Result<SessionEntity, ServiceError> {
        self.ensure_owner(ctx).await?;
        let gate = self.gate.lock().await;

        let index = match self.phase().await {
            SessionPhase::QuestionClosed { index } => index,
            SessionPhase::QuestionActive { .. } => {
                return Err(ServiceError::InvalidState(
                    "close the current question before moving on".into(),
                ));
            }
            other => {
                return Err(ServiceError::InvalidState(format!(
                    "cannot advance while {other:?}"
                )));
            }
        };

        if index + 1 >= self.quiz.questions.len() {
            return Err(ServiceError::InvalidState(
                "no more questions; end the session instead".into(),
            ));
        }

        let row = self.open_question_locked(&gate, index + 1).await?;
        drop(gate);
        Ok(row)
    }

    /// End the session from any non-terminal phase.
    pub async fn end(&self, ctx: &HostContext) -> Result<SessionEntity, ServiceError> {
        self.ensure_owner(ctx).await?;
        let gate = self.gate.lock().await;

        if self.phase().await == SessionPhase::Ended {
            return Err(ServiceError::SessionClosed);
        }

        self.tasks.lock().await.abort_timers();

        let now = SystemTime::now();
        let (row, _) = self
            .run_transition(&gate, ControlEvent::End, |row| {
                row.status = SessionStatus::Completed;
                row.cursor = QuestionCursor::Ended;
                row.question_deadline = None;
                row.accepting_joins = false;
                row.ended_at = Some(now);
            })
            .await?;

        let event = match self.mode {
            SessionMode::Poll => {
                let tally = self.tally.lock().await;
                SessionEvent::PollEnded {
                    last_tally: tally.question_index().map(|_| tally.snapshot()),
                }
            }
            SessionMode::Live | SessionMode::SelfPaced => {
                let leaderboard = match self.leaderboard().await {
                    Ok(board) => board,
                    Err(err) => {
                        warn!(session_id = %self.session_id, error = %err, "failed to load final leaderboard");
                        Vec::new()
                    }
                };
                SessionEvent::SessionEnded { leaderboard }
            }
        };
        self.publish(event);
        self.hub.close(self.session_id);

        if let Some(handle) = self.tasks.lock().await.listener.take() {
            handle.abort();
        }
        drop(gate);

        info!(session_id = %self.session_id, "session ended");
        Ok(row)
    }

    /// Stop admitting new players; in-progress players continue.
    pub async fn close_joins(&self, ctx: &HostContext) -> Result<SessionEntity, ServiceError> {
        self.ensure_owner(ctx).await?;
        let gate = self.gate.lock().await;

        if self.phase().await == SessionPhase::Ended {
            return Err(ServiceError::SessionClosed);
        }

        let mut row = self.session.read().await.clone();
        if !row.accepting_joins {
            return Ok(row);
        }
        row.accepting_joins = false;
        row.updated_at = SystemTime::now();

        let store = self.store.clone();
        with_retry(&self.config.retry, "update_session", || {
            store.update_session(row.clone())
        })
        .await?;
        *self.session.write().await = row.clone();
        self.publish(SessionEvent::JoinsClosed);
        drop(gate);

        info!(session_id = %self.session_id, "session closed to new players");
        Ok(row)
    }

    /// Current counts for the question being shown.
    pub async fn tally(&self) -> TallyView {
        self.tally.lock().await.snapshot()
    }

    /// Ranking of every player of the session.
    pub async fn leaderboard(&self) -> Result<Vec<LeaderboardEntry>, ServiceError> {
        let players = self.players().await?;
        Ok(leaderboard::rank(&players))
    }

    /// Count an answer seen through a change notification or a broadcast.
    pub async fn observe_answer(&self, player_id: Uuid, question_index: usize, option_id: Uuid) {
        let outcome = self
            .tally
            .lock()
            .await
            .record(player_id, question_index, option_id);
        match outcome {
            TallyOutcome::Counted => {
                debug!(session_id = %self.session_id, %player_id, question_index, "answer counted")
            }
            other => {
                debug!(session_id = %self.session_id, %player_id, question_index, outcome = ?other, "answer not counted")
            }
        }
    }

    /// Rebuild the tally from the answer log held by the store.
    pub async fn reconcile(&self) {
        let mut tally = self.tally.lock().await;
        if tally.question_index().is_none() {
            return;
        }

        let store = self.store.clone();
        let session_id = self.session_id;
        match with_retry(&self.config.retry, "list_answers", || {
            store.list_answers(session_id)
        })
        .await
        {
            Ok(answers) => {
                tally.rebuild(&answers);
                debug!(session_id = %self.session_id, total = tally.total(), "tally reconciled");
            }
            Err(err) => {
                warn!(session_id = %self.session_id, error = %err, "tally reconciliation failed");
            }
        }
    }

    async fn ensure_owner(&self, ctx: &HostContext) -> Result<(), ServiceError> {
        ctx.ensure_owner(&*self.session.read().await)
    }

    async fn players(&self) -> Result<Vec<PlayerEntity>, ServiceError> {
        let store = self.store.clone();
        let session_id = self.session_id;
        Ok(with_retry(&self.config.retry, "list_players", || {
            store.list_players(session_id)
        })
        .await?)
    }

    fn publish(&self, event: SessionEvent) {
        self.hub.publish(self.session_id, event);
    }

    async fn reset_tally(&self, index: usize) {
        if let Some(question) = self.quiz.questions.get(index) {
            self.tally
                .lock()
                .await
                .reset(index, question.options.iter().map(|option| option.id));
        }
    }

    /// Persist a row change under a planned transition, aborting the plan on failure.
    async fn run_transition<F>(
        &self,
        _gate: &MutexGuard<'_, ()>,
        event: ControlEvent,
        mutate: F,
    ) -> Result<(SessionEntity, SessionPhase), ServiceError>
    where
        F: FnOnce(&mut SessionEntity),
    {
        let Plan {
            id: plan_id,
            from,
            to,
            ..
        } = self.machine.write().await.plan(event)?;

        let mut row = self.session.read().await.clone();
        mutate(&mut row);
        row.updated_at = SystemTime::now();

        let store = self.store.clone();
        let work = with_retry(&self.config.retry, "update_session", || {
            store.update_session(row.clone())
        });
        let outcome = match timeout(self.config.timing.transition_timeout(), work).await {
            Ok(result) => result.map_err(ServiceError::from),
            Err(_) => Err(ServiceError::Timeout),
        };

        match outcome {
            Ok(()) => {
                let next = self.machine.write().await.apply(plan_id)?;
                *self.session.write().await = row.clone();
                info!(session_id = %self.session_id, event = ?event, from = ?from, phase = ?next, "session transition applied");
                Ok((row, next))
            }
            Err(err) => {
                if let Err(abort_err) = self.machine.write().await.abort(plan_id) {
                    warn!(
                        session_id = %self.session_id,
                        event = ?event,
                        plan_id = %plan_id,
                        error = ?abort_err,
                        "failed to abort transition after work error"
                    );
                }
                error!(session_id = %self.session_id, event = ?event, from = ?from, target = ?to, error = %err, "session transition failed");
                Err(err)
            }
        }
    }

    async fn open_question_locked(
        &self,
        gate: &MutexGuard<'_, ()>,
        index: usize,
    ) -> Result<SessionEntity, ServiceError> {
        let question = self.quiz.questions.get(index).ok_or_else(|| {
            ServiceError::InvalidState(format!("question {index} does not exist"))
        })?;

        let deadline = SystemTime::now() + Duration::from_secs(u64::from(question.time_limit_secs));
        let (row, _) = self
            .run_transition(gate, ControlEvent::OpenQuestion { index, deadline }, |row| {
                row.status = SessionStatus::Active;
                row.cursor = QuestionCursor::At(index);
                row.question_deadline = Some(deadline);
            })
            .await?;

        self.reset_tally(index).await;
        self.arm_countdown(index, deadline).await;
        self.publish(SessionEvent::QuestionStarted {
            question: QuestionPayload::new(
                question,
                index,
                self.quiz.questions.len(),
                unix_millis(deadline),
            ),
        });

        Ok(row)
    }

    async fn close_locked(&self, gate: &MutexGuard<'_, ()>) -> Result<TallyView, ServiceError> {
        let now = SystemTime::now();
        let (_, phase) = self
            .run_transition(gate, ControlEvent::CloseQuestion, |row| {
                row.question_deadline = Some(now);
            })
            .await?;

        self.reconcile().await;
        let tally = self.tally().await;
        if let Some(question_index) = phase.question_index() {
            self.publish(SessionEvent::QuestionClosed {
                question_index,
                tally: tally.clone(),
            });
        }
        Ok(tally)
    }

    async fn close_on_timer(&self, index: usize) {
        let gate = self.gate.lock().await;
        match self.phase().await {
            SessionPhase::QuestionActive { index: current, .. } if current == index => {
                if let Err(err) = self.close_locked(&gate).await {
                    error!(session_id = %self.session_id, question_index = index, error = %err, "failed to close question on timeout");
                }
            }
            _ => debug!(session_id = %self.session_id, question_index = index, "countdown fired for a question no longer active"),
        }
    }

    async fn open_first_question(&self) {
        let gate = self.gate.lock().await;
        if self.phase().await != SessionPhase::Starting {
            return;
        }
        if let Err(err) = self.open_question_locked(&gate, 0).await {
            error!(session_id = %self.session_id, error = %err, "failed to open the first question");
        }
    }

    async fn arm_countdown(&self, index: usize, deadline: SystemTime) {
        let weak = self.this.clone();
        let wait = deadline
            .duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO);
        let handle = tokio::spawn(async move {
            sleep(wait).await;
            if let Some(controller) = weak.upgrade() {
                controller.close_on_timer(index).await;
            }
        });

        if let Some(previous) = self.tasks.lock().await.countdown.replace(handle) {
            previous.abort();
        }
    }

    async fn arm_start_delay(&self) {
        let weak = self.this.clone();
        let delay = self.config.timing.start_delay();
        let handle = tokio::spawn(async move {
            sleep(delay).await;
            if let Some(controller) = weak.upgrade() {
                controller.open_first_question().await;
            }
        });

        if let Some(previous) = self.tasks.lock().await.start_delay.replace(handle) {
            previous.abort();
        }
    }

    async fn spawn_listener(&self) {
        let weak = self.this.clone();
        let session_id = self.session_id;
        let mut changes = self.store.subscribe_changes(session_id);
        let mut events = self.hub.subscribe(session_id);
        let period = self.config.timing.reconcile_interval();

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    change = changes.recv() => match change {
                        Ok(StoreChange::AnswerInserted(answer)) => {
                            let Some(controller) = weak.upgrade() else { break };
                            controller
                                .observe_answer(answer.player_id, answer.question_index, answer.option_id)
                                .await;
                        }
                        Ok(_) => {}
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(%session_id, skipped, "store change feed lagged; reconciling");
                            let Some(controller) = weak.upgrade() else { break };
                            controller.reconcile().await;
                        }
                        Err(RecvError::Closed) => break,
                    },
                    event = events.recv() => match event {
                        Ok(SessionEvent::AnswerSubmitted { player_id, question_index, option_id }) => {
                            let Some(controller) = weak.upgrade() else { break };
                            controller.observe_answer(player_id, question_index, option_id).await;
                        }
                        Ok(event) if event.is_terminal() => break,
                        Ok(_) | Err(RecvError::Lagged(_)) => {}
                        Err(RecvError::Closed) => break,
                    },
                    _ = ticker.tick() => {
                        let Some(controller) = weak.upgrade() else { break };
                        controller.reconcile().await;
                    }
                }
            }

            debug!(%session_id, "session listener stopped");
        });

        if let Some(previous) = self.tasks.lock().await.listener.replace(handle) {
            previous.abort();
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Ok(tasks) = self.tasks.try_lock() {
            for handle in [&tasks.start_delay, &tasks.countdown, &tasks.listener]
                .into_iter()
                .flatten()
            {
                handle.abort();
            }
        }
    }
}
