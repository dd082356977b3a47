use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use parley_agent::coach::SummaryOutcome;
use parley_agent::{AgentError, InterviewerAgent};
use parley_core::config::SessionTimingConfig;
use parley_core::types::{
    FeedbackEntry, ResponseType, SessionConfig, SessionStats, SessionStatus, SummaryStatus, Turn,
};
use parley_store::{ConversationRecord, SessionMeta, SessionRecord, SummaryRecord};

use crate::activity::ActivityClock;
use crate::coach::{CoachPipeline, GradingJob, SummaryJob};
use crate::error::{Result, SessionError};
use crate::history::{ConversationHistory, FeedbackLog};
use crate::persist::SnapshotWriter;

/// Session-level lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionPhase {
    Configured,
    Running,
    Completed,
    Abandoned,
}

impl SessionPhase {
    fn status(self) -> SessionStatus {
        match self {
            SessionPhase::Configured | SessionPhase::Running => SessionStatus::Active,
            SessionPhase::Completed => SessionStatus::Completed,
            SessionPhase::Abandoned => SessionStatus::Abandoned,
        }
    }
}

/// Per-turn sub-state within `Running`, serialized by the session mutex.
/// A second writer observing anything but `AwaitingUser` is rejected, which
/// keeps exactly one turn in flight per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TurnPhase {
    AwaitingUser,
    ProcessingUser,
    AwaitingAssistant,
    TurnCommitted,
}

/// What the idle sweeper should do with a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IdleVerdict {
    Active,
    Warning,
    Expired,
}

/// Result of `end()`: everything the coach has produced so far.
#[derive(Debug, Clone, Serialize)]
pub struct InterimResults {
    pub feedback: Vec<FeedbackEntry>,
    pub question_count: u32,
    pub summary_status: SummaryStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimeRemaining {
    pub status: SessionStatus,
    pub seconds_remaining: u64,
    pub warning: bool,
}

struct SessionState {
    phase: SessionPhase,
    turn_phase: TurnPhase,
    history: ConversationHistory,
    feedback: FeedbackLog,
    stats: SessionStats,
    summary: SummaryStatus,
    summary_in_flight: bool,
    /// Bumped by reset; a summary task claimed under an older epoch can
    /// never install into the state that replaced it.
    summary_epoch: u64,
    clock: ActivityClock,
}

impl SessionState {
    /// User turns that are committed (a provisional turn mid-generation is
    /// not observable to mergers).
    fn committed_user_turns(&self) -> usize {
        let count = self.history.user_turn_count();
        match self.turn_phase {
            TurnPhase::ProcessingUser | TurnPhase::AwaitingAssistant => count.saturating_sub(1),
            _ => count,
        }
    }

    fn touch_activity(&mut self) {
        self.clock.touch();
        self.stats.last_activity_at = Utc::now();
    }

    /// Committed view of the conversation: a provisional user turn that is
    /// still awaiting its assistant reply is excluded.
    fn committed_turns(&self) -> Vec<Turn> {
        let mut turns = self.history.turns().to_vec();
        if matches!(
            self.turn_phase,
            TurnPhase::ProcessingUser | TurnPhase::AwaitingAssistant
        ) && turns.last().map(Turn::is_user).unwrap_or(false)
        {
            turns.pop();
        }
        turns
    }
}

/// The per-session state machine.
///
/// All mutation happens under the internal mutex. External LLM calls run
/// with the mutex released: the send path appends a provisional user turn
/// under the lock, calls the interviewer outside it, then merges or rolls
/// back under the lock again, so no intermediate state is ever observable
/// and no lock is held while waiting on a rate-limit slot.
pub struct SessionOrchestrator {
    id: String,
    owner_id: Option<String>,
    config: SessionConfig,
    created_at: DateTime<Utc>,
    state: Mutex<SessionState>,
    interviewer: InterviewerAgent,
    pipeline: Arc<CoachPipeline>,
    writer: Arc<SnapshotWriter>,
}

impl std::fmt::Debug for SessionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionOrchestrator")
            .field("id", &self.id)
            .field("owner_id", &self.owner_id)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

impl SessionOrchestrator {
    pub(crate) fn new(
        id: String,
        owner_id: Option<String>,
        config: SessionConfig,
        interviewer: InterviewerAgent,
        pipeline: Arc<CoachPipeline>,
        writer: Arc<SnapshotWriter>,
        timing: SessionTimingConfig,
    ) -> Self {
        let now = Utc::now();
        let clock = Self::fresh_clock(&timing);
        Self {
            id,
            owner_id,
            config,
            created_at: now,
            state: Mutex::new(SessionState {
                phase: SessionPhase::Configured,
                turn_phase: TurnPhase::AwaitingUser,
                history: ConversationHistory::default(),
                feedback: FeedbackLog::default(),
                stats: SessionStats::new(now),
                summary: SummaryStatus::NotStarted,
                summary_in_flight: false,
                summary_epoch: 0,
                clock,
            }),
            interviewer,
            pipeline,
            writer,
        }
    }

    /// Rebuild a live orchestrator from its persisted records.
    pub(crate) fn from_record(
        record: SessionRecord,
        interviewer: InterviewerAgent,
        pipeline: Arc<CoachPipeline>,
        writer: Arc<SnapshotWriter>,
        timing: SessionTimingConfig,
    ) -> Self {
        let phase = match record.meta.status {
            SessionStatus::Active if record.conversation.turns.is_empty() => {
                SessionPhase::Configured
            }
            SessionStatus::Active => SessionPhase::Running,
            SessionStatus::Completed => SessionPhase::Completed,
            SessionStatus::Abandoned => SessionPhase::Abandoned,
        };
        // A summary persisted as generating may still have its task in
        // flight in this process; keep the single-flight flag set so the
        // merge is accepted and no duplicate is launched.
        let summary_in_flight = matches!(record.summary.status, SummaryStatus::Generating);
        let summary_epoch = record.summary.epoch;
        let clock = Self::fresh_clock(&timing);

        Self {
            id: record.meta.session_id,
            owner_id: record.meta.owner_id,
            config: record.meta.config,
            created_at: record.meta.created_at,
            state: Mutex::new(SessionState {
                phase,
                turn_phase: TurnPhase::AwaitingUser,
                history: ConversationHistory::new(record.conversation.turns),
                feedback: FeedbackLog::new(record.conversation.feedback),
                stats: record.meta.stats,
                summary: record.summary.status,
                summary_in_flight,
                summary_epoch,
                clock,
            }),
            interviewer,
            pipeline,
            writer,
        }
    }

    fn fresh_clock(timing: &SessionTimingConfig) -> ActivityClock {
        ActivityClock::new(
            Duration::from_secs(timing.idle_budget_minutes * 60),
            Duration::from_secs(timing.warning_threshold_minutes * 60),
        )
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn owner_id(&self) -> Option<&str> {
        self.owner_id.as_deref()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // State transitions
    // -----------------------------------------------------------------------

    /// Produce the opening interviewer turn and enter `Running`.
    ///
    /// On success exactly one assistant turn is appended; on failure the
    /// session returns to `Configured` and can be started again.
    pub async fn start(&self) -> Result<Turn> {
        {
            let mut st = self.state.lock().await;
            match st.phase {
                SessionPhase::Configured => {}
                SessionPhase::Abandoned => return Err(SessionError::TimedOut),
                _ => {
                    return Err(SessionError::InvalidState {
                        reason: "interview already started".into(),
                    })
                }
            }
            st.phase = SessionPhase::Running;
            st.turn_phase = TurnPhase::AwaitingAssistant;
            st.stats.started_at = Utc::now();
            st.touch_activity();
        }

        let result = self.interviewer.opening(&self.config).await;

        let (turn, snapshot) = {
            let mut st = self.state.lock().await;
            if st.phase == SessionPhase::Abandoned {
                return Err(SessionError::TimedOut);
            }
            match result {
                Err(e) => {
                    st.phase = SessionPhase::Configured;
                    st.turn_phase = TurnPhase::AwaitingUser;
                    return Err(SessionError::Agent(e));
                }
                Ok(reply) => {
                    let turn = Turn::interviewer(reply.text, reply.response_type);
                    st.history.push(turn.clone());
                    st.turn_phase = TurnPhase::AwaitingUser;
                    st.stats.llm_calls += 1;
                    st.stats.question_count += 1;
                    st.touch_activity();
                    (turn, self.snapshot_locked(&st))
                }
            }
        };

        info!(session_id = %self.id, "interview started");
        self.writer.submit(snapshot);
        Ok(turn)
    }

    /// Consume a user message and return the next interviewer turn.
    ///
    /// History grows by exactly two entries (user + assistant) on success
    /// and by zero on failure: the provisional user turn is rolled back
    /// whenever the interviewer call does not commit.
    pub async fn send_user_message(
        &self,
        text: &str,
        cancel: Option<CancellationToken>,
    ) -> Result<Turn> {
        if text.trim().is_empty() {
            return Err(SessionError::Validation("message must not be empty".into()));
        }

        // Phase 1 — under the lock: validate, append the provisional user
        // turn, snapshot everything the interviewer call needs.
        let (question, user_index, history_snapshot, should_close) = {
            let mut st = self.state.lock().await;
            match st.phase {
                SessionPhase::Running => {}
                SessionPhase::Abandoned => return Err(SessionError::TimedOut),
                SessionPhase::Completed => {
                    return Err(SessionError::InvalidState {
                        reason: "interview already ended".into(),
                    })
                }
                SessionPhase::Configured => {
                    return Err(SessionError::InvalidState {
                        reason: "interview not started".into(),
                    })
                }
            }
            if st.turn_phase != TurnPhase::AwaitingUser {
                return Err(SessionError::InvalidState {
                    reason: "another turn is in flight".into(),
                });
            }

            st.turn_phase = TurnPhase::ProcessingUser;
            let question = st
                .history
                .last_interviewer_text()
                .unwrap_or_default()
                .to_string();
            st.history.push(Turn::user(text));
            let user_index = st.history.user_turn_count() - 1;
            st.touch_activity();
            let should_close = self.should_close(&st);
            st.turn_phase = TurnPhase::AwaitingAssistant;
            (question, user_index, st.history.turns().to_vec(), should_close)
        };

        // Phase 2 — no lock held: the external call may wait on the llm
        // slot and retry with backoff without blocking anything else.
        let started = Instant::now();
        let result = match &cancel {
            Some(token) => tokio::select! {
                _ = token.cancelled() => Err(AgentError::Cancelled),
                r = self.interviewer.next_turn(&self.config, &history_snapshot, should_close) => r,
            },
            None => {
                self.interviewer
                    .next_turn(&self.config, &history_snapshot, should_close)
                    .await
            }
        };
        let latency_ms = started.elapsed().as_millis() as u64;

        // Phase 3 — under the lock again: commit both turns as one
        // observable step, or roll the provisional turn back.
        let (turn, snapshot, grading, summary_job) = {
            let mut st = self.state.lock().await;

            let reply = match result {
                Ok(reply) if st.phase == SessionPhase::Running => reply,
                outcome => {
                    st.history.pop_user_provisional();
                    st.turn_phase = TurnPhase::AwaitingUser;
                    return Err(match (outcome, st.phase) {
                        (_, SessionPhase::Abandoned) => SessionError::TimedOut,
                        (Err(e), _) => SessionError::Agent(e),
                        (Ok(_), _) => SessionError::InvalidState {
                            reason: "interview ended while the turn was in flight".into(),
                        },
                    });
                }
            };

            let turn = Turn::interviewer(reply.text, reply.response_type);
            st.history.push(turn.clone());
            st.turn_phase = TurnPhase::TurnCommitted;
            st.stats.llm_calls += 1;
            st.stats.total_answer_latency_ms += latency_ms;
            if matches!(
                reply.response_type,
                ResponseType::Question | ResponseType::FollowUp
            ) {
                st.stats.question_count += 1;
            }
            st.touch_activity();

            let mut summary_job = None;
            if reply.response_type == ResponseType::Closing {
                debug!(session_id = %self.id, "terminal condition reached, completing interview");
                st.phase = SessionPhase::Completed;
                summary_job = self.claim_summary(&mut st);
            }
            st.turn_phase = TurnPhase::AwaitingUser;

            let grading = GradingJob {
                session_id: self.id.clone(),
                config: self.config.clone(),
                turn_index: user_index,
                question,
                answer: text.to_string(),
            };
            (turn, self.snapshot_locked(&st), grading, summary_job)
        };

        self.writer.submit(snapshot);
        self.pipeline.spawn_grading(grading);
        if let Some(job) = summary_job {
            self.pipeline.spawn_summary(job);
        }
        Ok(turn)
    }

    /// End the interview and return everything graded so far.
    ///
    /// Idempotent: repeated calls return the current interim view and never
    /// launch a second summary task.
    pub async fn end(&self) -> Result<InterimResults> {
        let (interim, snapshot, summary_job) = {
            let mut st = self.state.lock().await;
            match st.phase {
                SessionPhase::Abandoned => return Err(SessionError::TimedOut),
                SessionPhase::Configured => {
                    return Err(SessionError::InvalidState {
                        reason: "interview not started".into(),
                    })
                }
                SessionPhase::Completed => {
                    return Ok(Self::interim_locked(&st));
                }
                SessionPhase::Running => {}
            }

            st.phase = SessionPhase::Completed;
            let summary_job = self.claim_summary(&mut st);
            st.touch_activity();
            (Self::interim_locked(&st), self.snapshot_locked(&st), summary_job)
        };

        info!(session_id = %self.id, "interview ended");
        self.writer.submit(snapshot);
        if let Some(job) = summary_job {
            self.pipeline.spawn_summary(job);
        }
        Ok(interim)
    }

    /// Wipe conversation, feedback, stats, and summary; keep the id and
    /// config; return to `Configured`.
    pub async fn reset(&self) -> Result<()> {
        let snapshot = {
            let mut st = self.state.lock().await;
            let now = Utc::now();
            st.history.clear();
            st.feedback.clear();
            st.stats = SessionStats::new(now);
            st.summary = SummaryStatus::NotStarted;
            st.summary_in_flight = false;
            st.summary_epoch += 1;
            st.phase = SessionPhase::Configured;
            st.turn_phase = TurnPhase::AwaitingUser;
            st.touch_activity();
            self.snapshot_locked(&st)
        };
        info!(session_id = %self.id, "session reset");
        self.writer.submit(snapshot);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Read-only views
    // -----------------------------------------------------------------------

    pub async fn history(&self) -> Vec<Turn> {
        let st = self.state.lock().await;
        st.history.turns().to_vec()
    }

    pub async fn stats(&self) -> SessionStats {
        let st = self.state.lock().await;
        st.stats.clone()
    }

    pub async fn per_turn_feedback(&self) -> Vec<FeedbackEntry> {
        let st = self.state.lock().await;
        st.feedback.entries().to_vec()
    }

    pub async fn summary_status(&self) -> SummaryStatus {
        let st = self.state.lock().await;
        st.summary.clone()
    }

    pub async fn status(&self) -> SessionStatus {
        let st = self.state.lock().await;
        st.phase.status()
    }

    pub async fn time_remaining(&self) -> TimeRemaining {
        let st = self.state.lock().await;
        let seconds = match st.phase {
            SessionPhase::Abandoned => 0,
            _ => st.clock.time_remaining().as_secs(),
        };
        TimeRemaining {
            status: st.phase.status(),
            seconds_remaining: seconds,
            warning: st.clock.warned(),
        }
    }

    /// Extend the idle deadline. Returns the new time-to-expiry.
    ///
    /// Completed sessions accept the ping as a no-op (clients may keep
    /// polling for the summary); abandoned sessions reject it.
    pub async fn ping(&self) -> Result<Duration> {
        let (remaining, snapshot) = {
            let mut st = self.state.lock().await;
            match st.phase {
                SessionPhase::Abandoned => return Err(SessionError::TimedOut),
                SessionPhase::Completed => return Ok(st.clock.time_remaining()),
                _ => {}
            }
            let budget = st.clock.ping();
            st.stats.last_activity_at = Utc::now();
            (budget, self.snapshot_locked(&st))
        };
        self.writer.submit(snapshot);
        Ok(remaining)
    }

    // -----------------------------------------------------------------------
    // Background merge points
    // -----------------------------------------------------------------------

    /// Install one per-turn feedback entry at its index.
    ///
    /// Re-merging the same index replaces the entry, so at-least-once
    /// delivery from the grading worker is safe.
    pub(crate) async fn merge_feedback(&self, entry: FeedbackEntry) -> Result<()> {
        let snapshot = {
            let mut st = self.state.lock().await;
            let committed = st.committed_user_turns();
            let is_error = entry.error;
            st.feedback.merge(entry, committed)?;
            if !is_error {
                st.stats.llm_calls += 1;
            }
            st.touch_activity();
            self.snapshot_locked(&st)
        };
        self.writer.submit(snapshot);
        Ok(())
    }

    /// Install the terminal summary (or its error outcome).
    pub(crate) async fn install_summary(
        &self,
        epoch: u64,
        outcome: std::result::Result<SummaryOutcome, String>,
    ) {
        let snapshot = {
            let mut st = self.state.lock().await;
            if st.summary_epoch != epoch
                || !st.summary_in_flight
                || !matches!(st.summary, SummaryStatus::Generating)
            {
                // A reset raced the summary task; drop the stale result.
                warn!(session_id = %self.id, "discarding summary result for superseded state");
                return;
            }
            st.summary_in_flight = false;
            match outcome {
                Ok(o) => {
                    st.stats.llm_calls += o.llm_calls;
                    st.stats.search_calls += o.search_calls;
                    st.summary = SummaryStatus::Completed { summary: o.summary };
                }
                Err(message) => {
                    st.summary = SummaryStatus::Error { message };
                }
            }
            st.touch_activity();
            self.snapshot_locked(&st)
        };
        info!(session_id = %self.id, "final summary installed");
        self.writer.submit(snapshot);
    }

    // -----------------------------------------------------------------------
    // Registry / sweeper hooks
    // -----------------------------------------------------------------------

    /// Consult the activity clock; latches the warning flag when inside the
    /// warning window.
    pub(crate) async fn idle_verdict(&self) -> IdleVerdict {
        let mut st = self.state.lock().await;
        if st.clock.expired() {
            IdleVerdict::Expired
        } else if st.clock.in_warning_window() {
            st.clock.mark_warned();
            IdleVerdict::Warning
        } else {
            IdleVerdict::Active
        }
    }

    /// Mark the session abandoned if still active; returns the flushable
    /// snapshot either way.
    pub(crate) async fn mark_abandoned(&self) -> SessionRecord {
        let mut st = self.state.lock().await;
        if !st.phase.status().is_terminal() {
            st.phase = SessionPhase::Abandoned;
        }
        self.snapshot_locked(&st)
    }

    /// Abandon only when the idle deadline has actually passed, so a send
    /// that raced the sweeper and touched the clock wins. Returns the
    /// snapshot when the session was abandoned.
    pub(crate) async fn mark_abandoned_if_expired(&self) -> Option<SessionRecord> {
        let mut st = self.state.lock().await;
        if !st.clock.expired() {
            return None;
        }
        if !st.phase.status().is_terminal() {
            st.phase = SessionPhase::Abandoned;
        }
        Some(self.snapshot_locked(&st))
    }

    /// Point-in-time committed view for persistence.
    pub(crate) async fn snapshot(&self) -> SessionRecord {
        let st = self.state.lock().await;
        self.snapshot_locked(&st)
    }

    pub(crate) async fn flush(&self, record: &SessionRecord) -> Result<()> {
        self.writer.flush(record).await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    /// Whether the next interviewer turn should close the interview.
    fn should_close(&self, st: &SessionState) -> bool {
        if self.config.use_time_based {
            let elapsed = Utc::now().signed_duration_since(st.stats.started_at);
            elapsed.num_minutes() >= self.config.duration_minutes as i64
        } else {
            st.stats.question_count >= self.config.target_question_count()
        }
    }

    /// Set the single-flight flag and capture the summary inputs. Returns
    /// `None` when a summary is already in flight or terminal.
    fn claim_summary(&self, st: &mut SessionState) -> Option<SummaryJob> {
        if st.summary_in_flight || st.summary.is_terminal() {
            return None;
        }
        st.summary_in_flight = true;
        st.summary = SummaryStatus::Generating;
        Some(SummaryJob {
            session_id: self.id.clone(),
            epoch: st.summary_epoch,
            config: self.config.clone(),
            turns: st.committed_turns(),
            feedback: st.feedback.entries().to_vec(),
        })
    }

    fn interim_locked(st: &SessionState) -> InterimResults {
        InterimResults {
            feedback: st.feedback.entries().to_vec(),
            question_count: st.stats.question_count,
            summary_status: st.summary.clone(),
        }
    }

    /// Build the committed-state snapshot: persisted snapshots only ever
    /// reflect a state after a whole transition.
    fn snapshot_locked(&self, st: &SessionState) -> SessionRecord {
        let turns = st.committed_turns();
        SessionRecord {
            meta: SessionMeta {
                session_id: self.id.clone(),
                owner_id: self.owner_id.clone(),
                status: st.phase.status(),
                config: self.config.clone(),
                stats: st.stats.clone(),
                created_at: self.created_at,
                updated_at: Utc::now(),
            },
            conversation: ConversationRecord {
                session_id: self.id.clone(),
                turns,
                feedback: st.feedback.entries().to_vec(),
            },
            summary: SummaryRecord {
                session_id: self.id.clone(),
                status: st.summary.clone(),
                epoch: st.summary_epoch,
            },
        }
    }
}
