use std::sync::{Arc, Weak};

use chrono::Utc;
use tokio::time::{sleep, timeout, Duration};
use tracing::{error, info, warn};

use parley_agent::AgentFactory;
use parley_core::config::SessionTimingConfig;
use parley_core::types::{FeedbackEntry, SessionConfig, Turn};

use crate::registry::SessionRegistry;

/// Delay between grading attempts, doubled each retry.
const GRADING_RETRY_BASE_MS: u64 = 500;

/// Inputs for grading one committed user turn.
#[derive(Debug, Clone)]
pub(crate) struct GradingJob {
    pub session_id: String,
    pub config: SessionConfig,
    pub turn_index: usize,
    pub question: String,
    pub answer: String,
}

/// Snapshot handed to the terminal summarizer at claim time.
#[derive(Debug, Clone)]
pub(crate) struct SummaryJob {
    pub session_id: String,
    /// The claiming state's summary epoch; guards installs against reset.
    pub epoch: u64,
    pub config: SessionConfig,
    pub turns: Vec<Turn>,
    pub feedback: Vec<FeedbackEntry>,
}

/// Background coach workers: the per-turn grader and the terminal
/// summarizer.
///
/// Workers never touch session state directly — every result re-enters
/// through the registry and merges under the session mutex. A session that
/// was evicted in the meantime is re-hydrated by `acquire`, so results are
/// never lost to eviction.
pub struct CoachPipeline {
    registry: Weak<SessionRegistry>,
    agents: AgentFactory,
    timing: SessionTimingConfig,
}

impl CoachPipeline {
    pub(crate) fn new(
        registry: Weak<SessionRegistry>,
        agents: AgentFactory,
        timing: SessionTimingConfig,
    ) -> Self {
        Self { registry, agents, timing }
    }

    /// Grade one user turn in the background. Jobs are spawned in
    /// turn-index order; completions may interleave, which is fine because
    /// each merge lands at its own index.
    pub(crate) fn spawn_grading(self: &Arc<Self>, job: GradingJob) {
        let this = self.clone();
        tokio::spawn(async move { this.run_grading(job).await });
    }

    async fn run_grading(&self, job: GradingJob) {
        let coach = self.agents.coach();
        let budget = Duration::from_secs(self.timing.grading_budget_seconds);
        let max_attempts = self.timing.grading_max_attempts.max(1);
        let mut delay_ms = GRADING_RETRY_BASE_MS;
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            let outcome = timeout(
                budget,
                coach.evaluate_answer(&job.config, &job.question, &job.answer),
            )
            .await;

            match outcome {
                Ok(Ok(feedback)) => {
                    self.merge_grading(&job, feedback, false).await;
                    return;
                }
                Ok(Err(e)) => {
                    last_error = e.to_string();
                }
                Err(_) => {
                    last_error = format!(
                        "grading exceeded its {}s budget",
                        self.timing.grading_budget_seconds
                    );
                }
            }

            if attempt < max_attempts {
                warn!(
                    session_id = %job.session_id,
                    turn_index = job.turn_index,
                    attempt,
                    error = %last_error,
                    "grading attempt failed, retrying"
                );
                sleep(Duration::from_millis(delay_ms)).await;
                delay_ms *= 2;
            }
        }

        // Terminal failure: record an error entry at the index so the
        // per-turn log stays gap-free and ordered.
        warn!(
            session_id = %job.session_id,
            turn_index = job.turn_index,
            error = %last_error,
            "grading failed terminally"
        );
        self.merge_grading(&job, format!("Feedback unavailable: {last_error}"), true)
            .await;
    }

    async fn merge_grading(&self, job: &GradingJob, feedback: String, is_error: bool) {
        let entry = FeedbackEntry {
            turn_index: job.turn_index,
            question: job.question.clone(),
            answer: job.answer.clone(),
            feedback,
            error: is_error,
            created_at: Utc::now(),
        };

        let Some(registry) = self.registry.upgrade() else {
            return; // process shutting down
        };
        match registry.acquire(&job.session_id).await {
            Ok(orchestrator) => {
                if let Err(e) = orchestrator.merge_feedback(entry).await {
                    error!(
                        session_id = %job.session_id,
                        turn_index = job.turn_index,
                        error = %e,
                        "feedback merge rejected"
                    );
                }
            }
            Err(e) => {
                warn!(
                    session_id = %job.session_id,
                    error = %e,
                    "cannot merge feedback, session unavailable"
                );
            }
        }
    }

    /// Produce and install the terminal summary. Launched at most once per
    /// completed session (the orchestrator owns the single-flight flag).
    pub(crate) fn spawn_summary(self: &Arc<Self>, job: SummaryJob) {
        let this = self.clone();
        tokio::spawn(async move { this.run_summary(job).await });
    }

    async fn run_summary(&self, job: SummaryJob) {
        info!(session_id = %job.session_id, "generating final summary");
        let coach = self.agents.coach();
        let budget = Duration::from_secs(self.timing.summary_budget_seconds);

        let outcome = match timeout(
            budget,
            coach.summarize_session(&job.config, &job.turns, &job.feedback),
        )
        .await
        {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!(
                "final summary exceeded its {}s budget",
                self.timing.summary_budget_seconds
            )),
        };

        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        match registry.acquire(&job.session_id).await {
            Ok(orchestrator) => orchestrator.install_summary(job.epoch, outcome).await,
            Err(e) => warn!(
                session_id = %job.session_id,
                error = %e,
                "cannot install summary, session unavailable"
            ),
        }
    }
}
