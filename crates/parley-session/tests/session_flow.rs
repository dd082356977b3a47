//! End-to-end exercises of the session layer against scripted agents and an
//! in-memory store: lifecycle, rollback, background grading, summaries,
//! hydration, and idle timeout.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use parley_agent::testing::StaticSearch;
use parley_agent::{AgentError, AgentFactory, GenerateParams, LlmClient, RetryPolicy};
use parley_core::config::{LimitsConfig, SessionTimingConfig};
use parley_core::types::{
    AgentTag, Difficulty, InterviewStyle, ResponseType, SessionConfig, SessionStatus,
    SummaryStatus, TurnRole,
};
use parley_limits::RateLimitFabric;
use parley_session::{IdleSweeper, SessionError, SessionRegistry};
use parley_store::{SessionStore, SqliteStore, StoreError};

// ---------------------------------------------------------------------------
// Prompt-routed LLM fake
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Route {
    Opening,
    NextTurn,
    Evaluate,
    Summary,
}

fn classify(prompt: &str) -> Route {
    if prompt.contains("Open the interview") {
        Route::Opening
    } else if prompt.contains("single JSON object") {
        Route::Summary
    } else if prompt.contains("actionable feedback") {
        Route::Evaluate
    } else {
        Route::NextTurn
    }
}

/// Deterministic fake: replies depend on which prompt family arrives, so
/// interviewer, grader, and summarizer traffic never interfere even when
/// they run concurrently. Failures and delays are injectable per route.
struct RoutedLlm {
    failures: Mutex<HashMap<Route, VecDeque<AgentError>>>,
    delays: Mutex<HashMap<Route, std::time::Duration>>,
    calls: Mutex<HashMap<Route, u32>>,
}

impl RoutedLlm {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            failures: Mutex::new(HashMap::new()),
            delays: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
        })
    }

    fn fail_next(&self, route: Route, err: AgentError) {
        self.failures.lock().unwrap().entry(route).or_default().push_back(err);
    }

    fn set_delay(&self, route: Route, delay: std::time::Duration) {
        self.delays.lock().unwrap().insert(route, delay);
    }

    fn calls(&self, route: Route) -> u32 {
        *self.calls.lock().unwrap().get(&route).unwrap_or(&0)
    }
}

#[async_trait]
impl LlmClient for RoutedLlm {
    fn name(&self) -> &str {
        "routed"
    }

    async fn generate(&self, prompt: &str, _params: &GenerateParams) -> Result<String, AgentError> {
        let route = classify(prompt);
        *self.calls.lock().unwrap().entry(route).or_insert(0) += 1;

        let delay = self.delays.lock().unwrap().get(&route).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let injected = self.failures.lock().unwrap().get_mut(&route).and_then(|q| q.pop_front());
        if let Some(err) = injected {
            return Err(err);
        }

        Ok(match route {
            Route::Opening => "Welcome to the interview. Please introduce yourself.".to_string(),
            Route::NextTurn => {
                if prompt.contains("do not ask another question") {
                    "CLOSING: Thank you, that is all we have time for today.".to_string()
                } else {
                    "QUESTION: Can you walk me through a recent project?".to_string()
                }
            }
            Route::Evaluate => "Clear answer with a concrete example.".to_string(),
            Route::Summary => r#"{"patterns": ["answers with examples"],
                "strengths": ["structured thinking"],
                "weaknesses": ["short on metrics"],
                "improvement_areas": ["quantify outcomes"],
                "search_topics": ["behavioural interview metrics"]}"#
                .to_string(),
        })
    }
}

/// A store whose writes always fail, for no-leak checks.
struct FailingStore;

#[async_trait]
impl SessionStore for FailingStore {
    async fn create(&self, _: &parley_store::SessionRecord) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("store offline".into()))
    }
    async fn put_snapshot(&self, _: &parley_store::SessionRecord) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("store offline".into()))
    }
    async fn put_meta(&self, _: &parley_store::SessionMeta) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("store offline".into()))
    }
    async fn get_meta(&self, _: &str) -> Result<Option<parley_store::SessionMeta>, StoreError> {
        Err(StoreError::Unavailable("store offline".into()))
    }
    async fn put_conversation(&self, _: &parley_store::ConversationRecord) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("store offline".into()))
    }
    async fn get_conversation(
        &self,
        _: &str,
    ) -> Result<Option<parley_store::ConversationRecord>, StoreError> {
        Err(StoreError::Unavailable("store offline".into()))
    }
    async fn put_summary(&self, _: &parley_store::SummaryRecord) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("store offline".into()))
    }
    async fn get_summary(&self, _: &str) -> Result<Option<parley_store::SummaryRecord>, StoreError> {
        Err(StoreError::Unavailable("store offline".into()))
    }
    async fn load(&self, _: &str) -> Result<Option<parley_store::SessionRecord>, StoreError> {
        Err(StoreError::Unavailable("store offline".into()))
    }
    async fn list_for_owner(
        &self,
        _: &str,
        _: usize,
    ) -> Result<Vec<parley_store::SessionMeta>, StoreError> {
        Err(StoreError::Unavailable("store offline".into()))
    }
    async fn put_task(&self, _: &parley_core::types::SpeechTask) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("store offline".into()))
    }
    async fn get_task(&self, _: &str) -> Result<Option<parley_core::types::SpeechTask>, StoreError> {
        Err(StoreError::Unavailable("store offline".into()))
    }
    async fn list_tasks(&self, _: &str) -> Result<Vec<parley_core::types::SpeechTask>, StoreError> {
        Err(StoreError::Unavailable("store offline".into()))
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    registry: Arc<SessionRegistry>,
    store: Arc<SqliteStore>,
    llm: Arc<RoutedLlm>,
}

fn timing() -> SessionTimingConfig {
    SessionTimingConfig {
        idle_budget_minutes: 15,
        warning_threshold_minutes: 2,
        sweep_interval_seconds: 60,
        summary_budget_seconds: 5,
        grading_budget_seconds: 5,
        grading_max_attempts: 2,
    }
}

fn harness() -> Harness {
    let llm = RoutedLlm::new();
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let agents = AgentFactory::new(
        llm.clone(),
        Arc::new(StaticSearch),
        Arc::new(RateLimitFabric::new(&LimitsConfig::default())),
        RetryPolicy { max_attempts: 3, base_delay_ms: 1, max_delay_ms: 4 },
    );
    let registry = SessionRegistry::new(store.clone(), agents, timing());
    Harness { registry, store, llm }
}

fn config(use_time_based: bool, duration_minutes: u32) -> SessionConfig {
    SessionConfig {
        target_role: "Software Engineer".into(),
        role_description: None,
        resume_text: None,
        style: InterviewStyle::Formal,
        difficulty: Difficulty::Medium,
        company: None,
        duration_minutes,
        use_time_based,
    }
}

/// Poll `check` every 10 ms until it returns true or ~3 s pass.
async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..300 {
        if check().await {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    false
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn happy_path_count_terminated_interview() {
    let h = harness();
    // duration 6, count-based: closes after 3 questions (intro included).
    let id = h.registry.create(config(false, 6), Some("u-1".into())).await.unwrap();
    let session = h.registry.acquire(&id).await.unwrap();

    let intro = session.start().await.unwrap();
    assert_eq!(intro.role, TurnRole::Assistant);
    assert_eq!(intro.agent, Some(AgentTag::Interviewer));
    assert_eq!(intro.response_type, ResponseType::Introduction);

    let reply = session
        .send_user_message("I have five years of backend experience.", None)
        .await
        .unwrap();
    assert_eq!(reply.response_type, ResponseType::Question);
    assert_eq!(session.history().await.len(), 3);

    // Per-turn grading merges in the background, referencing the intro.
    assert!(
        eventually(|| async {
            let feedback = session.per_turn_feedback().await;
            feedback.len() == 1
        })
        .await
    );
    let feedback = session.per_turn_feedback().await;
    assert_eq!(feedback[0].turn_index, 0);
    assert!(feedback[0].question.contains("introduce yourself"));
    assert_eq!(feedback[0].answer, "I have five years of backend experience.");
    assert!(!feedback[0].error);

    // Question 2, then the terminal condition closes the interview.
    session.send_user_message("I led the payments rewrite.", None).await.unwrap();
    let closing = session
        .send_user_message("I mostly work in Rust and Go.", None)
        .await
        .unwrap();
    assert_eq!(closing.response_type, ResponseType::Closing);
    assert_eq!(session.status().await, SessionStatus::Completed);

    // The summary completes with recommended resources.
    assert!(
        eventually(|| async {
            matches!(session.summary_status().await, SummaryStatus::Completed { .. })
        })
        .await
    );
    let SummaryStatus::Completed { summary } = session.summary_status().await else {
        panic!("summary must be completed");
    };
    assert_eq!(summary.patterns, vec!["answers with examples"]);
    assert!(!summary.resources.is_empty());
    assert_eq!(h.llm.calls(Route::Summary), 1);
}

#[tokio::test]
async fn explicit_end_returns_interim_and_is_idempotent() {
    let h = harness();
    let id = h.registry.create(config(true, 5), None).await.unwrap();
    let session = h.registry.acquire(&id).await.unwrap();

    session.start().await.unwrap();
    session.send_user_message("I focus on reliability work.", None).await.unwrap();

    let interim = session.end().await.unwrap();
    assert_eq!(interim.question_count, 2);

    // A second end changes nothing and launches no second summary.
    let again = session.end().await.unwrap();
    assert_eq!(again.question_count, interim.question_count);

    let err = session.send_user_message("too late", None).await.unwrap_err();
    assert!(matches!(err, SessionError::InvalidState { .. }));

    assert!(
        eventually(|| async {
            matches!(session.summary_status().await, SummaryStatus::Completed { .. })
        })
        .await
    );
    assert_eq!(h.llm.calls(Route::Summary), 1);
}

#[tokio::test]
async fn state_machine_rejects_out_of_order_operations() {
    let h = harness();
    let id = h.registry.create(config(true, 5), None).await.unwrap();
    let session = h.registry.acquire(&id).await.unwrap();

    // Send before start.
    let err = session.send_user_message("hello?", None).await.unwrap_err();
    assert!(matches!(err, SessionError::InvalidState { .. }));

    session.start().await.unwrap();

    // Start twice.
    let err = session.start().await.unwrap_err();
    assert!(matches!(err, SessionError::InvalidState { .. }));

    // Empty message.
    let err = session.send_user_message("   ", None).await.unwrap_err();
    assert!(matches!(err, SessionError::Validation(_)));
}

#[tokio::test]
async fn reset_then_start_matches_fresh_session_shape() {
    let h = harness();
    let id = h.registry.create(config(true, 5), None).await.unwrap();
    let session = h.registry.acquire(&id).await.unwrap();

    session.start().await.unwrap();
    session.send_user_message("First pass answer.", None).await.unwrap();
    session.end().await.unwrap();

    session.reset().await.unwrap();
    assert!(session.history().await.is_empty());
    assert!(session.per_turn_feedback().await.is_empty());
    assert_eq!(session.summary_status().await, SummaryStatus::NotStarted);
    assert_eq!(session.stats().await.question_count, 0);

    let intro = session.start().await.unwrap();
    assert_eq!(intro.role, TurnRole::Assistant);
    assert_eq!(intro.agent, Some(AgentTag::Interviewer));
    assert_eq!(intro.response_type, ResponseType::Introduction);
}

// ---------------------------------------------------------------------------
// Failure semantics
// ---------------------------------------------------------------------------

#[tokio::test]
async fn transient_interviewer_failures_are_retried_internally() {
    let h = harness();
    let id = h.registry.create(config(true, 5), None).await.unwrap();
    let session = h.registry.acquire(&id).await.unwrap();
    session.start().await.unwrap();

    h.llm.fail_next(Route::NextTurn, AgentError::Api { status: 503, message: "busy".into() });
    h.llm.fail_next(Route::NextTurn, AgentError::Timeout);

    session.send_user_message("Retry me.", None).await.unwrap();
    assert_eq!(session.history().await.len(), 3);
}

#[tokio::test]
async fn permanent_interviewer_failure_rolls_back_user_turn() {
    let h = harness();
    let id = h.registry.create(config(true, 5), None).await.unwrap();
    let session = h.registry.acquire(&id).await.unwrap();
    session.start().await.unwrap();

    // Non-transient: fails without retry.
    h.llm.fail_next(Route::NextTurn, AgentError::Api { status: 400, message: "bad".into() });

    let err = session.send_user_message("This will fail.", None).await.unwrap_err();
    assert!(matches!(err, SessionError::Agent(_)));

    // History must be exactly as before the send: the intro only.
    let history = session.history().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].role, TurnRole::Assistant);

    // The session stays usable: the same message can be retried.
    session.send_user_message("This will fail.", None).await.unwrap();
    assert_eq!(session.history().await.len(), 3);
}

#[tokio::test]
async fn concurrent_sends_commit_exactly_one_turn_pair() {
    let h = harness();
    let id = h.registry.create(config(true, 5), None).await.unwrap();
    let session = h.registry.acquire(&id).await.unwrap();
    session.start().await.unwrap();

    h.llm.set_delay(Route::NextTurn, std::time::Duration::from_millis(100));

    let s1 = session.clone();
    let s2 = session.clone();
    let (r1, r2) = tokio::join!(
        tokio::spawn(async move { s1.send_user_message("first", None).await }),
        tokio::spawn(async move { s2.send_user_message("second", None).await }),
    );
    let outcomes = [r1.unwrap(), r2.unwrap()];

    let successes = outcomes.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1);
    assert!(outcomes
        .iter()
        .any(|r| matches!(r, Err(SessionError::InvalidState { .. }))));

    // Exactly one user/assistant pair landed on top of the intro.
    assert_eq!(session.history().await.len(), 3);
}

#[tokio::test]
async fn grading_failure_records_error_entry_at_index() {
    let h = harness();
    let id = h.registry.create(config(true, 5), None).await.unwrap();
    let session = h.registry.acquire(&id).await.unwrap();
    session.start().await.unwrap();

    // Both grading attempts fail terminally (non-transient inside the
    // coach, and again on the pipeline's second try).
    for _ in 0..2 {
        h.llm.fail_next(Route::Evaluate, AgentError::Parse("no feedback".into()));
    }

    session.send_user_message("Grade this.", None).await.unwrap();

    assert!(
        eventually(|| async { session.per_turn_feedback().await.len() == 1 }).await
    );
    let feedback = session.per_turn_feedback().await;
    assert!(feedback[0].error);
    assert_eq!(feedback[0].turn_index, 0);
    assert!(feedback[0].feedback.contains("Feedback unavailable"));
}

#[tokio::test]
async fn summary_failure_surfaces_error_status() {
    let h = harness();
    let id = h.registry.create(config(true, 5), None).await.unwrap();
    let session = h.registry.acquire(&id).await.unwrap();
    session.start().await.unwrap();

    h.llm.fail_next(Route::Summary, AgentError::Api { status: 400, message: "rejected".into() });
    session.end().await.unwrap();

    assert!(
        eventually(|| async {
            matches!(session.summary_status().await, SummaryStatus::Error { .. })
        })
        .await
    );
}

// ---------------------------------------------------------------------------
// Registry behaviour
// ---------------------------------------------------------------------------

#[tokio::test]
async fn release_then_acquire_rehydrates_state() {
    let h = harness();
    let id = h.registry.create(config(true, 5), Some("u-9".into())).await.unwrap();
    let session = h.registry.acquire(&id).await.unwrap();
    session.start().await.unwrap();
    session.send_user_message("Persist me.", None).await.unwrap();

    h.registry.release(&id).await.unwrap();
    assert_eq!(h.registry.live_count(), 0);

    let rehydrated = h.registry.acquire(&id).await.unwrap();
    assert_eq!(rehydrated.history().await.len(), 3);
    assert_eq!(rehydrated.owner_id(), Some("u-9"));
    assert_eq!(rehydrated.status().await, SessionStatus::Active);
}

#[tokio::test]
async fn concurrent_acquires_observe_one_orchestrator() {
    let h = harness();
    let id = h.registry.create(config(true, 5), None).await.unwrap();
    h.registry.release(&id).await.unwrap();

    let (a, b) = tokio::join!(h.registry.acquire(&id), h.registry.acquire(&id));
    let (a, b) = (a.unwrap(), b.unwrap());
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(h.registry.live_count(), 1);
}

#[tokio::test]
async fn acquire_unknown_session_is_not_found() {
    let h = harness();
    let err = h.registry.acquire("no-such-id").await.unwrap_err();
    assert!(matches!(err, SessionError::NotFound { .. }));
}

#[tokio::test]
async fn failed_create_publishes_nothing() {
    let llm = RoutedLlm::new();
    let agents = AgentFactory::new(
        llm,
        Arc::new(StaticSearch),
        Arc::new(RateLimitFabric::new(&LimitsConfig::default())),
        RetryPolicy::none(),
    );
    let registry = SessionRegistry::new(Arc::new(FailingStore), agents, timing());

    let err = registry.create(config(true, 5), None).await.unwrap_err();
    assert!(matches!(err, SessionError::Storage(_)));
    assert_eq!(registry.live_count(), 0);
}

#[tokio::test]
async fn cleanup_is_idempotent_and_marks_abandoned() {
    let h = harness();
    let id = h.registry.create(config(true, 5), None).await.unwrap();
    let session = h.registry.acquire(&id).await.unwrap();
    session.start().await.unwrap();

    h.registry.cleanup(&id).await.unwrap();
    let stored = h.store.load(&id).await.unwrap().unwrap();
    assert_eq!(stored.meta.status, SessionStatus::Abandoned);
    let first_updated = stored.meta.updated_at;

    // Second cleanup succeeds without modifying the record further.
    h.registry.cleanup(&id).await.unwrap();
    let stored = h.store.load(&id).await.unwrap().unwrap();
    assert_eq!(stored.meta.updated_at, first_updated);

    // The abandoned session rejects further interaction.
    let rehydrated = h.registry.acquire(&id).await.unwrap();
    let err = rehydrated.send_user_message("anyone there?", None).await.unwrap_err();
    assert!(matches!(err, SessionError::TimedOut));
    assert!(matches!(rehydrated.ping().await, Err(SessionError::TimedOut)));
}

#[tokio::test]
async fn store_reflects_final_state_after_rapid_transitions() {
    let h = harness();
    let id = h.registry.create(config(true, 5), None).await.unwrap();
    let session = h.registry.acquire(&id).await.unwrap();
    session.start().await.unwrap();
    session.send_user_message("one", None).await.unwrap();
    session.send_user_message("two", None).await.unwrap();

    // The coalescing writer must converge on the latest snapshot.
    let store = h.store.clone();
    assert!(
        eventually(|| {
            let store = store.clone();
            let id = id.clone();
            async move {
                store
                    .load(&id)
                    .await
                    .unwrap()
                    .map(|r| r.conversation.turns.len() == 5)
                    .unwrap_or(false)
            }
        })
        .await
    );
}

// ---------------------------------------------------------------------------
// Idle timeout
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn sweeper_warns_then_abandons_idle_sessions() {
    let h = harness();
    let id = h.registry.create(config(true, 5), None).await.unwrap();
    let session = h.registry.acquire(&id).await.unwrap();

    let sweeper = IdleSweeper::new(h.registry.clone(), &timing());

    // Two minutes in: plenty of time left, no warning.
    tokio::time::advance(std::time::Duration::from_secs(120)).await;
    sweeper.sweep().await;
    let remaining = session.time_remaining().await;
    assert_eq!(remaining.status, SessionStatus::Active);
    assert!(!remaining.warning);

    // Inside the warning window (≤ 2 minutes remaining).
    tokio::time::advance(std::time::Duration::from_secs(12 * 60)).await;
    sweeper.sweep().await;
    assert!(session.time_remaining().await.warning);

    // Past the deadline: the next sweep abandons and evicts.
    tokio::time::advance(std::time::Duration::from_secs(2 * 60)).await;
    sweeper.sweep().await;
    assert_eq!(h.registry.live_count(), 0);
    assert_eq!(session.time_remaining().await.status, SessionStatus::Abandoned);
    assert_eq!(session.time_remaining().await.seconds_remaining, 0);
}

#[tokio::test(start_paused = true)]
async fn ping_during_warning_window_extends_full_budget() {
    let h = harness();
    let id = h.registry.create(config(true, 5), None).await.unwrap();
    let session = h.registry.acquire(&id).await.unwrap();

    tokio::time::advance(std::time::Duration::from_secs(13 * 60)).await;
    assert!(session.time_remaining().await.seconds_remaining <= 2 * 60);

    let budget = session.ping().await.unwrap();
    assert_eq!(budget.as_secs(), 15 * 60);
    assert_eq!(session.time_remaining().await.seconds_remaining, 15 * 60);

    // A sweep right after the ping must not abandon the session.
    IdleSweeper::new(h.registry.clone(), &timing()).sweep().await;
    assert_eq!(h.registry.live_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn send_racing_expiry_sees_clean_timeout() {
    let h = harness();
    let id = h.registry.create(config(true, 5), None).await.unwrap();
    let session = h.registry.acquire(&id).await.unwrap();

    tokio::time::advance(std::time::Duration::from_secs(16 * 60)).await;
    IdleSweeper::new(h.registry.clone(), &timing()).sweep().await;

    let err = session.send_user_message("still there?", None).await.unwrap_err();
    assert!(matches!(err, SessionError::TimedOut));
}
