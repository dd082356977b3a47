use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{info, instrument, warn};

use parley_agent::AgentFactory;
use parley_core::config::SessionTimingConfig;
use parley_core::types::{new_id, SessionConfig, SessionStatus};
use parley_store::SessionStore;

use crate::coach::CoachPipeline;
use crate::error::{Result, SessionError};
use crate::orchestrator::SessionOrchestrator;
use crate::persist::SnapshotWriter;

/// Process-wide map of live sessions.
///
/// The registry mutex guards only the id→orchestrator map; it is a plain
/// `std::sync::Mutex` and is never held across an await. All session work
/// happens under the per-session mutex inside the orchestrator, and
/// hydration I/O runs with no lock held at all.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<SessionOrchestrator>>>,
    store: Arc<dyn SessionStore>,
    agents: AgentFactory,
    timing: SessionTimingConfig,
    pipeline: Arc<CoachPipeline>,
}

impl SessionRegistry {
    pub fn new(
        store: Arc<dyn SessionStore>,
        agents: AgentFactory,
        timing: SessionTimingConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| {
            let pipeline = Arc::new(CoachPipeline::new(
                weak.clone(),
                agents.clone(),
                timing.clone(),
            ));
            Self {
                sessions: Mutex::new(HashMap::new()),
                store,
                agents,
                timing,
                pipeline,
            }
        })
    }

    /// Create a new session: allocate an id, seed an orchestrator, write
    /// the initial snapshot, publish to the map.
    ///
    /// When the store write fails nothing is published, so the id never
    /// leaks a half-created session.
    #[instrument(skip(self, config, owner_id))]
    pub async fn create(
        &self,
        config: SessionConfig,
        owner_id: Option<String>,
    ) -> Result<String> {
        config
            .validate()
            .map_err(|e| SessionError::Validation(e.to_string()))?;

        let id = new_id();
        let orchestrator = Arc::new(SessionOrchestrator::new(
            id.clone(),
            owner_id,
            config,
            self.agents.interviewer(),
            self.pipeline.clone(),
            SnapshotWriter::new(self.store.clone()),
            self.timing.clone(),
        ));

        let record = orchestrator.snapshot().await;
        self.store.create(&record).await?;

        self.sessions.lock().unwrap().insert(id.clone(), orchestrator);
        info!(session_id = %id, "session created");
        Ok(id)
    }

    /// Resolve a live orchestrator, hydrating from the store when absent.
    ///
    /// Hydration is idempotent under races: the load runs without any lock,
    /// and publication uses insert-if-absent, so a concurrent loser adopts
    /// the winner's orchestrator.
    #[instrument(skip(self))]
    pub async fn acquire(&self, session_id: &str) -> Result<Arc<SessionOrchestrator>> {
        if let Some(orchestrator) = self.sessions.lock().unwrap().get(session_id) {
            return Ok(orchestrator.clone());
        }

        let record = self
            .store
            .load(session_id)
            .await?
            .ok_or_else(|| SessionError::NotFound { id: session_id.to_string() })?;

        let orchestrator = Arc::new(SessionOrchestrator::from_record(
            record,
            self.agents.interviewer(),
            self.pipeline.clone(),
            SnapshotWriter::new(self.store.clone()),
            self.timing.clone(),
        ));

        let mut sessions = self.sessions.lock().unwrap();
        Ok(sessions
            .entry(session_id.to_string())
            .or_insert(orchestrator)
            .clone())
    }

    /// Flush and evict a session. Subsequent acquires re-hydrate.
    ///
    /// When the flush fails the in-memory copy is retained (still dirty)
    /// and the error is surfaced, so no state is lost.
    #[instrument(skip(self))]
    pub async fn release(&self, session_id: &str) -> Result<()> {
        let Some(orchestrator) = self.sessions.lock().unwrap().remove(session_id) else {
            return Ok(());
        };
        let record = orchestrator.snapshot().await;
        if let Err(e) = orchestrator.flush(&record).await {
            warn!(session_id, error = %e, "flush failed on release, keeping session live");
            self.sessions
                .lock()
                .unwrap()
                .insert(session_id.to_string(), orchestrator);
            return Err(e);
        }
        info!(session_id, "session released");
        Ok(())
    }

    /// Release, additionally marking the session abandoned if still active.
    /// Idempotent: cleaning up an unknown or already-abandoned session
    /// succeeds without touching stored state.
    #[instrument(skip(self))]
    pub async fn cleanup(&self, session_id: &str) -> Result<()> {
        let live = self.sessions.lock().unwrap().remove(session_id);
        if let Some(orchestrator) = live {
            let record = orchestrator.mark_abandoned().await;
            if let Err(e) = orchestrator.flush(&record).await {
                warn!(session_id, error = %e, "flush failed on cleanup, keeping session live");
                self.sessions
                    .lock()
                    .unwrap()
                    .insert(session_id.to_string(), orchestrator);
                return Err(e);
            }
            info!(session_id, "session cleaned up");
            return Ok(());
        }

        // Not live: mark the stored record abandoned if it is still active.
        match self.store.load(session_id).await? {
            Some(mut record) if record.meta.status == SessionStatus::Active => {
                record.meta.status = SessionStatus::Abandoned;
                record.meta.updated_at = Utc::now();
                self.store.put_snapshot(&record).await?;
                info!(session_id, "stored session marked abandoned");
            }
            _ => {}
        }
        Ok(())
    }

    /// Sweeper-side cleanup: abandon and evict only when the idle deadline
    /// has truly passed under the session mutex. A send that raced the
    /// sweep and refreshed the clock keeps the session alive.
    pub(crate) async fn cleanup_if_expired(&self, session_id: &str) -> Result<bool> {
        let Some(orchestrator) = self.sessions.lock().unwrap().get(session_id).cloned() else {
            return Ok(false);
        };
        let Some(record) = orchestrator.mark_abandoned_if_expired().await else {
            return Ok(false);
        };
        self.sessions.lock().unwrap().remove(session_id);
        if let Err(e) = orchestrator.flush(&record).await {
            warn!(session_id, error = %e, "flush failed on idle cleanup, keeping session live");
            self.sessions
                .lock()
                .unwrap()
                .insert(session_id.to_string(), orchestrator);
            return Err(e);
        }
        info!(session_id, "idle session abandoned");
        Ok(true)
    }

    /// Snapshot of the live map for the sweeper.
    pub fn live_sessions(&self) -> Vec<(String, Arc<SessionOrchestrator>)> {
        self.sessions
            .lock()
            .unwrap()
            .iter()
            .map(|(id, orch)| (id.clone(), orch.clone()))
            .collect()
    }

    pub fn live_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    /// Flush every live session; used on graceful shutdown.
    pub async fn flush_all(&self) {
        for (id, orchestrator) in self.live_sessions() {
            let record = orchestrator.snapshot().await;
            if let Err(e) = orchestrator.flush(&record).await {
                warn!(session_id = %id, error = %e, "final flush failed");
            }
        }
    }
}
