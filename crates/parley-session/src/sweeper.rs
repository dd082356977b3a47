use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::Duration;
use tracing::{debug, error, info};

use parley_core::config::SessionTimingConfig;

use crate::orchestrator::IdleVerdict;
use crate::registry::SessionRegistry;

/// Periodic task that times out inactive sessions.
///
/// Every tick it visits the live sessions, latches the warning flag on
/// those inside the warning window, and cleans up (flush + abandon + evict)
/// those past their idle deadline. A session that reaches exactly zero
/// remaining transitions on the next tick, not before.
pub struct IdleSweeper {
    registry: Arc<SessionRegistry>,
    interval: Duration,
}

impl IdleSweeper {
    pub fn new(registry: Arc<SessionRegistry>, timing: &SessionTimingConfig) -> Self {
        Self {
            registry,
            interval: Duration::from_secs(timing.sweep_interval_seconds.max(1)),
        }
    }

    /// Main loop. Ticks until `shutdown` broadcasts `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "idle sweeper started");
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.sweep().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("idle sweeper shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One pass over the live sessions.
    pub async fn sweep(&self) {
        for (id, orchestrator) in self.registry.live_sessions() {
            match orchestrator.idle_verdict().await {
                IdleVerdict::Expired => {
                    info!(session_id = %id, "idle deadline passed, cleaning up");
                    if let Err(e) = self.registry.cleanup_if_expired(&id).await {
                        error!(session_id = %id, error = %e, "idle cleanup failed");
                    }
                }
                IdleVerdict::Warning => {
                    debug!(session_id = %id, "session inside idle warning window");
                }
                IdleVerdict::Active => {}
            }
        }
    }
}
