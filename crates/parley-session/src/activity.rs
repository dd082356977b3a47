use tokio::time::{Duration, Instant};

/// Per-session activity tracking.
///
/// `time_remaining` is `(last_activity + idle_budget) − now` on the tokio
/// clock, so tests can drive it with `tokio::time::pause`. The warning flag
/// latches once the remaining time drops under the threshold and clears on
/// the next activity.
#[derive(Debug, Clone)]
pub struct ActivityClock {
    last_activity: Instant,
    idle_budget: Duration,
    warning_threshold: Duration,
    warned: bool,
}

impl ActivityClock {
    pub fn new(idle_budget: Duration, warning_threshold: Duration) -> Self {
        Self {
            last_activity: Instant::now(),
            idle_budget,
            warning_threshold,
            warned: false,
        }
    }

    /// Record activity now.
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
        self.warned = false;
    }

    /// Explicit extension. Returns the fresh full budget.
    pub fn ping(&mut self) -> Duration {
        self.touch();
        self.idle_budget
    }

    pub fn time_remaining(&self) -> Duration {
        (self.last_activity + self.idle_budget).saturating_duration_since(Instant::now())
    }

    pub fn expired(&self) -> bool {
        self.time_remaining().is_zero()
    }

    pub fn in_warning_window(&self) -> bool {
        self.time_remaining() <= self.warning_threshold
    }

    pub fn mark_warned(&mut self) {
        self.warned = true;
    }

    pub fn warned(&self) -> bool {
        self.warned
    }

    pub fn idle_budget(&self) -> Duration {
        self.idle_budget
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock() -> ActivityClock {
        ActivityClock::new(Duration::from_secs(900), Duration::from_secs(120))
    }

    #[tokio::test(start_paused = true)]
    async fn remaining_counts_down() {
        let clock = clock();
        assert_eq!(clock.time_remaining(), Duration::from_secs(900));

        tokio::time::advance(Duration::from_secs(300)).await;
        assert_eq!(clock.time_remaining(), Duration::from_secs(600));
        assert!(!clock.expired());
        assert!(!clock.in_warning_window());
    }

    #[tokio::test(start_paused = true)]
    async fn warning_window_then_expiry() {
        let mut clock = clock();
        tokio::time::advance(Duration::from_secs(790)).await;
        assert!(clock.in_warning_window());
        clock.mark_warned();
        assert!(clock.warned());

        tokio::time::advance(Duration::from_secs(200)).await;
        assert!(clock.expired());
        assert_eq!(clock.time_remaining(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn ping_resets_to_full_budget() {
        let mut clock = clock();
        tokio::time::advance(Duration::from_secs(800)).await;
        clock.mark_warned();

        let budget = clock.ping();
        assert_eq!(budget, Duration::from_secs(900));
        assert_eq!(clock.time_remaining(), Duration::from_secs(900));
        assert!(!clock.warned());
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_pings_do_not_stack() {
        let mut clock = clock();
        clock.ping();
        clock.ping();
        assert_eq!(clock.time_remaining(), Duration::from_secs(900));
    }
}
