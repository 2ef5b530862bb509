use prometheus_client::metrics::counter::Counter;
use prometheus_client::registry::Registry;

/// Counters for the coordinator's request and finalization flow.
pub struct Metrics {
    registry: Registry,
    pub sessions_started: Counter,
    pub scores_accepted: Counter,
    pub submissions_rejected: Counter,
    pub finalize_attempts: Counter,
    pub finalize_failures: Counter,
    pub rounds_closed: Counter,
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("coordinator");
        let sessions_started = Counter::default();
        registry.register(
            "sessions_started",
            "Timing sessions issued after a verified entry fee",
            sessions_started.clone(),
        );
        let scores_accepted = Counter::default();
        registry.register(
            "scores_accepted",
            "Score submissions accepted and recorded",
            scores_accepted.clone(),
        );
        let submissions_rejected = Counter::default();
        registry.register(
            "submissions_rejected",
            "Score submissions rejected by session or time checks",
            submissions_rejected.clone(),
        );
        let finalize_attempts = Counter::default();
        registry.register(
            "finalize_attempts",
            "Payout transactions submitted",
            finalize_attempts.clone(),
        );
        let finalize_failures = Counter::default();
        registry.register(
            "finalize_failures",
            "Payout transactions that failed or timed out",
            finalize_failures.clone(),
        );
        let rounds_closed = Counter::default();
        registry.register(
            "rounds_closed",
            "Rounds closed after a confirmed payout",
            rounds_closed.clone(),
        );

        Self {
            registry,
            sessions_started,
            scores_accepted,
            submissions_rejected,
            finalize_attempts,
            finalize_failures,
            rounds_closed,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
