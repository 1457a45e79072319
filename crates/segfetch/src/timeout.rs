//! Shared request timeout that follows the recent failure ratio.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub struct TimeoutSettings {
    /// Starting value and lower bound
    pub min: Duration,
    /// Upper bound
    pub max: Duration,
    /// Amount added or removed per adjustment
    pub step: Duration,
    /// Failure ratio above which the timeout is raised
    pub raise_threshold: f64,
    /// Failure ratio below which the timeout is lowered
    pub recovery_threshold: f64,
    /// Requests that must complete between two evaluations
    pub min_observations: u64,
    /// Minimum time between two adjustments
    pub cooldown: Duration,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            min: Duration::from_secs(4),
            max: Duration::from_secs(25),
            step: Duration::from_secs(3),
            raise_threshold: 0.30,
            recovery_threshold: 0.05,
            min_observations: 15,
            cooldown: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjustment {
    Raised(Duration),
    Lowered(Duration),
    Unchanged,
    /// Not enough observations or still cooling down
    Skipped,
}

#[derive(Debug)]
struct State {
    timeout: Duration,
    connections: u64,
    failures: u64,
    evaluated_connections: u64,
    evaluated_failures: u64,
    last_adjust: Instant,
}

#[derive(Debug)]
pub struct AdaptiveTimeout {
    settings: TimeoutSettings,
    state: Mutex<State>,
}

impl AdaptiveTimeout {
    pub fn new(settings: TimeoutSettings) -> Self {
        let max = settings.max.max(settings.min);
        let settings = TimeoutSettings { max, ..settings };
        Self {
            state: Mutex::new(State {
                timeout: settings.min,
                connections: 0,
                failures: 0,
                evaluated_connections: 0,
                evaluated_failures: 0,
                last_adjust: Instant::now(),
            }),
            settings,
        }
    }

    pub fn settings(&self) -> &TimeoutSettings {
        &self.settings
    }

    pub fn current(&self) -> Duration {
        self.state.lock().timeout
    }

    pub fn record(&self, success: bool) {
        let mut state = self.state.lock();
        state.connections += 1;
        if !success {
            state.failures += 1;
        }
    }

    /// Raise by one step, clamped to the upper bound.
    pub fn raise(&self) -> Duration {
        let mut state = self.state.lock();
        state.timeout = (state.timeout + self.settings.step).min(self.settings.max);
        state.last_adjust = Instant::now();
        state.timeout
    }

    /// Lower by one step, clamped to the lower bound.
    pub fn lower(&self) -> Duration {
        let mut state = self.state.lock();
        state.timeout = state
            .timeout
            .saturating_sub(self.settings.step)
            .max(self.settings.min);
        state.last_adjust = Instant::now();
        state.timeout
    }

    pub fn evaluate(&self) -> Adjustment {
        self.evaluate_at(Instant::now())
    }

    /// Judge the failures observed since the previous evaluation.
    pub fn evaluate_at(&self, now: Instant) -> Adjustment {
        let mut state = self.state.lock();
        let observed = state.connections - state.evaluated_connections;
        if observed < self.settings.min_observations
            || now.saturating_duration_since(state.last_adjust) < self.settings.cooldown
        {
            return Adjustment::Skipped;
        }

        let failed = state.failures - state.evaluated_failures;
        state.evaluated_connections = state.connections;
        state.evaluated_failures = state.failures;
        let ratio = failed as f64 / observed as f64;

        let before = state.timeout;
        if ratio > self.settings.raise_threshold {
            state.timeout = (before + self.settings.step).min(self.settings.max);
        } else if ratio < self.settings.recovery_threshold {
            state.timeout = before.saturating_sub(self.settings.step).max(self.settings.min);
        }
        if state.timeout == before {
            debug!(ratio, observed, "timeout unchanged");
            return Adjustment::Unchanged;
        }
        state.last_adjust = now;
        info!(
            ratio,
            observed,
            from = ?before,
            to = ?state.timeout,
            "adjusted segment timeout"
        );
        if state.timeout > before {
            Adjustment::Raised(state.timeout)
        } else {
            Adjustment::Lowered(state.timeout)
        }
    }

    /// Re-evaluate every `interval` until `token` is cancelled.
    pub fn spawn_periodic(
        self: &Arc<Self>,
        interval: Duration,
        token: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        controller.evaluate();
                    }
                }
            }
        })
    }
}

impl Default for AdaptiveTimeout {
    fn default() -> Self {
        Self::new(TimeoutSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observe(timeout: &AdaptiveTimeout, ok: u32, failed: u32) {
        for _ in 0..ok {
            timeout.record(true);
        }
        for _ in 0..failed {
            timeout.record(false);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn needs_observations_and_cooldown() {
        let timeout = AdaptiveTimeout::default();
        observe(&timeout, 0, 20);
        assert_eq!(timeout.evaluate(), Adjustment::Skipped);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(timeout.evaluate(), Adjustment::Raised(Duration::from_secs(7)));

        observe(&timeout, 0, 20);
        assert_eq!(timeout.evaluate(), Adjustment::Skipped);
    }

    #[tokio::test(start_paused = true)]
    async fn ratio_uses_only_the_latest_window() {
        let timeout = AdaptiveTimeout::default();
        observe(&timeout, 0, 20);
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(matches!(timeout.evaluate(), Adjustment::Raised(_)));

        observe(&timeout, 100, 0);
        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(timeout.evaluate(), Adjustment::Lowered(Duration::from_secs(4)));

        observe(&timeout, 90, 10);
        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(timeout.evaluate(), Adjustment::Unchanged);
    }

    #[test]
    fn stays_within_bounds() {
        let timeout = AdaptiveTimeout::default();
        for _ in 0..50 {
            timeout.raise();
        }
        assert_eq!(timeout.current(), Duration::from_secs(25));
        for _ in 0..50 {
            timeout.lower();
        }
        assert_eq!(timeout.current(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_task_stops_on_cancel() {
        let timeout = Arc::new(AdaptiveTimeout::default());
        observe(&timeout, 0, 30);
        let token = CancellationToken::new();
        let handle = timeout.spawn_periodic(Duration::from_secs(10), token.clone());
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(timeout.current(), Duration::from_secs(7));
        token.cancel();
        handle.await.unwrap();
    }
}
