// Cooperative cancellation shared by discovery and download loops.
//
// A stop is either requested explicitly through `request_stop` or reported by
// an injected predicate owned by the caller (for example a UI "stop" button).

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

type StopPredicate = Arc<dyn Fn() -> bool + Send + Sync>;

/// How often `stopped()` re-evaluates the external predicate.
const PREDICATE_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Clone, Default)]
pub struct StopSignal {
    token: CancellationToken,
    predicate: Option<StopPredicate>,
}

impl fmt::Debug for StopSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopSignal")
            .field("cancelled", &self.token.is_cancelled())
            .field("has_predicate", &self.predicate.is_some())
            .finish()
    }
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Combine an external "should I stop" check with the internal token.
    pub fn with_predicate<F>(predicate: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        Self {
            token: CancellationToken::new(),
            predicate: Some(Arc::new(predicate)),
        }
    }

    pub fn request_stop(&self) {
        self.token.cancel();
    }

    /// True once a stop was requested or the predicate reported one.
    ///
    /// A positive predicate answer is latched into the token so later
    /// checks do not depend on the predicate staying true.
    pub fn is_stopped(&self) -> bool {
        if self.token.is_cancelled() {
            return true;
        }
        if let Some(predicate) = &self.predicate
            && predicate()
        {
            self.token.cancel();
            return true;
        }
        false
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Resolves once the signal is stopped.
    pub async fn stopped(&self) {
        if self.predicate.is_none() {
            self.token.cancelled().await;
            return;
        }
        loop {
            if self.is_stopped() {
                return;
            }
            tokio::select! {
                _ = self.token.cancelled() => return,
                _ = tokio::time::sleep(PREDICATE_POLL_INTERVAL) => {}
            }
        }
    }

    /// Sleep for `duration` unless stopped first. Returns `false` when the
    /// sleep was cut short by a stop.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if self.is_stopped() {
            return false;
        }
        tokio::select! {
            _ = self.stopped() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}
