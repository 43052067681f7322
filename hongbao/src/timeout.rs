use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep_until, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{label} timed out after {after:?}")]
pub struct TimedOut {
    pub label: &'static str,
    pub after: Duration,
}

/// A one-shot timer armed for a single attempt
///
/// Dropping the timer (or the future racing it) disarms it, nothing outlives the attempt.
#[derive(Debug, Clone, Copy)]
pub struct AttemptTimer {
    label: &'static str,
    budget: Duration,
    deadline: Instant,
}

impl AttemptTimer {
    pub fn start(label: &'static str, budget: Duration) -> Self {
        Self { label, budget, deadline: Instant::now() + budget }
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Run `fut` against this timer, whichever finishes first decides the outcome
    pub async fn race<F: Future>(self, fut: F) -> Result<F::Output, TimedOut> {
        tokio::select! {
            biased;
            out = fut => Ok(out),
            _ = sleep_until(self.deadline) => Err(TimedOut { label: self.label, after: self.budget }),
        }
    }
}

/// Shorthand for arming a fresh [AttemptTimer] around one call
pub async fn with_timeout<F: Future>(label: &'static str, budget: Duration, fut: F) -> Result<F::Output, TimedOut> {
    AttemptTimer::start(label, budget).race(fut).await
}
