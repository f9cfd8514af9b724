//! Per-request retry state machine.
//!
//! ```text
//! PENDING ──▶ SENDING ──▶ SUCCEEDED
//!               │  ▲
//!               ▼  │
//!             RETRYING        (transient failure, attempts remain)
//!               │
//!               ▼
//!      FAILED / CANCELLED     (terminal)
//! ```
//!
//! The orchestrator loop asks [`AttemptTracker`] what to do next instead of
//! keeping "attempts left" and "last error" in local variables, so both are
//! observable (and testable) at every step.

use crate::error::AnalysisError;
use serde::Serialize;
use std::time::Duration;

/// Lifecycle of a single analysis request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestState {
    Pending,
    /// Attempt `attempt` (1-based) is in flight.
    Sending { attempt: u32 },
    /// Waiting `delay_ms` before attempt `next_attempt`.
    Retrying { next_attempt: u32, delay_ms: u64 },
    Succeeded { attempts: u32 },
    Failed { attempts: u32, error: String },
    Cancelled { attempts: u32 },
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestState::Succeeded { .. } | RequestState::Failed { .. } | RequestState::Cancelled { .. }
        )
    }
}

/// What the orchestrator should do after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextStep {
    /// Sleep for this long, then send again.
    Retry(Duration),
    /// Stop; the request is in a terminal state.
    GiveUp,
}

/// Attempt bookkeeping for one request.
#[derive(Debug, Clone)]
pub struct AttemptTracker {
    max_attempts: u32,
    base_backoff_ms: u64,
    max_backoff_ms: u64,
    attempts: u32,
    last_error: Option<AnalysisError>,
    state: RequestState,
}

impl AttemptTracker {
    pub fn new(max_attempts: u32, base_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_backoff_ms,
            max_backoff_ms,
            attempts: 0,
            last_error: None,
            state: RequestState::Pending,
        }
    }

    pub fn state(&self) -> &RequestState {
        &self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn attempts_remaining(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempts)
    }

    pub fn last_error(&self) -> Option<&AnalysisError> {
        self.last_error.as_ref()
    }

    /// Enter SENDING for the next attempt and return its 1-based number.
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.state = RequestState::Sending {
            attempt: self.attempts,
        };
        self.attempts
    }

    pub fn succeed(&mut self) {
        self.state = RequestState::Succeeded {
            attempts: self.attempts,
        };
    }

    /// Record a failed attempt and decide whether to retry.
    ///
    /// Only retryable errors with attempts remaining lead to RETRYING; the
    /// backoff doubles per retry (`base * 2^(attempt-1)`), capped.
    pub fn fail(&mut self, error: AnalysisError) -> NextStep {
        let retry = error.is_retryable() && self.attempts < self.max_attempts;
        if retry {
            let exp = self.attempts.saturating_sub(1).min(20);
            let delay_ms = self
                .base_backoff_ms
                .saturating_mul(1u64 << exp)
                .min(self.max_backoff_ms);
            self.state = RequestState::Retrying {
                next_attempt: self.attempts + 1,
                delay_ms,
            };
            self.last_error = Some(error);
            NextStep::Retry(Duration::from_millis(delay_ms))
        } else {
            self.state = RequestState::Failed {
                attempts: self.attempts,
                error: error.to_string(),
            };
            self.last_error = Some(error);
            NextStep::GiveUp
        }
    }

    pub fn cancel(&mut self) {
        self.state = RequestState::Cancelled {
            attempts: self.attempts,
        };
    }

    /// Consume the tracker, yielding the error that ended the request.
    pub fn into_error(self) -> AnalysisError {
        self.last_error
            .unwrap_or_else(|| AnalysisError::Internal("request failed without an error".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unavailable() -> AnalysisError {
        AnalysisError::from_status("openai", 503, "unavailable")
    }

    #[test]
    fn transient_failures_retry_until_ceiling() {
        let mut t = AttemptTracker::new(3, 500, 8_000);
        assert_eq!(t.state(), &RequestState::Pending);

        assert_eq!(t.begin_attempt(), 1);
        assert_eq!(t.fail(unavailable()), NextStep::Retry(Duration::from_millis(500)));
        assert_eq!(
            t.state(),
            &RequestState::Retrying {
                next_attempt: 2,
                delay_ms: 500
            }
        );

        t.begin_attempt();
        assert_eq!(t.fail(unavailable()), NextStep::Retry(Duration::from_millis(1_000)));

        t.begin_attempt();
        assert_eq!(t.fail(unavailable()), NextStep::GiveUp);
        assert!(matches!(t.state(), RequestState::Failed { attempts: 3, .. }));
        assert_eq!(t.attempts_remaining(), 0);
        assert!(matches!(
            t.into_error(),
            AnalysisError::Provider { status: 503, .. }
        ));
    }

    #[test]
    fn terminal_errors_stop_immediately() {
        let mut t = AttemptTracker::new(3, 500, 8_000);
        t.begin_attempt();
        let step = t.fail(AnalysisError::from_status("openai", 401, "bad key"));
        assert_eq!(step, NextStep::GiveUp);
        assert_eq!(t.attempts(), 1);
        assert!(t.state().is_terminal());
    }

    #[test]
    fn backoff_is_capped() {
        let mut t = AttemptTracker::new(10, 1_000, 3_000);
        let mut delays = Vec::new();
        for _ in 0..4 {
            t.begin_attempt();
            if let NextStep::Retry(d) = t.fail(unavailable()) {
                delays.push(d.as_millis() as u64);
            }
        }
        assert_eq!(delays, vec![1_000, 2_000, 3_000, 3_000]);
    }

    #[test]
    fn cancel_is_terminal() {
        let mut t = AttemptTracker::new(3, 10, 100);
        t.begin_attempt();
        t.cancel();
        assert_eq!(t.state(), &RequestState::Cancelled { attempts: 1 });
        assert!(t.state().is_terminal());
    }

    #[test]
    fn zero_attempts_is_clamped_to_one() {
        let mut t = AttemptTracker::new(0, 10, 100);
        t.begin_attempt();
        assert_eq!(t.fail(unavailable()), NextStep::GiveUp);
    }
}
