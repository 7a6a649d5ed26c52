//! Per-platform pacing: a delay between successive calls, a minimum cycle
//! interval, and a "next allowed call" deadline pushed out by rate limits.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use tidewatch_common::CooldownSpec;

/// Upper bound for the computed rate-limit backoff.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60 * 60);

/// Backoff base when a platform has no minimum interval configured.
const FALLBACK_BASE: Duration = Duration::from_secs(1);

#[derive(Debug, Default)]
struct State {
    next_call_at: Option<Instant>,
    next_allowed_at: Option<Instant>,
    consecutive_limits: u32,
}

#[derive(Debug)]
pub struct CooldownController {
    spec: CooldownSpec,
    state: Mutex<State>,
}

impl CooldownController {
    pub fn new(spec: CooldownSpec) -> Self {
        Self {
            spec,
            state: Mutex::new(State::default()),
        }
    }

    pub fn spec(&self) -> CooldownSpec {
        self.spec
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait until the next upstream call is allowed, then claim the slot.
    pub async fn gate(&self) {
        loop {
            match self.try_reserve(Instant::now()) {
                None => return,
                Some(wait) => {
                    debug!(wait_ms = wait.as_millis() as u64, "Cooldown gate waiting");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Claim a call slot at `now`, or return how long to wait first.
    pub fn try_reserve(&self, now: Instant) -> Option<Duration> {
        let mut state = self.state();
        let ready_at = match (state.next_call_at, state.next_allowed_at) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        if let Some(ready_at) = ready_at {
            if ready_at > now {
                return Some(ready_at - now);
            }
        }
        state.next_call_at = Some(now + self.spec.call_delay);
        None
    }

    /// Record an explicit rate-limit signal. Returns the applied backoff.
    ///
    /// An upstream retry-after wins. Otherwise the backoff starts at the
    /// platform's minimum interval and doubles per consecutive signal.
    pub fn note_rate_limited(&self, now: Instant, retry_after: Option<Duration>) -> Duration {
        let mut state = self.state();
        state.consecutive_limits = state.consecutive_limits.saturating_add(1);

        let backoff = match retry_after {
            Some(d) => d.min(MAX_BACKOFF),
            None => {
                let base = if self.spec.minimum_interval.is_zero() {
                    FALLBACK_BASE
                } else {
                    self.spec.minimum_interval
                };
                let exp = (state.consecutive_limits - 1).min(16);
                base.saturating_mul(1u32 << exp).min(MAX_BACKOFF)
            }
        };

        let until = now + backoff;
        state.next_allowed_at = Some(match state.next_allowed_at {
            Some(existing) => existing.max(until),
            None => until,
        });
        backoff
    }

    /// A call went through. Resets the backoff growth.
    pub fn note_success(&self) {
        self.state().consecutive_limits = 0;
    }

    /// Remaining rate-limit block at `now`, if any.
    pub fn blocked_for(&self, now: Instant) -> Option<Duration> {
        self.state()
            .next_allowed_at
            .filter(|at| *at > now)
            .map(|at| at - now)
    }

    /// Sleep needed after a cycle so cycles never run faster than the
    /// platform's minimum interval.
    pub fn remaining_cycle_delay(&self, elapsed: Duration) -> Duration {
        self.spec.minimum_interval.saturating_sub(elapsed)
    }
}
