//! Bounded retry schedule: attempt, wait, attempt

use std::time::Duration;
use tokio::time::Instant;

/// What the caller should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Make one attempt, then call [`RetryLoop::contended`] if it failed
    Attempt,
    /// Sleep this long before the next attempt
    Wait(Duration),
    /// The deadline passed
    TimedOut,
    /// Every allowed retry was used
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Ready,
    Contended,
}

/// Retry schedule with a monotonic deadline and a retry budget
///
/// Up to `max_retries + 1` attempts are made. Waits never run past the
/// deadline.
#[derive(Debug)]
pub struct RetryLoop {
    deadline: Instant,
    interval: Duration,
    max_retries: u32,
    retries: u32,
    attempts: u32,
    phase: Phase,
}

impl RetryLoop {
    pub fn new(timeout: Duration, max_retries: u32, interval: Duration) -> Self {
        let now = Instant::now();
        // ~30 years, the same cap tokio uses for "never"
        let deadline = now
            .checked_add(timeout)
            .unwrap_or_else(|| now + Duration::from_secs(86400 * 365 * 30));

        Self {
            deadline,
            interval,
            max_retries,
            retries: 0,
            attempts: 0,
            phase: Phase::Ready,
        }
    }

    pub fn next_step(&mut self) -> Step {
        match self.phase {
            Phase::Ready => {
                if Instant::now() >= self.deadline {
                    Step::TimedOut
                } else {
                    self.attempts += 1;
                    Step::Attempt
                }
            }
            Phase::Contended => {
                self.retries += 1;
                if self.retries > self.max_retries {
                    return Step::Exhausted;
                }
                self.phase = Phase::Ready;
                let remaining = self.deadline.saturating_duration_since(Instant::now());
                Step::Wait(self.interval.min(remaining))
            }
        }
    }

    /// Record that the last attempt found the resource taken
    pub fn contended(&mut self) {
        self.phase = Phase::Contended;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }
}
