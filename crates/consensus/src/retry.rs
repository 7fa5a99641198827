//! Delayed retry scheduling for out-of-order messages.
//!
//! This module provides:
//! - [`RetryConfig`] - base delay, cap, attempt limit and jitter
//! - [`BackoffMode`] - linear or exponential backoff strategies
//! - [`RetryScheduler`] - a min-heap of pending items keyed by retry deadline
//!
//! Retries are held apart from the inbound queue so that a burst of early
//! messages never delays fresh ones.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::trace;

/// Backoff strategy for retry delays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffMode {
    /// delay = base * attempt
    Linear,
    /// delay = base * 2^min(attempt - 1, max_exponent)
    Exponential {
        /// Maximum exponent to prevent overflow
        max_exponent: u32,
    },
}

impl BackoffMode {
    /// Exponential backoff with a default max exponent of 6 (64x multiplier)
    pub fn exponential() -> Self {
        BackoffMode::Exponential { max_exponent: 6 }
    }
}

impl Default for BackoffMode {
    fn default() -> Self {
        Self::exponential()
    }
}

/// Error returned when an item may not be retried again
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetryError {
    /// Attempt limit reached
    #[error("retry attempts exhausted after {attempts} attempts")]
    Exhausted { attempts: u32 },
}

/// Configuration for retry delays
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay before the first retry
    pub base: Duration,
    /// Cap on any single delay
    pub max_delay: Duration,
    /// Retries allowed per item
    pub max_attempts: u32,
    /// Backoff mode
    pub backoff_mode: BackoffMode,
    /// Random jitter as a fraction of the delay (0.0 to 0.5)
    pub jitter_percent: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            max_attempts: 8,
            backoff_mode: BackoffMode::exponential(),
            jitter_percent: 0.1,
        }
    }
}

impl RetryConfig {
    /// Create a retry configuration
    pub fn new(base: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max_delay,
            max_attempts,
            ..Self::default()
        }
    }

    /// Create a fast configuration for testing
    pub fn fast() -> Self {
        Self {
            base: Duration::from_millis(5),
            max_delay: Duration::from_millis(100),
            max_attempts: 8,
            backoff_mode: BackoffMode::exponential(),
            jitter_percent: 0.0,
        }
    }

    /// Set the backoff mode
    pub fn with_backoff_mode(mut self, mode: BackoffMode) -> Self {
        self.backoff_mode = mode;
        self
    }

    /// Set the jitter percentage
    pub fn with_jitter(mut self, percent: f64) -> Self {
        self.jitter_percent = percent.clamp(0.0, 0.5);
        self
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let raw = match self.backoff_mode {
            BackoffMode::Linear => self.base.saturating_mul(attempt),
            BackoffMode::Exponential { max_exponent } => {
                let exponent = (attempt - 1).min(max_exponent).min(31);
                self.base.saturating_mul(1u32 << exponent)
            }
        };

        let with_jitter = if self.jitter_percent > 0.0 {
            let mut rng = rand::thread_rng();
            // Jitter in range [1.0, 1.0 + jitter_percent]
            let multiplier = 1.0 + rng.gen::<f64>() * self.jitter_percent;
            Duration::from_secs_f64(raw.as_secs_f64() * multiplier)
        } else {
            raw
        };

        with_jitter.min(self.max_delay)
    }
}

#[derive(Debug)]
struct Pending<T> {
    deadline: Instant,
    seq: u64,
    attempt: u32,
    item: T,
}

impl<T> PartialEq for Pending<T> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl<T> Eq for Pending<T> {}

impl<T> PartialOrd for Pending<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Pending<T> {
    // Reversed so that BinaryHeap pops the earliest deadline first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Holds items until their retry deadline
#[derive(Debug)]
pub struct RetryScheduler<T> {
    config: RetryConfig,
    heap: BinaryHeap<Pending<T>>,
    seq: u64,
}

impl<T> RetryScheduler<T> {
    /// Create an empty scheduler
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            heap: BinaryHeap::new(),
            seq: 0,
        }
    }

    /// The scheduler configuration
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Schedule retry number `attempt` (1-based) of `item`.
    ///
    /// Returns the deadline, or [`RetryError::Exhausted`] once `attempt` exceeds
    /// the configured limit; the item is dropped in that case.
    pub fn schedule(&mut self, item: T, attempt: u32) -> Result<Instant, RetryError> {
        if attempt > self.config.max_attempts {
            return Err(RetryError::Exhausted {
                attempts: self.config.max_attempts,
            });
        }
        let delay = self.config.delay_for(attempt);
        let deadline = Instant::now() + delay;
        self.seq += 1;
        trace!(attempt, delay_ms = delay.as_millis() as u64, "Scheduling retry");
        self.heap.push(Pending {
            deadline,
            seq: self.seq,
            attempt,
            item,
        });
        Ok(deadline)
    }

    /// Earliest pending deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|p| p.deadline)
    }

    /// Remove every item due at `now`, earliest first, with its attempt number.
    pub fn pop_due(&mut self, now: Instant) -> Vec<(T, u32)> {
        let mut due = Vec::new();
        while self.heap.peek().map(|p| p.deadline <= now).unwrap_or(false) {
            if let Some(pending) = self.heap.pop() {
                due.push((pending.item, pending.attempt));
            }
        }
        due
    }

    /// Number of pending items
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Whether nothing is pending
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
