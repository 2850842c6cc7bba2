use log::{debug, warn};
use rand::{thread_rng, Rng};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryStrategy {
    Linear,
    Exponential,
}

/// Back-off schedule for reconnecting to the backing store.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    strategy: RetryStrategy,
    max_attempts: usize,
    base_delay: Duration,
    max_delay: Option<Duration>,
    jitter_fraction: f64,
    time_budget: Option<Duration>,
}

impl RetryPolicy {
    pub fn linear(max_attempts: usize, base_delay: Duration) -> Self {
        Self::new(RetryStrategy::Linear, max_attempts, base_delay)
    }

    pub fn exponential(max_attempts: usize, base_delay: Duration) -> Self {
        Self::new(RetryStrategy::Exponential, max_attempts, base_delay)
    }

    /// A single attempt with no back-off.
    pub fn once() -> Self {
        Self::linear(1, Duration::ZERO)
    }

    fn new(strategy: RetryStrategy, max_attempts: usize, base_delay: Duration) -> Self {
        Self {
            strategy,
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: None,
            jitter_fraction: 0.0,
            time_budget: None,
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = (!max_delay.is_zero()).then_some(max_delay);
        self
    }

    pub fn with_jitter(mut self, fraction: f64) -> Self {
        self.jitter_fraction = fraction.clamp(0.0, 1.0);
        self
    }

    /// Stops retrying once the next back-off would end past `budget`,
    /// counted from the first attempt.
    pub fn with_time_budget(mut self, budget: Duration) -> Self {
        self.time_budget = (!budget.is_zero()).then_some(budget);
        self
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Delay to wait before attempt number `attempt` (1-based; the first
    /// attempt never waits).
    pub fn delay_before(&self, attempt: usize) -> Duration {
        if attempt <= 1 || self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let retry = attempt - 1;
        let raw = match self.strategy {
            RetryStrategy::Linear => self.base_delay.saturating_mul(retry as u32),
            RetryStrategy::Exponential => {
                let factor = 1u32 << (retry - 1).min(31);
                self.base_delay.saturating_mul(factor)
            }
        };
        let bounded = match self.max_delay {
            Some(max) => raw.min(max),
            None => raw,
        };
        if self.jitter_fraction <= 0.0 {
            return bounded;
        }
        let factor =
            thread_rng().gen_range((1.0 - self.jitter_fraction)..=(1.0 + self.jitter_fraction));
        Duration::from_secs_f64((bounded.as_secs_f64() * factor).max(0.0))
    }

    /// Runs `op` until it succeeds, the error is not retryable, or the
    /// attempt budget is spent. `op` receives the 1-based attempt number.
    pub fn run<T, E, F, R>(&self, what: &str, mut op: F, retryable: R) -> Result<T, E>
    where
        F: FnMut(usize) -> Result<T, E>,
        R: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let started = Instant::now();
        let mut attempt = 1;
        loop {
            let delay = self.delay_before(attempt);
            if !delay.is_zero() {
                thread::sleep(delay);
            }
            match op(attempt) {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("event=store_retry what={} outcome=recovered attempt={}", what, attempt);
                    }
                    return Ok(value);
                }
                Err(err)
                    if attempt < self.max_attempts
                        && retryable(&err)
                        && self.within_budget(started, attempt + 1) =>
                {
                    warn!(
                        "event=store_retry what={} outcome=retrying attempt={} max_attempts={} error={}",
                        what, attempt, self.max_attempts, err
                    );
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn within_budget(&self, started: Instant, next_attempt: usize) -> bool {
        match self.time_budget {
            Some(budget) => started.elapsed() + self.delay_before(next_attempt) <= budget,
            None => true,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(3, Duration::from_millis(50))
    }
}
