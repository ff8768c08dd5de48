use std::time::Duration;

/// Delay before the first retry
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(100);

/// Growth multiplier applied after each failed attempt
pub const DEFAULT_FACTOR: f64 = 2.0;

/// Ceiling on the delay between two attempts
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Reconnection delay policy with an optional retry ceiling
///
/// `max_retries` counts retries, not attempts: with a ceiling of `n` a
/// connect makes at most `n + 1` attempts, so `Some(0)` means a single
/// attempt.
#[derive(Debug, Clone)]
pub struct RetryScheduler {
    max_retries: Option<u32>,
    retries: u32,
    factor: f64,
    initial_delay: Duration,
    max_delay: Duration,
    delay: Duration,
}

impl Default for RetryScheduler {
    fn default() -> Self {
        Self::new(None)
    }
}

impl RetryScheduler {
    pub fn new(max_retries: Option<u32>) -> Self {
        Self {
            max_retries,
            retries: 0,
            factor: DEFAULT_FACTOR,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            delay: DEFAULT_INITIAL_DELAY,
        }
    }

    /// Set the growth multiplier
    pub fn with_factor(mut self, factor: f64) -> Self {
        self.set_factor(factor);
        self
    }

    /// Set the first delay and the ceiling
    pub fn with_delays(mut self, initial_delay: Duration, max_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self.max_delay = max_delay.max(initial_delay);
        self.delay = initial_delay;
        self
    }

    /// Change the growth multiplier, applied from the next delay on
    ///
    /// Values below 1.0 (and NaN) are raised to 1.0, delays never shrink.
    pub fn set_factor(&mut self, factor: f64) {
        self.factor = effective_factor(factor);
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }

    pub fn max_retries(&self) -> Option<u32> {
        self.max_retries
    }

    /// Retries scheduled since the last reset
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Delay to wait before the next attempt
    pub fn next_delay(&mut self) -> Duration {
        self.retries = self.retries.saturating_add(1);
        let delay = self.delay;
        self.delay = Duration::try_from_secs_f64(self.delay.as_secs_f64() * self.factor)
            .unwrap_or(self.max_delay)
            .clamp(self.initial_delay, self.max_delay);
        delay
    }

    /// Whether the retry ceiling has been reached
    pub fn exhausted(&self) -> bool {
        self.max_retries
            .is_some_and(|max_retries| self.retries >= max_retries)
    }

    /// Start over after a successful connection
    pub fn reset(&mut self) {
        self.retries = 0;
        self.delay = self.initial_delay;
    }
}

/// Growth multiplier actually applied for a requested `factor`
///
/// Delays never shrink: anything below 1, or NaN, backs off at a constant
/// rate instead.
pub fn effective_factor(factor: f64) -> f64 {
    if factor >= 1.0 {
        factor
    } else {
        1.0
    }
}
