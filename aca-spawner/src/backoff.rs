use std::time::Duration;

/// Doubling delays for the ingress check after creation: 1, 2, 4, 8, 16 seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub attempts: u32,
    pub base: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            attempts: 5,
            base: Duration::from_secs(1),
        }
    }
}

impl Backoff {
    /// Delay after the failed check numbered `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base * 2u32.saturating_pow(attempt)
    }

    /// Time spent sleeping when every attempt fails.
    pub fn total(&self) -> Duration {
        (0..self.attempts).map(|a| self.delay(a)).sum()
    }
}
