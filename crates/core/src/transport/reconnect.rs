//! Reconnection policy with exponential backoff
//!
//! Pure policy only: the connection state machine decides *when* to ask,
//! this module decides *how long* to wait and *whether* another attempt is
//! allowed. No jitter is applied, so a fleet of clients dropped at the same
//! instant retries in lockstep.

use std::time::Duration;

/// Delay before the first reconnect attempt
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(1000);

/// Upper bound on any single reconnect delay
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_millis(30_000);

/// Automatic attempts allowed after an unclean close
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Reconnection configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Maximum backoff time between attempts
    pub max_backoff: Duration,
    /// Initial backoff time
    pub initial_backoff: Duration,
    /// Maximum number of reconnection attempts (None = infinite)
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_backoff: DEFAULT_MAX_BACKOFF,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_attempts: Some(DEFAULT_MAX_ATTEMPTS),
        }
    }
}

impl ReconnectConfig {
    /// Delay before reconnect attempt number `attempt` (0-based)
    ///
    /// `min(initial_backoff * 2^attempt, max_backoff)`; overflow saturates
    /// to `max_backoff`.
    pub fn delay(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.initial_backoff.checked_mul(factor))
            .map_or(self.max_backoff, |delay| delay.min(self.max_backoff))
    }

    /// Whether another automatic attempt may be scheduled
    pub fn allows_attempt(&self, attempt: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempt < max,
            None => true,
        }
    }
}

/// Create reconnect config with custom values
pub fn reconnect_config(
    max_backoff: Duration,
    initial_backoff: Duration,
    max_attempts: Option<u32>,
) -> ReconnectConfig {
    ReconnectConfig {
        max_backoff,
        initial_backoff,
        max_attempts,
    }
}
