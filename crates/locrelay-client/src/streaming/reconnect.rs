//! Reconnect delays

use std::fmt::Debug;
use std::time::Duration;

use rand::Rng;

const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Decides how long to wait before reconnect attempt `attempt`.
///
/// `attempt` starts at 1 and counts consecutive failures; it resets once a
/// frame is received. `server_hint` is the latest `retry:` value sent by
/// the server. Returning `None` stops reconnecting.
pub trait ReconnectStrategy: Debug + Send + Sync {
    fn next_delay(&self, attempt: u32, server_hint: Option<Duration>) -> Option<Duration>;
}

/// Delay growth between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay every time
    Fixed(Duration),
    /// Doubling delay, capped at `max`
    Exponential { initial: Duration, max: Duration },
}

/// Built-in [`ReconnectStrategy`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub backoff: Backoff,
    /// Stop after this many consecutive failures; `None` retries forever
    pub max_retries: Option<u32>,
    /// Scale each delay by a random factor in `[0.5, 1.0]`
    pub jitter: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            backoff: Backoff::Exponential {
                initial: DEFAULT_INITIAL_DELAY,
                max: DEFAULT_MAX_DELAY,
            },
            max_retries: None,
            jitter: true,
        }
    }
}

impl ReconnectPolicy {
    /// Fixed delay, no jitter
    pub fn fixed(delay: Duration) -> Self {
        Self {
            backoff: Backoff::Fixed(delay),
            max_retries: None,
            jitter: false,
        }
    }

    /// Exponential backoff with jitter
    pub fn exponential(initial: Duration, max: Duration) -> Self {
        Self {
            backoff: Backoff::Exponential { initial, max },
            ..Self::default()
        }
    }

    /// Never reconnect
    pub fn never() -> Self {
        Self::default().with_max_retries(0)
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before `attempt`, without jitter
    pub fn base_delay(&self, attempt: u32, server_hint: Option<Duration>) -> Option<Duration> {
        if attempt == 0 {
            return Some(Duration::ZERO);
        }
        if self.max_retries.is_some_and(|max| attempt > max) {
            return None;
        }

        let delay = match self.backoff {
            Backoff::Fixed(delay) => server_hint.unwrap_or(delay),
            Backoff::Exponential { initial, max } => {
                let initial = server_hint.unwrap_or(initial);
                let factor = 2u32.saturating_pow(attempt - 1);
                initial.saturating_mul(factor).min(max.max(initial))
            }
        };

        Some(delay)
    }
}

impl ReconnectStrategy for ReconnectPolicy {
    fn next_delay(&self, attempt: u32, server_hint: Option<Duration>) -> Option<Duration> {
        let delay = self.base_delay(attempt, server_hint)?;
        if !self.jitter || delay.is_zero() {
            return Some(delay);
        }
        let factor = rand::thread_rng().gen_range(0.5..=1.0);
        Some(delay.mul_f64(factor))
    }
}
