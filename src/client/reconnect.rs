use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectState {
    Disconnected,
    Connecting { attempt: u32 },
    Connected,
    /// Waiting `delay` before connect attempt `attempt + 1`.
    Backoff { attempt: u32, delay: Duration },
}

/// Exponential backoff: `base * 2^attempt`, capped at `max`, spread by
/// up to `jitter` (a fraction, 0.0..=1.0) either way.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(30),
            jitter: 0.2,
        }
    }
}

impl BackoffPolicy {
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base.saturating_mul(factor).min(self.max)
    }

    pub fn jittered(&self, delay: Duration) -> Duration {
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return delay;
        }
        let spread = rand::rng().random_range(-jitter..=jitter);
        delay.mul_f64(1.0 + spread)
    }
}

/// Transitions of the client's connection, kept free of timers and I/O so
/// the driver can be simulated step by step.
#[derive(Debug)]
pub struct Reconnector {
    policy: BackoffPolicy,
    state: ReconnectState,
    attempt: u32,
}

impl Reconnector {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            state: ReconnectState::Disconnected,
            attempt: 0,
        }
    }

    pub fn state(&self) -> ReconnectState {
        self.state
    }

    /// Starts a connect attempt and returns its number (0 for the first).
    pub fn begin_connect(&mut self) -> u32 {
        self.state = ReconnectState::Connecting { attempt: self.attempt };
        self.attempt
    }

    pub fn on_connected(&mut self) {
        self.attempt = 0;
        self.state = ReconnectState::Connected;
    }

    /// A connect failed or a live connection dropped. Returns the (unjittered)
    /// wait before the next attempt.
    pub fn on_disconnected(&mut self) -> Duration {
        let delay = self.policy.delay(self.attempt);
        self.state = ReconnectState::Backoff {
            attempt: self.attempt,
            delay,
        };
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Gives up; any pending retry is abandoned.
    pub fn cancel(&mut self) {
        self.attempt = 0;
        self.state = ReconnectState::Disconnected;
    }
}
