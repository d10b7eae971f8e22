// ── Per-device watchdog ──
//
// Connectivity state machine for one device:
//
//   Unknown → Connecting → Connected(WebSocket|Http) → Degraded → LongBackoff
//
// The watchdog only does bookkeeping: it decides when the next health
// check runs and which state the device is in. The device task in
// `manager` owns the timer and performs the checks.

use std::time::Duration;

use strum::Display;

/// Retry/backoff tuning, derived from `BridgeConfig`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Check interval while healthy, and the first retry delay.
    pub base: Duration,
    /// Consecutive failures before the long cadence kicks in.
    pub max_retries: u32,
    /// Double the delay on each failure; otherwise stay at `base`.
    pub backoff_enabled: bool,
    /// Upper bound for the doubled delay.
    pub cap: Duration,
    /// Delay before the single retry once `max_retries` is reached.
    pub long_backoff: Duration,
}

impl RetryPolicy {
    /// `min(base · 2^(n-1), cap)` with backoff enabled, `base` otherwise.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        if !self.backoff_enabled || retry_count == 0 {
            return self.base;
        }
        let factor = 2u32.checked_pow(retry_count - 1).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }
}

/// Transport a device is currently reached over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Transport {
    #[strum(to_string = "websocket")]
    WebSocket,
    #[strum(to_string = "http")]
    Http,
}

/// Connectivity state of one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Unknown,
    Connecting,
    Connected(Transport),
    Degraded { retry_count: u32 },
    LongBackoff,
}

impl LinkState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected(_))
    }
}

/// What happened on a failed health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureOutcome {
    pub retry_count: u32,
    /// Backoff delay after this failure.
    pub retry_delay: Duration,
    /// When the next check runs: `retry_delay`, or the long interval.
    pub next_check: Duration,
    /// The device just dropped to the long cadence.
    pub long_backoff: bool,
}

/// Retry bookkeeping for one device.
#[derive(Debug, Clone)]
pub struct Watchdog {
    policy: RetryPolicy,
    state: LinkState,
    retry_count: u32,
    retry_delay: Duration,
}

impl Watchdog {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            state: LinkState::Unknown,
            retry_count: 0,
            retry_delay: policy.base,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Called right before a health check runs. Leaving the long cadence
    /// starts counting from zero again.
    pub fn begin_check(&mut self) {
        match self.state {
            LinkState::LongBackoff => {
                self.retry_count = 0;
                self.retry_delay = self.policy.base;
                self.state = LinkState::Connecting;
            }
            LinkState::Unknown => self.state = LinkState::Connecting,
            _ => {}
        }
    }

    /// Health check succeeded. Returns the delay until the next check.
    pub fn on_success(&mut self, transport: Transport) -> Duration {
        self.retry_count = 0;
        self.retry_delay = self.policy.base;
        self.state = LinkState::Connected(transport);
        self.policy.base
    }

    /// Health check failed.
    pub fn on_failure(&mut self) -> FailureOutcome {
        self.retry_count = self.retry_count.saturating_add(1);
        self.retry_delay = self.policy.delay_for(self.retry_count);

        let long_backoff = self.retry_count >= self.policy.max_retries;
        self.state = if long_backoff {
            LinkState::LongBackoff
        } else {
            LinkState::Degraded {
                retry_count: self.retry_count,
            }
        };

        FailureOutcome {
            retry_count: self.retry_count,
            retry_delay: self.retry_delay,
            next_check: if long_backoff {
                self.policy.long_backoff
            } else {
                self.retry_delay
            },
            long_backoff,
        }
    }

    /// The WebSocket dropped while the device still answers over HTTP.
    pub fn downgrade(&mut self) {
        if self.state == LinkState::Connected(Transport::WebSocket) {
            self.state = LinkState::Connected(Transport::Http);
        }
    }
}
