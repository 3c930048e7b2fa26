use std::future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{self, Instant};

/// How the retransmission interval grows across consecutive retries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    /// Same interval for every retry
    #[default]
    Fixed,
    /// Interval doubles with each retry
    Exponential,
}

/// Retry policy for one transfer
///
/// Both knobs are operator configuration, not protocol constants: the
/// timeout is how long to wait for the next packet before retransmitting
/// the last one, and `max_retries` is how many retransmissions are
/// allowed before the transfer is abandoned.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Time to wait for the next packet
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Retransmissions allowed before giving up
    pub max_retries: u32,
    /// Interval growth across consecutive retries
    #[serde(default)]
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Interval to arm the timer with after `retries` retransmissions
    pub fn interval(&self, retries: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.timeout,
            Backoff::Exponential => self.timeout.saturating_mul(1 << retries.min(6)),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_retries: 5,
            backoff: Backoff::Fixed,
        }
    }
}

/// One-shot retransmission timer for a single session
///
/// Armed whenever a packet worth retransmitting is sent and disarmed
/// once a transfer reaches a terminal state. The driving loop awaits
/// [`RetryTimer::fire`] alongside its socket; arming again before the
/// deadline replaces it, so a timely reply never races a stale
/// retransmission.
#[derive(Debug, Default)]
pub struct RetryTimer {
    deadline: Option<Instant>,
}

impl RetryTimer {
    pub fn new() -> Self {
        Self { deadline: None }
    }

    /// Arm the timer `interval` from now, replacing any earlier deadline
    pub fn arm(&mut self, interval: Duration) {
        self.deadline = Some(Instant::now() + interval);
    }

    /// Stop the timer; [`RetryTimer::fire`] will not resolve until re-armed
    pub fn disarm(&mut self) {
        self.deadline = None;
    }

    /// Resolve once the armed deadline passes; pend forever while disarmed
    pub async fn fire(&self) {
        match self.deadline {
            Some(deadline) => time::sleep_until(deadline).await,
            None => future::pending().await,
        }
    }
}
