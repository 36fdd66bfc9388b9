//! Reconnection attempt tracking and multi-host failover.
//!
//! The cursor always selects the endpoint the next attempt targets.
//! Consecutive failures against the current endpoint are counted; when
//! they reach the configured threshold the cursor advances to the next
//! candidate (wrapping back to the primary after the last reserve) and
//! the counter resets, so failover and backoff compose rather than
//! conflict.

use tracing::debug;

use crate::endpoint::Endpoint;

/// Endpoint cursor plus the consecutive-failure counter
#[derive(Debug)]
pub(crate) struct FailoverState {
    endpoints: Vec<Endpoint>,
    cursor: usize,
    attempts: u32,
    before_reserve: u32,
}

impl FailoverState {
    /// `endpoints` must be non-empty: primary first, reserves after.
    pub fn new(endpoints: Vec<Endpoint>, before_reserve: u32) -> Self {
        Self {
            endpoints,
            cursor: 0,
            attempts: 0,
            before_reserve,
        }
    }

    /// Endpoint the next attempt targets.
    pub fn current(&self) -> &Endpoint {
        &self.endpoints[self.cursor]
    }

    /// Consecutive failures against the current endpoint.
    #[cfg(test)]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Record a failed attempt. Returns the 1-based attempt count the
    /// retry strategy consumes; rotation to a reserve resets the counter
    /// afterwards.
    pub fn record_failure(&mut self) -> u32 {
        self.attempts += 1;
        let observed = self.attempts;
        if self.endpoints.len() > 1 && self.attempts >= self.before_reserve {
            self.cursor = (self.cursor + 1) % self.endpoints.len();
            self.attempts = 0;
            debug!(endpoint = %self.endpoints[self.cursor], "rotating to reserve endpoint");
        }
        observed
    }

    /// Record a successful connect; the counter resets to zero.
    pub fn record_success(&mut self) {
        self.attempts = 0;
    }
}
