//! Reconnect pacing for the network link supervisor

use std::time::Duration;

const BASE_SECS: u64 = 5;
const MAX_SECS: u64 = 60;
const MAX_DOUBLINGS: u32 = 4;
/// Every Nth attempt restarts the radio instead of only re-associating
const RADIO_CYCLE_EVERY: u32 = 3;

/// Exponential backoff: 5, 10, 20, 40, 60, 60, ... seconds
#[derive(Debug, Default, Clone)]
pub struct ReconnectBackoff {
    attempts: u32,
}

impl ReconnectBackoff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new attempt and return how long to wait before making it.
    pub fn next_delay(&mut self) -> Duration {
        self.attempts = self.attempts.saturating_add(1);
        let doublings = (self.attempts - 1).min(MAX_DOUBLINGS);
        Duration::from_secs((BASE_SECS << doublings).min(MAX_SECS))
    }

    /// Whether the attempt just registered should power-cycle the radio
    pub fn should_cycle_radio(&self) -> bool {
        self.attempts > 0 && self.attempts % RADIO_CYCLE_EVERY == 0
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}
