//! WiFi link supervision: periodic reconnects while the station is down and
//! a restart once reconnecting has clearly stopped working.

/// Gap between two reconnect attempts.
pub const RECONNECT_INTERVAL_MS: u32 = 10_000;

/// Attempts before giving up and restarting (about ten minutes).
pub const MAX_RECONNECT_ATTEMPTS: u32 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkAction {
    Idle,
    Reconnect,
    Restart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkSupervisor {
    last_attempt_ms: u32,
    attempts: u32,
}

impl LinkSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Called every loop iteration with the current station state.
    pub fn poll(&mut self, now_ms: u32, connected: bool) -> LinkAction {
        if connected {
            self.attempts = 0;
            return LinkAction::Idle;
        }

        if self.attempts > 0 && now_ms.wrapping_sub(self.last_attempt_ms) <= RECONNECT_INTERVAL_MS
        {
            return LinkAction::Idle;
        }

        self.last_attempt_ms = now_ms;
        self.attempts += 1;
        if self.attempts > MAX_RECONNECT_ATTEMPTS {
            LinkAction::Restart
        } else {
            LinkAction::Reconnect
        }
    }
}
