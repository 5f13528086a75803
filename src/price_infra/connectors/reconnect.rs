use std::time::Duration;

/// Close code for a deliberate, orderly shutdown.
pub const NORMAL_CLOSE: u16 = 1000;
/// Reported when the socket dropped without a close frame.
pub const ABNORMAL_CLOSE: u16 = 1006;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseAction {
    /// Orderly close: stay closed.
    Stop,
    Retry { attempt: u32, delay: Duration },
    /// Retry budget spent: stay closed until an explicit connect.
    GiveUp,
}

/// Bounded fixed-delay retry budget for one upstream connection.
#[derive(Clone, Debug)]
pub struct ReconnectPolicy {
    max_retries: u32,
    delay: Duration,
    attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        ReconnectPolicy {
            max_retries,
            delay,
            attempts: 0,
        }
    }

    pub fn on_close(&mut self, code: u16) -> CloseAction {
        if code == NORMAL_CLOSE {
            return CloseAction::Stop;
        }
        if self.attempts >= self.max_retries {
            return CloseAction::GiveUp;
        }
        self.attempts += 1;
        CloseAction::Retry {
            attempt: self.attempts,
            delay: self.delay,
        }
    }

    /// Called on every heartbeat and on explicit connects.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}
