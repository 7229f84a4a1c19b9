use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    /// The last ping was answered; send another.
    Ping,
    /// The last ping went unanswered; drop the socket.
    Terminate,
}

/// Liveness flag shared by a connection's reader (which sees pongs) and
/// writer (which ticks).
#[derive(Debug)]
pub struct Heartbeat {
    alive: AtomicBool,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

impl Heartbeat {
    pub fn new() -> Self {
        Self {
            alive: AtomicBool::new(true),
        }
    }

    pub fn acknowledge(&self) {
        self.alive.store(true, Ordering::Release);
    }

    /// Called once per interval. Clears the flag and asks for a ping, or
    /// reports that the previous ping was never acknowledged.
    pub fn probe(&self) -> Probe {
        if self.alive.swap(false, Ordering::AcqRel) {
            Probe::Ping
        } else {
            Probe::Terminate
        }
    }
}
