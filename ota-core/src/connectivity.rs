//! Network link state as seen by the update task
//!
//! Link changes are delivered as messages on a channel rather than callbacks,
//! so whatever context raises them never touches controller state directly.

use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::time::{Duration, Instant};

use crate::error::ConnectivityError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    Up,
    Down,
}

/// Establishes and supervises the device's network link.
pub trait ConnectivityProvider {
    fn init(&mut self) -> Result<(), ConnectivityError>;

    fn teardown(&mut self);

    fn is_up(&self) -> bool;

    /// New receiver for link transitions from now on
    fn subscribe(&mut self) -> Receiver<LinkEvent>;
}

/// Last known link state, updated by draining pending events
pub struct LinkMonitor {
    events: Receiver<LinkEvent>,
    up: bool,
    transitions: u32,
}

impl LinkMonitor {
    pub fn new(initially_up: bool, events: Receiver<LinkEvent>) -> Self {
        Self {
            events,
            up: initially_up,
            transitions: 0,
        }
    }

    pub fn from_provider<P: ConnectivityProvider>(provider: &mut P) -> Self {
        let events = provider.subscribe();
        Self::new(provider.is_up(), events)
    }

    /// Apply every queued event without blocking; returns the resulting state.
    pub fn refresh(&mut self) -> bool {
        loop {
            match self.events.try_recv() {
                Ok(event) => {
                    let up = event == LinkEvent::Up;
                    if up != self.up {
                        self.transitions += 1;
                        log::info!("Link {}", if up { "up" } else { "down" });
                    }
                    self.up = up;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    // Provider dropped its sender; keep the last known state
                    break;
                }
            }
        }
        self.up
    }

    /// Overwrite the state with one read directly from the provider
    pub fn sync(&mut self, up: bool) {
        self.up = up;
    }

    pub fn is_up(&self) -> bool {
        self.up
    }

    pub fn transitions(&self) -> u32 {
        self.transitions
    }
}

/// How a bounded wait for the link ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkWait {
    Up,
    TimedOut,
    /// Every sender is gone; nobody will report the link again
    Closed,
}

/// Block until an `Up` event arrives or `timeout` passes. `Down` events
/// (repeated failed associations) do not end the wait.
pub fn wait_for_link_up(events: &Receiver<LinkEvent>, timeout: Duration) -> LinkWait {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return LinkWait::TimedOut;
        }
        match events.recv_timeout(remaining) {
            Ok(LinkEvent::Up) => return LinkWait::Up,
            Ok(LinkEvent::Down) => continue,
            Err(RecvTimeoutError::Timeout) => return LinkWait::TimedOut,
            Err(RecvTimeoutError::Disconnected) => return LinkWait::Closed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;

    #[test]
    fn test_refresh_applies_latest_event() {
        let (tx, rx) = channel();
        let mut monitor = LinkMonitor::new(true, rx);

        tx.send(LinkEvent::Down).unwrap();
        tx.send(LinkEvent::Up).unwrap();
        tx.send(LinkEvent::Down).unwrap();
        assert!(!monitor.refresh());
        assert_eq!(monitor.transitions(), 3);

        assert!(!monitor.refresh(), "no events keeps state");
    }

    #[test]
    fn test_duplicate_events_are_not_transitions() {
        let (tx, rx) = channel();
        let mut monitor = LinkMonitor::new(true, rx);
        tx.send(LinkEvent::Up).unwrap();
        assert!(monitor.refresh());
        assert_eq!(monitor.transitions(), 0);
    }

    #[test]
    fn test_disconnected_sender_keeps_state() {
        let (tx, rx) = channel();
        let mut monitor = LinkMonitor::new(false, rx);
        tx.send(LinkEvent::Up).unwrap();
        drop(tx);
        assert!(monitor.refresh());
        assert!(monitor.is_up());
    }

    #[test]
    fn test_wait_ignores_down_until_up() {
        let (tx, rx) = channel();
        tx.send(LinkEvent::Down).unwrap();
        tx.send(LinkEvent::Down).unwrap();
        tx.send(LinkEvent::Up).unwrap();
        assert_eq!(wait_for_link_up(&rx, Duration::from_secs(5)), LinkWait::Up);
    }

    #[test]
    fn test_wait_times_out() {
        let (tx, rx) = channel();
        tx.send(LinkEvent::Down).unwrap();
        assert_eq!(wait_for_link_up(&rx, Duration::from_millis(20)), LinkWait::TimedOut);
        drop(tx);
    }

    #[test]
    fn test_wait_reports_closed_channel() {
        let (tx, rx) = channel::<LinkEvent>();
        drop(tx);
        assert_eq!(wait_for_link_up(&rx, Duration::from_secs(5)), LinkWait::Closed);
    }
}
